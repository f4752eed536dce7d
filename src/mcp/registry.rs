//! Ordered capability registries and cursor pagination.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Default number of items returned per `*/list` page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Key of the first item not returned; `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Return up to `page_size` items starting at the first key `>= cursor`.
pub fn paginate<V, T>(
    map: &BTreeMap<String, V>,
    cursor: Option<&str>,
    page_size: usize,
    mut project: impl FnMut(&V) -> T,
) -> Page<T> {
    let start = cursor.map_or(Bound::Unbounded, Bound::Included);
    let mut iter = map
        .range::<str, _>((start, Bound::Unbounded))
        .peekable();

    let items = iter
        .by_ref()
        .take(page_size.max(1))
        .map(|(_, value)| project(value))
        .collect();
    let next_cursor = iter.peek().map(|(key, _)| (*key).clone());

    Page { items, next_cursor }
}

/// Key-ordered, thread-safe map of registered capabilities.
///
/// Values are cloned out on lookup so no lock is held while a handler runs.
pub struct Registry<V> {
    entries: RwLock<BTreeMap<String, V>>,
}

impl<V: Clone> Registry<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert or replace; returns the previous value.
    pub fn insert(&self, key: impl Into<String>, value: V) -> Option<V> {
        self.entries.write().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.write().remove(key)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn page<T>(
        &self,
        cursor: Option<&str>,
        page_size: usize,
        project: impl FnMut(&V) -> T,
    ) -> Page<T> {
        paginate(&self.entries.read(), cursor, page_size, project)
    }
}

impl<V: Clone> Default for Registry<V> {
    fn default() -> Self {
        Self::new()
    }
}
