//! Session registry.
//!
//! A session is created by a successful `initialize` and lives until it is
//! removed explicitly, its duplex pipe closes, or its last SSE subscriber
//! goes away.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::mcp::protocol::{ClientCapabilities, Implementation, InitializeParams, LoggingLevel};

/// Session token used for the duplex pipe transport.
pub const IO_SESSION_ID: &str = "io";

/// State negotiated with one client.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub protocol_version: String,
    pub client_info: Implementation,
    pub client_capabilities: ClientCapabilities,
    /// Minimum level for `notifications/message`; `None` admits everything.
    pub log_level: Option<LoggingLevel>,
    pub subscriptions: HashSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, params: InitializeParams) -> Self {
        Self {
            id: id.into(),
            protocol_version: params.protocol_version,
            client_info: params.client_info,
            client_capabilities: params.capabilities,
            log_level: None,
            subscriptions: HashSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn admits(&self, level: LoggingLevel) -> bool {
        self.log_level.map_or(true, |min| level >= min)
    }
}

/// Concurrent map of live sessions keyed by token.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session. Fails if the token is already in use.
    pub fn create(&self, session: Session) -> Result<()> {
        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(_) => Err(Error::SessionExists(session.id)),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Snapshot of a session.
    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn client_capabilities(&self, id: &str) -> Option<ClientCapabilities> {
        self.sessions.get(id).map(|s| s.client_capabilities.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn set_log_level(&self, id: &str, level: LoggingLevel) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        session.log_level = Some(level);
        Ok(())
    }

    pub fn subscribe(&self, id: &str, uri: &str) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        session.subscriptions.insert(uri.to_string());
        Ok(())
    }

    pub fn unsubscribe(&self, id: &str, uri: &str) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        session.subscriptions.remove(uri);
        Ok(())
    }

    /// Sessions subscribed to `uri`.
    pub fn subscribers_of(&self, uri: &str) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|s| s.subscriptions.contains(uri))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Sessions whose log level admits `level`.
    pub fn admitting(&self, level: LoggingLevel) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|s| s.admits(level))
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::PROTOCOL_VERSION;

    fn params() -> InitializeParams {
        InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation::new("test-client", "1.0"),
        }
    }

    #[test]
    fn test_create_and_get() {
        let registry = SessionRegistry::new();
        registry.create(Session::new("a", params())).unwrap();

        assert!(registry.contains("a"));
        assert_eq!(registry.get("a").unwrap().client_info.name, "test-client");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let registry = SessionRegistry::new();
        registry.create(Session::new("a", params())).unwrap();

        let err = registry.create(Session::new("a", params())).unwrap_err();
        assert!(matches!(err, Error::SessionExists(ref id) if id == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove() {
        let registry = SessionRegistry::new();
        registry.create(Session::new("a", params())).unwrap();

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_log_level_filtering() {
        let registry = SessionRegistry::new();
        registry.create(Session::new("quiet", params())).unwrap();
        registry.create(Session::new("chatty", params())).unwrap();
        registry.set_log_level("quiet", LoggingLevel::Error).unwrap();

        let mut admitted = registry.admitting(LoggingLevel::Info);
        admitted.sort();
        assert_eq!(admitted, vec!["chatty".to_string()]);

        let mut admitted = registry.admitting(LoggingLevel::Critical);
        admitted.sort();
        assert_eq!(admitted, vec!["chatty".to_string(), "quiet".to_string()]);
    }

    #[test]
    fn test_subscriptions() {
        let registry = SessionRegistry::new();
        registry.create(Session::new("a", params())).unwrap();
        registry.create(Session::new("b", params())).unwrap();

        registry.subscribe("a", "memo://readme").unwrap();
        assert_eq!(registry.subscribers_of("memo://readme"), vec!["a".to_string()]);

        registry.unsubscribe("a", "memo://readme").unwrap();
        assert!(registry.subscribers_of("memo://readme").is_empty());

        assert!(registry.subscribe("missing", "memo://readme").is_err());
    }
}
