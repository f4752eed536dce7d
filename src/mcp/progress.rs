//! MCP Progress Notifications
//!
//! Support for emitting progress updates while a tool call is in flight.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mcp::messages::ServerNotification;
use crate::mcp::server::WeakServer;

/// Progress token for tracking operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ProgressToken {
    String(String),
    Number(i64),
}

/// Progress notification params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    pub progress_token: ProgressToken,
    pub progress: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressParams {
    pub fn new(
        token: ProgressToken,
        progress: u64,
        total: Option<u64>,
        message: Option<String>,
    ) -> Self {
        Self {
            progress_token: token,
            progress,
            total,
            message,
        }
    }
}

/// Progress reporter bound to one session and one caller-supplied token.
///
/// Obtained from a tool call whose request carried `_meta.progressToken`.
#[derive(Clone)]
pub struct ProgressReporter {
    server: WeakServer,
    session_id: String,
    token: ProgressToken,
    total: Option<u64>,
}

impl ProgressReporter {
    pub(crate) fn new(
        server: WeakServer,
        session_id: impl Into<String>,
        token: ProgressToken,
        total: Option<u64>,
    ) -> Self {
        Self {
            server,
            session_id: session_id.into(),
            token,
            total,
        }
    }

    pub fn token(&self) -> &ProgressToken {
        &self.token
    }

    /// Use a different total for subsequent reports.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Send a progress notification to the owning session.
    pub fn report(&self, progress: u64, message: Option<&str>) -> Result<()> {
        let server = self.server.upgrade().ok_or(Error::ServerShutDown)?;
        let params = ProgressParams::new(
            self.token.clone(),
            progress,
            self.total,
            message.map(String::from),
        );
        server.send_notification(&ServerNotification::Progress(params), Some(&self.session_id));
        Ok(())
    }

    /// Report a percentage, scaled against the total when one is set.
    pub fn report_percent(&self, percent: u64, message: Option<&str>) -> Result<()> {
        let progress = match self.total {
            Some(total) => (percent.min(100) * total) / 100,
            None => percent.min(100),
        };
        self.report(progress, message)
    }

    /// Report that the operation finished.
    pub fn complete(&self, message: Option<&str>) -> Result<()> {
        self.report(self.total.unwrap_or(100), message)
    }
}
