//! Client configuration.
//!
//! # Design
//! `ClientOptions` is plain data with serde support so hosts can load it from
//! JSON alongside the rest of their settings. The core interprets only the
//! fields that shape dispatch and URL building (`synchronous`,
//! `url_encoding_enabled`, `user_agent`, and the worker-pool knobs). Everything
//! else is carried unopened to the transport.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Options for an `AsyncHttpClient` and its transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Run each request on the calling thread instead of the worker pool.
    /// This blocks the caller for the full request duration.
    pub synchronous: bool,
    pub url_encoding_enabled: bool,
    pub user_agent: Option<String>,

    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub content_compression: bool,
    pub keep_alive: bool,
    pub max_connections_total: u32,
    pub max_connections_per_route: u32,
    pub timeout_ms: Option<u64>,

    /// Idle workers are reclaimed after this long.
    pub pool_keep_alive_ms: u64,
    /// Upper bound on worker threads; `None` grows on demand.
    pub max_workers: Option<usize>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            synchronous: false,
            url_encoding_enabled: true,
            user_agent: None,
            follow_redirects: true,
            max_redirects: 10,
            content_compression: false,
            keep_alive: true,
            max_connections_total: 100,
            max_connections_per_route: 100,
            timeout_ms: None,
            pool_keep_alive_ms: 60_000,
            max_workers: None,
        }
    }
}

impl ClientOptions {
    /// Defaults with synchronous mode switched on.
    pub fn synchronous() -> Self {
        Self {
            synchronous: true,
            ..Self::default()
        }
    }

    /// Parse options from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ClientError> {
        serde_json::from_str(json).map_err(|e| ClientError::InvalidConfig(e.to_string()))
    }

    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn with_url_encoding(mut self, enabled: bool) -> Self {
        self.url_encoding_enabled = enabled;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_redirects(mut self, follow: bool, max_redirects: u32) -> Self {
        self.follow_redirects = follow;
        self.max_redirects = max_redirects;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn pool_keep_alive(&self) -> Duration {
        Duration::from_millis(self.pool_keep_alive_ms)
    }
}
