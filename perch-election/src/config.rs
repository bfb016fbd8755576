use std::fmt;
use std::time::Duration;

use perch_core::backoff::{BackoffPolicy, ExponentialBackoff};
use perch_core::{CoordinationError, Result};

/// Configuration for a [`LeaderElection`](crate::LeaderElection) engine.
///
/// The namespace node must already exist in the coordinator; the engine
/// creates its candidate children under it but never the namespace
/// itself.
#[derive(Default)]
pub struct ElectionConfig {
    /// Absolute path the candidate children are created under
    pub namespace: String,
    /// Coordinator endpoints
    pub servers: Vec<String>,
    /// Connection establishment timeout and ephemeral-node lifetime
    /// after a disconnect
    pub session_timeout: Duration,
    /// Retry pacing; a randomized exponential policy with no terminal
    /// cap is installed when absent
    pub backoff: Option<Box<dyn BackoffPolicy>>,
}

impl ElectionConfig {
    pub fn new(
        namespace: impl Into<String>,
        servers: Vec<String>,
        session_timeout: Duration,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            servers,
            session_timeout,
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, backoff: impl BackoffPolicy + 'static) -> Self {
        self.backoff = Some(Box::new(backoff));
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(CoordinationError::config("no coordinator servers provided"));
        }
        if self.namespace.is_empty() {
            return Err(CoordinationError::config("no namespace provided"));
        }
        if self.session_timeout.is_zero() {
            return Err(CoordinationError::config("no session timeout provided"));
        }
        Ok(())
    }

    pub(crate) fn take_backoff(&mut self) -> Box<dyn BackoffPolicy> {
        self.backoff
            .take()
            .unwrap_or_else(|| Box::new(ExponentialBackoff::new()))
    }
}

impl fmt::Debug for ElectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElectionConfig")
            .field("namespace", &self.namespace)
            .field("servers", &self.servers)
            .field("session_timeout", &self.session_timeout)
            .field("backoff", &self.backoff.is_some())
            .finish()
    }
}
