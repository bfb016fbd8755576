use bytes::Bytes;
use std::fmt;
use std::time::Duration;

use perch_core::backoff::{BackoffPolicy, ExponentialBackoff};
use perch_core::{CoordinationError, Result};

/// Configuration for a [`Registration`](crate::Registration) engine.
///
/// Unlike election, registration carries a payload: the opaque bytes
/// stored in the published record. The caller supplies it; producing a
/// unique identifier to register under is the caller's concern.
#[derive(Default)]
pub struct RegistrationConfig {
    /// Absolute path the registration records are created under
    pub namespace: String,
    /// Coordinator endpoints
    pub servers: Vec<String>,
    /// Connection establishment timeout and ephemeral-node lifetime
    /// after a disconnect
    pub session_timeout: Duration,
    /// Opaque bytes stored in the published record
    pub payload: Option<Bytes>,
    /// Retry pacing; a randomized exponential policy with no terminal
    /// cap is installed when absent
    pub backoff: Option<Box<dyn BackoffPolicy>>,
}

impl RegistrationConfig {
    pub fn new(
        namespace: impl Into<String>,
        servers: Vec<String>,
        session_timeout: Duration,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            servers,
            session_timeout,
            payload: Some(payload.into()),
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
        if self.payload.is_none() {
            return Err(CoordinationError::config("no payload provided"));
        }
        Ok(())
    }

    pub(crate) fn take_backoff(&mut self) -> Box<dyn BackoffPolicy> {
        self.backoff
            .take()
            .unwrap_or_else(|| Box::new(ExponentialBackoff::new()))
    }
}

impl fmt::Debug for RegistrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationConfig")
            .field("namespace", &self.namespace)
            .field("servers", &self.servers)
            .field("session_timeout", &self.session_timeout)
            .field("payload", &self.payload.as_ref().map(|p| p.len()))
            .field("backoff", &self.backoff.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RegistrationConfig {
        RegistrationConfig::new(
            "/registration",
            vec!["coord-1:2181".to_string()],
            Duration::from_secs(5),
            "host-1_abcde".as_bytes().to_vec(),
        )
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn missing_payload_is_rejected() {
        let mut config = valid();
        config.payload = None;
        assert!(matches!(
            config.validate(),
            Err(CoordinationError::Config { .. })
        ));
    }

    #[test]
    fn empty_server_list_is_rejected() {
        let mut config = valid();
        config.servers.clear();
        assert!(matches!(
            config.validate(),
            Err(CoordinationError::Config { .. })
        ));
    }

    #[test]
    fn empty_namespace_is_rejected() {
        let mut config = valid();
        config.namespace.clear();
        assert!(matches!(
            config.validate(),
            Err(CoordinationError::Config { .. })
        ));
    }

    #[test]
    fn zero_session_timeout_is_rejected() {
        let mut config = valid();
        config.session_timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(CoordinationError::Config { .. })
        ));
    }
}
