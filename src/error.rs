use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Failed to launch the test host")]
    HostLaunchFailed,

    #[error("Test host did not connect within {0:?}")]
    ConnectionTimeout(Duration),

    #[error("Extension initialization failed: {0}")]
    Negotiation(String),

    #[error("Failed to dispatch test run: {0}")]
    Dispatch(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid run criteria: {0}")]
    InvalidCriteria(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProxyError {
    /// True for the failures raised while launching the test host or waiting
    /// for it to connect.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            ProxyError::HostLaunchFailed | ProxyError::ConnectionTimeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_failures_are_classified() {
        assert!(ProxyError::HostLaunchFailed.is_setup_failure());
        assert!(ProxyError::ConnectionTimeout(Duration::from_millis(400)).is_setup_failure());
        assert!(!ProxyError::Negotiation("boom".to_string()).is_setup_failure());
        assert!(!ProxyError::Dispatch("boom".to_string()).is_setup_failure());
    }

    #[test]
    fn connection_timeout_message_includes_duration() {
        let err = ProxyError::ConnectionTimeout(Duration::from_secs(90));
        assert_eq!(err.to_string(), "Test host did not connect within 90s");
    }
}
