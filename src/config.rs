use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding the connection timeout, in seconds.
pub const CONNECTION_TIMEOUT_ENV: &str = "TESTHOST_CONNECTION_TIMEOUT";

/// Default time the proxy waits for the test host to connect back.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(90);

/// Configuration for a [`ProxyExecutionManager`](crate::proxy::ProxyExecutionManager).
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Upper bound on the handshake wait after the test host is launched.
    pub connection_timeout: Duration,
    /// Extra environment variables handed to the test host launch.
    pub environment: HashMap<String, String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            environment: HashMap::new(),
        }
    }
}

impl ProxyConfig {
    pub fn new(connection_timeout: Duration) -> Self {
        Self {
            connection_timeout,
            ..Default::default()
        }
    }

    /// Build a config from the process environment.
    ///
    /// A missing, unparsable or zero `TESTHOST_CONNECTION_TIMEOUT` falls back
    /// to [`DEFAULT_CONNECTION_TIMEOUT`].
    pub fn from_env() -> Self {
        let value = std::env::var(CONNECTION_TIMEOUT_ENV).ok();
        Self::new(parse_timeout_secs(value.as_deref()))
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

fn parse_timeout_secs(value: Option<&str>) -> Duration {
    match value.map(str::trim).map(str::parse::<u64>) {
        Some(Ok(secs)) if secs > 0 => Duration::from_secs(secs),
        Some(_) => {
            tracing::warn!(
                env = CONNECTION_TIMEOUT_ENV,
                value = ?value,
                "Ignoring invalid connection timeout"
            );
            DEFAULT_CONNECTION_TIMEOUT
        }
        None => DEFAULT_CONNECTION_TIMEOUT,
    }
}

/// Which side of the channel listens for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionRole {
    /// The test host listens and the proxy connects.
    Host,
    /// The proxy listens and the test host connects back.
    Client,
}

impl std::fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionRole::Host => write!(f, "host"),
            ConnectionRole::Client => write!(f, "client"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    Sockets,
}

/// Connection parameters handed to the test host so it can reach the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunnerConnectionInfo {
    pub port: u16,
    pub endpoint: String,
    pub role: ConnectionRole,
    pub transport: Transport,
}

impl TestRunnerConnectionInfo {
    /// Connection info for a test host connecting back to a local port.
    pub fn loopback(port: u16) -> Self {
        Self {
            port,
            endpoint: format!("127.0.0.1:{}", port),
            role: ConnectionRole::Client,
            transport: Transport::Sockets,
        }
    }

    /// Render the connection info as test host command line options.
    pub fn to_command_line_options(&self) -> Vec<String> {
        vec![
            "--port".to_string(),
            self.port.to_string(),
            "--endpoint".to_string(),
            self.endpoint.clone(),
            "--role".to_string(),
            self.role.to_string(),
            "--parentprocessid".to_string(),
            std::process::id().to_string(),
        ]
    }
}

/// Configuration for the process-backed test host.
#[derive(Debug, Clone)]
pub struct TestHostConfig {
    /// Executable launched as the test host
    pub executable: PathBuf,
    /// Arguments placed before the connection options
    pub arguments: Vec<String>,
    /// Environment variables for the test host process
    pub environment: HashMap<String, String>,
    pub working_directory: Option<PathBuf>,
    /// Whether one host process serves several runs
    pub shared: bool,
}

impl TestHostConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            arguments: Vec::new(),
            environment: HashMap::new(),
            working_directory: None,
            shared: true,
        }
    }

    pub fn with_argument(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn isolated(mut self) -> Self {
        self.shared = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_config_default() {
        let cfg = ProxyConfig::default();
        assert_eq!(cfg.connection_timeout, Duration::from_secs(90));
        assert!(cfg.environment.is_empty());
    }

    #[test]
    fn proxy_config_with_env_var() {
        let cfg = ProxyConfig::new(Duration::from_millis(400)).with_env_var("A", "1");
        assert_eq!(cfg.connection_timeout, Duration::from_millis(400));
        assert_eq!(cfg.environment.get("A").map(String::as_str), Some("1"));
    }

    #[test]
    fn timeout_parsing() {
        assert_eq!(parse_timeout_secs(None), DEFAULT_CONNECTION_TIMEOUT);
        assert_eq!(parse_timeout_secs(Some("5")), Duration::from_secs(5));
        assert_eq!(parse_timeout_secs(Some(" 12 ")), Duration::from_secs(12));
        assert_eq!(parse_timeout_secs(Some("0")), DEFAULT_CONNECTION_TIMEOUT);
        assert_eq!(parse_timeout_secs(Some("soon")), DEFAULT_CONNECTION_TIMEOUT);
    }

    #[test]
    fn loopback_connection_info() {
        let info = TestRunnerConnectionInfo::loopback(5000);
        assert_eq!(info.port, 5000);
        assert_eq!(info.endpoint, "127.0.0.1:5000");
        assert_eq!(info.role, ConnectionRole::Client);
        assert_eq!(info.transport, Transport::Sockets);
    }

    #[test]
    fn connection_info_command_line_options() {
        let options = TestRunnerConnectionInfo::loopback(6001).to_command_line_options();
        assert_eq!(&options[0..6], &["--port", "6001", "--endpoint", "127.0.0.1:6001", "--role", "client"]);
        assert_eq!(options[6], "--parentprocessid");
        assert_eq!(options[7], std::process::id().to_string());
    }

    #[test]
    fn test_host_config_builders() {
        let cfg = TestHostConfig::new("/usr/bin/testhost")
            .with_argument("--verbose")
            .with_env_var("KEY", "value")
            .isolated();
        assert_eq!(cfg.executable, PathBuf::from("/usr/bin/testhost"));
        assert_eq!(cfg.arguments, vec!["--verbose".to_string()]);
        assert_eq!(cfg.environment.get("KEY").map(String::as_str), Some("value"));
        assert!(cfg.working_directory.is_none());
        assert!(!cfg.shared);
    }
}
