//! Test host runtime providers.
//!
//! A [`TestRuntimeProvider`] knows how to start the process that actually
//! executes tests:
//! - **Source resolution**: maps requested sources to the binaries it runs
//! - **Launch**: spawns the host and announces it on a broadcast channel
//! - **Extensions**: decides which extension paths the host must load
//!
//! # Components
//!
//! - [`TestRuntimeProvider`]: the contract the proxy drives
//! - [`ProcessTestHostManager`]: spawns a configured executable as the host
//!
//! # Launch Flow
//!
//! 1. Proxy subscribes with [`TestRuntimeProvider::subscribe_host_launched`]
//! 2. Proxy builds a [`TestProcessStartInfo`] from sources and connection info
//! 3. [`TestRuntimeProvider::launch_test_host`] starts the process and
//!    publishes a [`HostLaunchedEvent`]
//! 4. Proxy waits for the host to connect back

pub mod process;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::TestRunnerConnectionInfo;

pub use process::ProcessTestHostManager;

/// Everything needed to start a test host process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestProcessStartInfo {
    pub file_name: PathBuf,
    pub arguments: Vec<String>,
    pub environment_variables: HashMap<String, String>,
    pub working_directory: Option<PathBuf>,
}

/// Published once a test host process exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLaunchedEvent {
    pub process_id: Option<u32>,
    pub launched_at: DateTime<Utc>,
}

impl HostLaunchedEvent {
    pub fn new(process_id: Option<u32>) -> Self {
        Self {
            process_id,
            launched_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait TestRuntimeProvider: Send + Sync {
    /// Whether one host process serves several runs.
    fn is_shared(&self) -> bool;

    /// Sources the host actually executes for the requested ones.
    fn get_test_sources(&self, sources: &[String]) -> Vec<String>;

    fn get_test_host_process_start_info(
        &self,
        sources: &[String],
        environment: &HashMap<String, String>,
        connection_info: &TestRunnerConnectionInfo,
    ) -> TestProcessStartInfo;

    /// Start the host. Returns true once a process is running.
    async fn launch_test_host(
        &self,
        start_info: TestProcessStartInfo,
        cancellation: CancellationToken,
    ) -> bool;

    /// Receiver for launch notifications. Subscribe before launching.
    fn subscribe_host_launched(&self) -> broadcast::Receiver<HostLaunchedEvent>;

    /// Extension paths the host must be initialized with.
    fn get_test_platform_extensions(
        &self,
        adapter_extensions: &[String],
        all_extensions: &[String],
    ) -> Vec<String>;
}
