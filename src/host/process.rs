use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{TestHostConfig, TestRunnerConnectionInfo};
use crate::host::{HostLaunchedEvent, TestProcessStartInfo, TestRuntimeProvider};

/// Launches a configured executable as the test host.
///
/// The child is spawned with `kill_on_drop`, so dropping the manager (or
/// calling [`clean_test_host`](Self::clean_test_host)) stops the host.
#[derive(Debug)]
pub struct ProcessTestHostManager {
    config: TestHostConfig,
    launched_tx: broadcast::Sender<HostLaunchedEvent>,
    child: Mutex<Option<Child>>,
}

impl ProcessTestHostManager {
    pub fn new(config: TestHostConfig) -> Self {
        let (launched_tx, _) = broadcast::channel(4);
        Self {
            config,
            launched_tx,
            child: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TestHostConfig {
        &self.config
    }

    /// Process id of the running host, if one was launched.
    pub async fn process_id(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }

    /// Kill the host process if one is running.
    pub async fn clean_test_host(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };

        let pid = child.id();
        match child.kill().await {
            Ok(()) => tracing::info!(pid = ?pid, "Test host stopped"),
            Err(e) => tracing::warn!(pid = ?pid, error = %e, "Failed to stop test host"),
        }
    }
}

#[async_trait]
impl TestRuntimeProvider for ProcessTestHostManager {
    fn is_shared(&self) -> bool {
        self.config.shared
    }

    fn get_test_sources(&self, sources: &[String]) -> Vec<String> {
        sources.to_vec()
    }

    fn get_test_host_process_start_info(
        &self,
        _sources: &[String],
        environment: &HashMap<String, String>,
        connection_info: &TestRunnerConnectionInfo,
    ) -> TestProcessStartInfo {
        let mut arguments = self.config.arguments.clone();
        arguments.extend(connection_info.to_command_line_options());

        let mut environment_variables = self.config.environment.clone();
        environment_variables.extend(environment.iter().map(|(k, v)| (k.clone(), v.clone())));

        TestProcessStartInfo {
            file_name: self.config.executable.clone(),
            arguments,
            environment_variables,
            working_directory: self.config.working_directory.clone(),
        }
    }

    async fn launch_test_host(
        &self,
        start_info: TestProcessStartInfo,
        cancellation: CancellationToken,
    ) -> bool {
        if cancellation.is_cancelled() {
            tracing::info!("Launch cancelled before the test host was started");
            return false;
        }

        tracing::info!(
            file_name = %start_info.file_name.display(),
            args = ?start_info.arguments,
            "Launching test host"
        );

        let mut command = Command::new(&start_info.file_name);
        command
            .args(&start_info.arguments)
            .envs(&start_info.environment_variables)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(ref dir) = start_info.working_directory {
            command.current_dir(dir);
        }

        match command.spawn() {
            Ok(child) => {
                let pid = child.id();
                *self.child.lock().await = Some(child);
                tracing::info!(pid = ?pid, "Test host launched");
                // No receivers just means nobody is waiting on the launch.
                let _ = self.launched_tx.send(HostLaunchedEvent::new(pid));
                true
            }
            Err(e) => {
                tracing::error!(
                    file_name = %start_info.file_name.display(),
                    error = %e,
                    "Test host launch failed"
                );
                false
            }
        }
    }

    fn subscribe_host_launched(&self) -> broadcast::Receiver<HostLaunchedEvent> {
        self.launched_tx.subscribe()
    }

    fn get_test_platform_extensions(
        &self,
        _adapter_extensions: &[String],
        all_extensions: &[String],
    ) -> Vec<String> {
        let mut extensions: Vec<String> = Vec::with_capacity(all_extensions.len());
        for extension in all_extensions {
            if !extensions.contains(extension) {
                extensions.push(extension.clone());
            }
        }
        extensions
    }
}
