use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::{ProxyConfig, TestRunnerConnectionInfo};
use crate::criteria::{RunTarget, TestRunCriteria, TestRunCriteriaWithSources, TestRunCriteriaWithTests};
use crate::error::{ProxyError, Result};
use crate::events::{
    message_type, Message, TestMessageLevel, TestRunCompleteEventArgs, TestRunCompletePayload,
    TestRunEventsHandler,
};
use crate::host::{HostLaunchedEvent, TestRuntimeProvider};
use crate::metrics::{RequestData, TIME_TAKEN_TO_START_EXECUTION_ENGINE};
use crate::plugins::TestPluginCache;
use crate::proxy::state::{LaunchWatcher, SessionPhase, SessionState};
use crate::sender::TestRequestSender;

/// Drives one test run session against a test host.
///
/// A run goes through four steps, each of which can fail on its own:
/// 1. Launch the test host and wait for it to connect ([`setup_channel`](Self::setup_channel))
/// 2. Send the extensions the host has to load
/// 3. Send the run request, for sources or for specific tests
/// 4. Let the channel relay results to the caller's events handler
///
/// Failures never escape [`start_test_run`](Self::start_test_run); they are
/// reported to the events handler as an aborted run. [`cancel`](Self::cancel)
/// and [`close`](Self::close) may be called from another task while a run is
/// in flight.
pub struct ProxyExecutionManager {
    config: ProxyConfig,
    request_data: RequestData,
    request_sender: Arc<dyn TestRequestSender>,
    test_host_manager: Arc<dyn TestRuntimeProvider>,
    plugin_cache: Arc<RwLock<TestPluginCache>>,
    state: Arc<RwLock<SessionState>>,
    launch_watcher: LaunchWatcher,
    cancellation: CancellationToken,
}

impl ProxyExecutionManager {
    pub fn new(
        request_data: RequestData,
        request_sender: Arc<dyn TestRequestSender>,
        test_host_manager: Arc<dyn TestRuntimeProvider>,
        plugin_cache: Arc<RwLock<TestPluginCache>>,
        config: ProxyConfig,
    ) -> Self {
        Self {
            config,
            request_data,
            request_sender,
            test_host_manager,
            plugin_cache,
            state: Arc::new(RwLock::new(SessionState::new())),
            launch_watcher: LaunchWatcher::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Use `token` as the parent of every launch cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.is_connected
    }

    pub async fn host_launched(&self) -> bool {
        self.state.read().await.host_launched()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state.read().await.phase
    }

    /// Start a test run.
    ///
    /// If the test host resolves the requested sources to different ones,
    /// the tests in `criteria` are rewritten in place to the first resolved
    /// source. Any failure is reported to `events_handler` as a raw message,
    /// an error log message and an aborted run completion, in that order.
    pub async fn start_test_run(
        &self,
        criteria: &mut TestRunCriteria,
        events_handler: Option<Arc<dyn TestRunEventsHandler>>,
    ) {
        if let Err(e) = self.try_start_test_run(criteria, events_handler.clone()).await {
            tracing::error!(error = %e, "Test run aborted");
            self.state.write().await.phase = SessionPhase::Aborted;
            if let Some(handler) = events_handler {
                report_aborted_run(handler.as_ref(), &e);
            }
        }
    }

    async fn try_start_test_run(
        &self,
        criteria: &mut TestRunCriteria,
        events_handler: Option<Arc<dyn TestRunEventsHandler>>,
    ) -> Result<()> {
        let setup_started = Instant::now();

        let sources = criteria.sources();
        let actual_sources = self.test_host_manager.get_test_sources(&sources);
        if criteria.has_specific_tests() && actual_sources != sources {
            match actual_sources.first() {
                Some(source) => {
                    tracing::info!(
                        requested = ?sources,
                        actual = %source,
                        "Test host resolved sources, updating test case sources"
                    );
                    criteria.update_test_case_sources(source);
                }
                None => tracing::warn!(
                    requested = ?sources,
                    "Test host resolved no sources, keeping test case sources"
                ),
            }
        }

        self.setup_channel(&actual_sources, self.cancellation.child_token())
            .await?;
        self.initialize_extensions(criteria).await?;

        let time_to_start = setup_started.elapsed();
        let dispatched = self.dispatch(criteria, events_handler).await;
        self.request_data.metrics_collection.add(
            TIME_TAKEN_TO_START_EXECUTION_ENGINE,
            time_to_start.as_secs_f64().to_string(),
        );
        dispatched?;

        self.state.write().await.phase = SessionPhase::Running;
        Ok(())
    }

    /// Launch the test host and wait for it to connect back.
    ///
    /// The channel endpoint is prepared before the launch so the host has
    /// something to connect to. A launch notification is recorded even if
    /// the handshake later fails, so [`close`](Self::close) still ends the
    /// session. A connected shared host is reused without a new launch.
    ///
    /// # Errors
    ///
    /// [`ProxyError::HostLaunchFailed`] if the host did not start, and
    /// [`ProxyError::ConnectionTimeout`] if it did not connect within the
    /// configured timeout.
    pub async fn setup_channel(&self, sources: &[String], cancellation: CancellationToken) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.is_connected && self.test_host_manager.is_shared() {
                tracing::debug!("Reusing connected shared test host");
                return Ok(());
            }
            state.phase = SessionPhase::Connecting;
            state.reset_initialized_extensions();
        }

        let port = self.request_sender.initialize_communication().await?;
        let connection_info = TestRunnerConnectionInfo::loopback(port);
        let start_info = self.test_host_manager.get_test_host_process_start_info(
            sources,
            &self.config.environment,
            &connection_info,
        );

        let launched_rx = self.test_host_manager.subscribe_host_launched();
        let launched = self
            .test_host_manager
            .launch_test_host(start_info, cancellation)
            .await;
        self.observe_host_launched(launched_rx).await;

        if !launched {
            self.state.write().await.is_connected = false;
            return Err(ProxyError::HostLaunchFailed);
        }

        let timeout = self.config.connection_timeout;
        let connected = tokio::time::timeout(
            timeout,
            self.request_sender.wait_for_request_handler_connection(timeout),
        )
        .await
        .unwrap_or(false);

        {
            let mut state = self.state.write().await;
            state.is_connected = connected;
            if connected {
                state.phase = SessionPhase::Connected;
            }
        }

        if !connected {
            tracing::error!(
                timeout_ms = timeout.as_millis() as u64,
                "Test host did not connect"
            );
            return Err(ProxyError::ConnectionTimeout(timeout));
        }

        tracing::info!(port, "Test host connected");
        Ok(())
    }

    /// Record a launch notification published during the launch call, or
    /// leave a watcher for one that arrives later.
    async fn observe_host_launched(&self, mut launched_rx: broadcast::Receiver<HostLaunchedEvent>) {
        match launched_rx.try_recv() {
            Ok(event) => self.state.write().await.mark_host_launched(event.process_id),
            Err(TryRecvError::Lagged(_)) => self.state.write().await.mark_host_launched(None),
            Err(TryRecvError::Closed) => {}
            Err(TryRecvError::Empty) => {
                let state = self.state.clone();
                let watcher = tokio::spawn(async move {
                    match launched_rx.recv().await {
                        Ok(event) => state.write().await.mark_host_launched(event.process_id),
                        Err(RecvError::Lagged(_)) => state.write().await.mark_host_launched(None),
                        Err(RecvError::Closed) => {}
                    }
                });
                self.launch_watcher.replace(watcher);
            }
        }
    }

    async fn initialize_extensions(&self, criteria: &TestRunCriteria) -> Result<()> {
        let (adapter_extensions, all_extensions) = {
            let cache = self.plugin_cache.read().await;
            (cache.adapter_extension_paths(), cache.all_default_extension_paths())
        };

        let required = self
            .test_host_manager
            .get_test_platform_extensions(&adapter_extensions, &all_extensions);

        let shared = self.test_host_manager.is_shared();
        let extensions = if shared {
            self.state.read().await.pending_extensions(required)
        } else {
            required
        };

        if shared && extensions.is_empty() {
            tracing::debug!("Shared test host needs no new extensions");
            return Ok(());
        }

        let has_specific_tests = criteria.has_specific_tests();
        tracing::info!(
            count = extensions.len(),
            shared,
            has_specific_tests,
            "Initializing test host extensions"
        );
        self.request_sender
            .initialize_execution(&extensions, has_specific_tests)
            .await
            .map_err(|e| ProxyError::Negotiation(e.to_string()))?;

        if shared {
            self.state
                .write()
                .await
                .record_initialized_extensions(extensions);
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        criteria: &TestRunCriteria,
        events_handler: Option<Arc<dyn TestRunEventsHandler>>,
    ) -> Result<()> {
        let test_execution_context = criteria.execution_context();
        let run_settings = criteria.run_settings().map(str::to_string);

        let sent = match criteria.target() {
            RunTarget::Tests(tests) => {
                tracing::info!(tests = tests.len(), "Starting test run for tests");
                self.request_sender
                    .start_test_run_with_tests(
                        TestRunCriteriaWithTests {
                            tests: tests.clone(),
                            run_settings,
                            test_execution_context,
                        },
                        events_handler,
                    )
                    .await
            }
            RunTarget::Sources(adapter_source_map) => {
                tracing::info!(
                    adapters = adapter_source_map.len(),
                    "Starting test run for sources"
                );
                self.request_sender
                    .start_test_run_with_sources(
                        TestRunCriteriaWithSources {
                            adapter_source_map: adapter_source_map.clone(),
                            run_settings,
                            test_execution_context,
                        },
                        events_handler,
                    )
                    .await
            }
        };

        sent.map_err(|e| ProxyError::Dispatch(e.to_string()))
    }

    /// Ask the test host to cancel the current run. Does nothing unless the
    /// host is connected.
    pub async fn cancel(&self) {
        if !self.state.read().await.is_connected {
            tracing::debug!("Test host not connected, nothing to cancel");
            return;
        }

        tracing::info!("Cancelling test run");
        if let Err(e) = self.request_sender.send_test_run_cancel().await {
            tracing::warn!(error = %e, "Failed to send test run cancel");
        }
    }

    /// End the session with the test host.
    ///
    /// Sends an end-session signal whenever a test host was launched, even if
    /// it never connected. Every call sends a new signal. The ended host is
    /// not reused: a later run launches a new one.
    pub async fn close(&self) {
        let host_launched = {
            let mut state = self.state.write().await;
            state.close();
            state.host_launched()
        };

        if !host_launched {
            tracing::debug!("Test host never launched, no session to end");
            return;
        }

        tracing::info!("Ending test host session");
        if let Err(e) = self.request_sender.end_session().await {
            tracing::warn!(error = %e, "Failed to send end session");
        }
    }
}

impl Drop for ProxyExecutionManager {
    fn drop(&mut self) {
        self.launch_watcher.stop();
    }
}

/// Report a run that failed before or during dispatch.
fn report_aborted_run(handler: &dyn TestRunEventsHandler, error: &ProxyError) {
    let description = error.to_string();
    let complete_args = TestRunCompleteEventArgs::aborted(description.clone());
    let payload = TestRunCompletePayload {
        test_run_complete_args: complete_args.clone(),
        last_run_tests: None,
        run_attachments: None,
        executor_uris: None,
    };

    let raw_message = Message::new(message_type::EXECUTION_COMPLETE, &payload)
        .and_then(|message| message.to_json())
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to serialize aborted run completion");
            serde_json::json!({
                "MessageType": message_type::EXECUTION_COMPLETE,
                "Payload": null,
            })
            .to_string()
        });

    handler.handle_raw_message(&raw_message);
    handler.handle_log_message(TestMessageLevel::Error, &description);
    handler.handle_test_run_complete(&complete_args, None, None, None);
}
