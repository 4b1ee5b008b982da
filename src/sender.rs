use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::criteria::{TestRunCriteriaWithSources, TestRunCriteriaWithTests};
use crate::error::Result;
use crate::events::TestRunEventsHandler;

/// Request/response channel to a test host.
///
/// Implementations own message framing and serialization. Run requests
/// return once the request is sent; the host's progress and completion are
/// relayed to the supplied events handler.
#[async_trait]
pub trait TestRequestSender: Send + Sync {
    /// Prepare the endpoint the test host connects to. Returns its port.
    async fn initialize_communication(&self) -> Result<u16>;

    /// Wait for the test host to connect and complete the handshake.
    async fn wait_for_request_handler_connection(&self, timeout: Duration) -> bool;

    /// Send the extensions the host must load. `has_specific_tests` is true
    /// when the run targets an explicit list of tests rather than sources.
    async fn initialize_execution(&self, extensions: &[String], has_specific_tests: bool) -> Result<()>;

    async fn start_test_run_with_sources(
        &self,
        criteria: TestRunCriteriaWithSources,
        events_handler: Option<Arc<dyn TestRunEventsHandler>>,
    ) -> Result<()>;

    async fn start_test_run_with_tests(
        &self,
        criteria: TestRunCriteriaWithTests,
        events_handler: Option<Arc<dyn TestRunEventsHandler>>,
    ) -> Result<()>;

    async fn send_test_run_cancel(&self) -> Result<()>;

    async fn end_session(&self) -> Result<()>;
}
