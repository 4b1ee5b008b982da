//! Events flowing from a test run back to the caller.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::criteria::TestCase;
use crate::error::Result;

/// Message type names used in raw message envelopes.
pub mod message_type {
    pub const EXECUTION_COMPLETE: &str = "TestExecution.Completed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestMessageLevel {
    Informational,
    Warning,
    Error,
}

impl std::fmt::Display for TestMessageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestMessageLevel::Informational => write!(f, "informational"),
            TestMessageLevel::Warning => write!(f, "warning"),
            TestMessageLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TestOutcome {
    None,
    Passed,
    Failed,
    Skipped,
    NotFound,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunStatistics {
    pub executed_tests: u64,
    pub stats: BTreeMap<TestOutcome, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSet {
    pub uri: String,
    pub display_name: String,
    pub attachments: Vec<String>,
}

/// Progress chunk streamed while a run is in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunChangedEventArgs {
    pub stats: Option<TestRunStatistics>,
    pub new_test_results: Vec<TestCase>,
    pub active_tests: Vec<TestCase>,
}

/// Terminal report for a test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunCompleteEventArgs {
    pub stats: Option<TestRunStatistics>,
    pub is_canceled: bool,
    pub is_aborted: bool,
    pub error: Option<String>,
    pub attachment_sets: Vec<AttachmentSet>,
    pub elapsed_time: Duration,
}

impl TestRunCompleteEventArgs {
    /// Report for a run that never reached, or failed during, dispatch.
    pub fn aborted(error: impl Into<String>) -> Self {
        Self {
            stats: None,
            is_canceled: false,
            is_aborted: true,
            error: Some(error.into()),
            attachment_sets: Vec::new(),
            elapsed_time: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunCompletePayload {
    pub test_run_complete_args: TestRunCompleteEventArgs,
    pub last_run_tests: Option<TestRunChangedEventArgs>,
    pub run_attachments: Option<Vec<AttachmentSet>>,
    pub executor_uris: Option<Vec<String>>,
}

/// Envelope used for raw messages handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    pub message_type: String,
    pub payload: serde_json::Value,
}

impl Message {
    pub fn new<T: Serialize>(message_type: &str, payload: &T) -> Result<Self> {
        Ok(Self {
            message_type: message_type.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Receiver of everything a test run reports back.
///
/// Channel implementations relay the test host's messages here; the proxy
/// calls it directly only to report an aborted run.
pub trait TestRunEventsHandler: Send + Sync {
    fn handle_raw_message(&self, raw_message: &str);

    fn handle_log_message(&self, level: TestMessageLevel, message: &str);

    fn handle_test_run_complete(
        &self,
        complete_args: &TestRunCompleteEventArgs,
        last_chunk: Option<&TestRunChangedEventArgs>,
        run_attachments: Option<&[AttachmentSet]>,
        executor_uris: Option<&[String]>,
    );

    fn handle_test_run_stats_change(&self, _args: &TestRunChangedEventArgs) {}
}
