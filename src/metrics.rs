use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Seconds from the start of channel setup to the start of run dispatch.
pub const TIME_TAKEN_TO_START_EXECUTION_ENGINE: &str = "TestRun.TimeTakenToStartExecutionEngine";

/// Sink for telemetry collected while serving a request.
pub trait MetricsCollection: Send + Sync {
    fn add(&self, key: &str, value: String);

    /// Snapshot of everything collected so far.
    fn metrics(&self) -> HashMap<String, String>;
}

#[derive(Debug, Default)]
pub struct InMemoryMetricsCollection {
    metrics: Mutex<HashMap<String, String>>,
}

impl InMemoryMetricsCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsCollection for InMemoryMetricsCollection {
    fn add(&self, key: &str, value: String) {
        self.metrics.lock().insert(key.to_string(), value);
    }

    fn metrics(&self) -> HashMap<String, String> {
        self.metrics.lock().clone()
    }
}

/// Used when telemetry is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetricsCollection;

impl MetricsCollection for NoOpMetricsCollection {
    fn add(&self, _key: &str, _value: String) {}

    fn metrics(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// Per-request context shared with the proxy.
#[derive(Clone)]
pub struct RequestData {
    pub metrics_collection: Arc<dyn MetricsCollection>,
    pub is_telemetry_opted_in: bool,
}

impl RequestData {
    pub fn new(is_telemetry_opted_in: bool) -> Self {
        let metrics_collection: Arc<dyn MetricsCollection> = if is_telemetry_opted_in {
            Arc::new(InMemoryMetricsCollection::new())
        } else {
            Arc::new(NoOpMetricsCollection)
        };

        Self {
            metrics_collection,
            is_telemetry_opted_in,
        }
    }

    pub fn with_metrics(metrics_collection: Arc<dyn MetricsCollection>) -> Self {
        Self {
            metrics_collection,
            is_telemetry_opted_in: true,
        }
    }
}

impl std::fmt::Debug for RequestData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestData")
            .field("is_telemetry_opted_in", &self.is_telemetry_opted_in)
            .finish_non_exhaustive()
    }
}
