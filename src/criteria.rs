//! Run criteria and the request payloads built from them.
//!
//! A [`TestRunCriteria`] names *what* to run: either every test found in a
//! set of sources, or an explicit list of [`TestCase`]s. The proxy turns it
//! into a [`TestRunCriteriaWithSources`] or [`TestRunCriteriaWithTests`]
//! payload when dispatching to the test host.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProxyError, Result};

/// Adapter key used when sources are not bound to a specific adapter.
pub const UNSPECIFIED_ADAPTER_PATH: &str = "_none_";

/// Adapter path → sources executed by that adapter.
pub type AdapterSourceMap = BTreeMap<String, Vec<String>>;

/// A single named test bound to a source and an executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: Uuid,
    pub fully_qualified_name: String,
    pub executor_uri: String,
    pub source: String,
    pub display_name: String,
}

impl TestCase {
    pub fn new(
        fully_qualified_name: impl Into<String>,
        executor_uri: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let fully_qualified_name = fully_qualified_name.into();
        let source = source.into();
        let id = Uuid::new_v5(
            &Uuid::NAMESPACE_URL,
            format!("{}{}", source, fully_qualified_name).as_bytes(),
        );

        Self {
            id,
            display_name: fully_qualified_name.clone(),
            fully_qualified_name,
            executor_uri: executor_uri.into(),
            source,
        }
    }
}

/// What a run executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunTarget {
    /// Discover and run everything in these sources, grouped by adapter.
    Sources(AdapterSourceMap),
    /// Run exactly these tests.
    Tests(Vec<TestCase>),
}

/// Immutable description of a test run request.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRunCriteria {
    target: RunTarget,
    frequency_of_run_stats_change_event: u64,
    run_stats_change_event_timeout: Duration,
    run_settings: Option<String>,
    test_case_filter: Option<String>,
    keep_alive: bool,
    debug: bool,
}

impl TestRunCriteria {
    /// Run every test discovered in `sources`.
    pub fn with_sources(sources: Vec<String>, frequency_of_run_stats_change_event: u64) -> Result<Self> {
        if sources.is_empty() {
            return Err(ProxyError::InvalidCriteria(
                "at least one source is required".to_string(),
            ));
        }

        let mut map = AdapterSourceMap::new();
        map.insert(UNSPECIFIED_ADAPTER_PATH.to_string(), sources);
        Self::with_adapter_source_map(map, frequency_of_run_stats_change_event)
    }

    /// Run every test discovered in the mapped sources, grouped by adapter.
    pub fn with_adapter_source_map(
        adapter_source_map: AdapterSourceMap,
        frequency_of_run_stats_change_event: u64,
    ) -> Result<Self> {
        if adapter_source_map.values().all(Vec::is_empty) {
            return Err(ProxyError::InvalidCriteria(
                "adapter source map has no sources".to_string(),
            ));
        }
        Self::build(
            RunTarget::Sources(adapter_source_map),
            frequency_of_run_stats_change_event,
        )
    }

    /// Run exactly `tests`.
    pub fn with_tests(tests: Vec<TestCase>, frequency_of_run_stats_change_event: u64) -> Result<Self> {
        if tests.is_empty() {
            return Err(ProxyError::InvalidCriteria(
                "at least one test is required".to_string(),
            ));
        }
        Self::build(RunTarget::Tests(tests), frequency_of_run_stats_change_event)
    }

    fn build(target: RunTarget, frequency_of_run_stats_change_event: u64) -> Result<Self> {
        if frequency_of_run_stats_change_event == 0 {
            return Err(ProxyError::InvalidCriteria(
                "stats change frequency must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            target,
            frequency_of_run_stats_change_event,
            run_stats_change_event_timeout: Duration::MAX,
            run_settings: None,
            test_case_filter: None,
            keep_alive: true,
            debug: false,
        })
    }

    pub fn with_run_stats_change_event_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(ProxyError::InvalidCriteria(
                "stats change timeout must be greater than zero".to_string(),
            ));
        }
        self.run_stats_change_event_timeout = timeout;
        Ok(self)
    }

    pub fn with_run_settings(mut self, run_settings: impl Into<String>) -> Self {
        self.run_settings = Some(run_settings.into());
        self
    }

    /// Restrict a source run to the tests matching `filter`.
    pub fn with_test_case_filter(mut self, filter: impl Into<String>) -> Result<Self> {
        if self.has_specific_tests() {
            return Err(ProxyError::InvalidCriteria(
                "a test case filter only applies to source runs".to_string(),
            ));
        }
        self.test_case_filter = Some(filter.into());
        Ok(self)
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn target(&self) -> &RunTarget {
        &self.target
    }

    pub fn has_specific_tests(&self) -> bool {
        matches!(self.target, RunTarget::Tests(_))
    }

    pub fn tests(&self) -> Option<&[TestCase]> {
        match &self.target {
            RunTarget::Tests(tests) => Some(tests),
            RunTarget::Sources(_) => None,
        }
    }

    pub fn adapter_source_map(&self) -> Option<&AdapterSourceMap> {
        match &self.target {
            RunTarget::Sources(map) => Some(map),
            RunTarget::Tests(_) => None,
        }
    }

    /// Distinct sources in first-seen order.
    pub fn sources(&self) -> Vec<String> {
        let all: Vec<&String> = match &self.target {
            RunTarget::Sources(map) => map.values().flatten().collect(),
            RunTarget::Tests(tests) => tests.iter().map(|t| &t.source).collect(),
        };

        let mut sources: Vec<String> = Vec::with_capacity(all.len());
        for source in all {
            if !sources.contains(source) {
                sources.push(source.clone());
            }
        }
        sources
    }

    /// Point every test at `source`. Source runs are left untouched.
    pub fn update_test_case_sources(&mut self, source: &str) {
        if let RunTarget::Tests(tests) = &mut self.target {
            for test in tests.iter_mut() {
                test.source = source.to_string();
            }
        }
    }

    pub fn frequency_of_run_stats_change_event(&self) -> u64 {
        self.frequency_of_run_stats_change_event
    }

    pub fn run_stats_change_event_timeout(&self) -> Duration {
        self.run_stats_change_event_timeout
    }

    pub fn run_settings(&self) -> Option<&str> {
        self.run_settings.as_deref()
    }

    pub fn test_case_filter(&self) -> Option<&str> {
        self.test_case_filter.as_deref()
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Execution context sent along with the run request.
    pub fn execution_context(&self) -> TestExecutionContext {
        TestExecutionContext {
            frequency_of_run_stats_change_event: self.frequency_of_run_stats_change_event,
            run_stats_change_event_timeout: self.run_stats_change_event_timeout,
            keep_alive: self.keep_alive,
            is_debug: self.debug,
            test_case_filter: self.test_case_filter.clone(),
        }
    }
}

/// Per-run knobs forwarded to the test host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestExecutionContext {
    pub frequency_of_run_stats_change_event: u64,
    pub run_stats_change_event_timeout: Duration,
    pub keep_alive: bool,
    pub is_debug: bool,
    pub test_case_filter: Option<String>,
}

/// Request payload for a run over sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunCriteriaWithSources {
    pub adapter_source_map: AdapterSourceMap,
    pub run_settings: Option<String>,
    pub test_execution_context: TestExecutionContext,
}

/// Request payload for a run over specific tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunCriteriaWithTests {
    pub tests: Vec<TestCase>,
    pub run_settings: Option<String>,
    pub test_execution_context: TestExecutionContext,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_case(name: &str, source: &str) -> TestCase {
        TestCase::new(name, "executor://dummy", source)
    }

    #[test]
    fn sources_are_keyed_under_unspecified_adapter() {
        let criteria = TestRunCriteria::with_sources(vec!["source.dll".to_string()], 10).unwrap();
        let map = criteria.adapter_source_map().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map[UNSPECIFIED_ADAPTER_PATH], vec!["source.dll".to_string()]);
        assert!(!criteria.has_specific_tests());
        assert!(criteria.tests().is_none());
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert!(matches!(
            TestRunCriteria::with_sources(Vec::new(), 10),
            Err(ProxyError::InvalidCriteria(_))
        ));
        assert!(matches!(
            TestRunCriteria::with_tests(Vec::new(), 10),
            Err(ProxyError::InvalidCriteria(_))
        ));

        let mut map = AdapterSourceMap::new();
        map.insert("adapter".to_string(), Vec::new());
        assert!(TestRunCriteria::with_adapter_source_map(map, 10).is_err());
    }

    #[test]
    fn zero_frequency_and_timeout_are_rejected() {
        assert!(TestRunCriteria::with_sources(vec!["a.dll".to_string()], 0).is_err());

        let criteria = TestRunCriteria::with_sources(vec!["a.dll".to_string()], 1).unwrap();
        assert!(criteria
            .with_run_stats_change_event_timeout(Duration::ZERO)
            .is_err());
    }

    #[test]
    fn defaults() {
        let criteria = TestRunCriteria::with_sources(vec!["a.dll".to_string()], 10).unwrap();
        assert_eq!(criteria.frequency_of_run_stats_change_event(), 10);
        assert_eq!(criteria.run_stats_change_event_timeout(), Duration::MAX);
        assert!(criteria.run_settings().is_none());
        assert!(criteria.test_case_filter().is_none());
        assert!(criteria.keep_alive());
        assert!(!criteria.debug());
    }

    #[test]
    fn filter_is_rejected_for_test_runs() {
        let criteria = TestRunCriteria::with_tests(vec![test_case("A.C.M", "a.dll")], 10).unwrap();
        assert!(criteria.with_test_case_filter("Priority=1").is_err());

        let criteria = TestRunCriteria::with_sources(vec!["a.dll".to_string()], 10)
            .unwrap()
            .with_test_case_filter("Priority=1")
            .unwrap();
        assert_eq!(criteria.test_case_filter(), Some("Priority=1"));
    }

    #[test]
    fn sources_from_tests_are_distinct_and_ordered() {
        let criteria = TestRunCriteria::with_tests(
            vec![
                test_case("A.C.M1", "b.dll"),
                test_case("A.C.M2", "a.dll"),
                test_case("A.C.M3", "b.dll"),
            ],
            10,
        )
        .unwrap();
        assert_eq!(criteria.sources(), vec!["b.dll".to_string(), "a.dll".to_string()]);
    }

    #[test]
    fn test_case_ids_are_deterministic() {
        let a = test_case("A.C.M", "a.dll");
        let b = test_case("A.C.M", "a.dll");
        let c = test_case("A.C.M", "c.dll");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.display_name, "A.C.M");
    }

    #[test]
    fn update_sources_leaves_source_runs_alone() {
        let mut criteria = TestRunCriteria::with_sources(vec!["a.dll".to_string()], 10).unwrap();
        criteria.update_test_case_sources("b.dll");
        assert_eq!(criteria.sources(), vec!["a.dll".to_string()]);
    }

    #[test]
    fn execution_context_copies_criteria_fields() {
        let criteria = TestRunCriteria::with_sources(vec!["a.dll".to_string()], 25)
            .unwrap()
            .with_run_stats_change_event_timeout(Duration::from_millis(1500))
            .unwrap()
            .with_test_case_filter("Category=Fast")
            .unwrap()
            .with_keep_alive(false)
            .with_debug(true);

        let context = criteria.execution_context();
        assert_eq!(context.frequency_of_run_stats_change_event, 25);
        assert_eq!(context.run_stats_change_event_timeout, Duration::from_millis(1500));
        assert!(!context.keep_alive);
        assert!(context.is_debug);
        assert_eq!(context.test_case_filter.as_deref(), Some("Category=Fast"));
    }

    proptest! {
        #[test]
        fn update_points_every_test_at_the_new_source(
            names in proptest::collection::vec("[A-Z][a-z]{0,6}", 1..8),
            target in "[a-z]{1,8}\\.dll",
        ) {
            let tests = names.iter().map(|n| test_case(n, "package.appxrecipe")).collect();
            let mut criteria = TestRunCriteria::with_tests(tests, 10).unwrap();

            criteria.update_test_case_sources(&target);

            let tests = criteria.tests().unwrap();
            prop_assert_eq!(tests.len(), names.len());
            prop_assert!(tests.iter().all(|t| t.source == target));
            prop_assert_eq!(criteria.sources(), vec![target.clone()]);
        }
    }
}
