use std::collections::HashSet;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Where a proxy session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    Connected,
    Running,
    Aborted,
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Connecting => write!(f, "connecting"),
            SessionPhase::Connected => write!(f, "connected"),
            SessionPhase::Running => write!(f, "running"),
            SessionPhase::Aborted => write!(f, "aborted"),
            SessionPhase::Closed => write!(f, "closed"),
        }
    }
}

/// Mutable state of one proxy session.
///
/// `host_launched` only ever goes from false to true. `is_connected` tracks
/// the outcome of the most recent handshake.
#[derive(Debug, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub is_connected: bool,
    host_launched: bool,
    initialized_extensions: HashSet<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host_launched(&self) -> bool {
        self.host_launched
    }

    /// Record that a test host process exists.
    pub fn mark_host_launched(&mut self, process_id: Option<u32>) {
        if !self.host_launched {
            tracing::debug!(pid = ?process_id, "Test host launch observed");
        }
        self.host_launched = true;
    }

    /// Drop the extensions a shared host was already initialized with.
    pub fn pending_extensions(&self, extensions: Vec<String>) -> Vec<String> {
        extensions
            .into_iter()
            .filter(|e| !self.initialized_extensions.contains(e))
            .collect()
    }

    pub fn record_initialized_extensions(&mut self, extensions: impl IntoIterator<Item = String>) {
        self.initialized_extensions.extend(extensions);
    }

    /// Forget delivered extensions. A freshly launched host has none.
    pub fn reset_initialized_extensions(&mut self) {
        self.initialized_extensions.clear();
    }

    /// Mark the session ended. The host is disconnected but `host_launched`
    /// is kept.
    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
        self.is_connected = false;
    }
}

/// Task waiting on a launch notification that arrived after the launch call.
///
/// Lives outside [`SessionState`]; stopping it never takes the state lock.
#[derive(Debug, Default)]
pub struct LaunchWatcher {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LaunchWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `watcher`, aborting any previous one.
    pub fn replace(&self, watcher: JoinHandle<()>) {
        if let Some(previous) = self.handle.lock().replace(watcher) {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(watcher) = self.handle.lock().take() {
            watcher.abort();
        }
    }
}
