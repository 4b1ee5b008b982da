pub mod manager;
pub mod state;

pub use manager::ProxyExecutionManager;
pub use state::{LaunchWatcher, SessionPhase, SessionState};
