pub mod config;
pub mod criteria;
pub mod error;
pub mod events;
pub mod host;
pub mod logging;
pub mod metrics;
pub mod plugins;
pub mod proxy;
pub mod sender;
pub mod shutdown;

pub use error::{ProxyError, Result};
pub use proxy::ProxyExecutionManager;
