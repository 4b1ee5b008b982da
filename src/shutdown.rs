use std::future::Future;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::proxy::ProxyExecutionManager;

/// Install a handler that cancels the proxy's test run on SIGTERM or SIGINT.
///
/// Returns a `CancellationToken` that is cancelled once the interrupt has
/// been forwarded, so the caller can close the session afterwards.
pub fn install_interrupt_handler(proxy: Arc<ProxyExecutionManager>) -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        forward_interrupt(proxy, wait_for_interrupt(), token_clone).await;
    });

    token
}

/// Wait for `interrupt`, then cancel the proxy's run and `token`.
pub async fn forward_interrupt<F>(proxy: Arc<ProxyExecutionManager>, interrupt: F, token: CancellationToken)
where
    F: Future<Output = ()>,
{
    interrupt.await;
    proxy.cancel().await;
    token.cancel();
}

async fn wait_for_interrupt() {
    let sigterm = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    let sigint = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = sigterm => {
            tracing::info!("Received SIGTERM, cancelling test run");
        }
        _ = sigint => {
            tracing::info!("Received SIGINT, cancelling test run");
        }
    }
}
