//! Ctrl-C / SIGTERM handling.
//!
//! Interrupting the process cancels a shared `CancellationToken`. The
//! loopback redirect listener watches it, so pressing Ctrl-C during a
//! login resolves the flow as a cancellation instead of killing the
//! process mid-write.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct SignalHandler {
    token: CancellationToken,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A clone of the shutdown token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled together with the shutdown token, which can also
    /// be cancelled on its own (one login attempt, for example).
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Wait for SIGINT or SIGTERM, then cancel the token.
    pub async fn listen(&self) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT, cancelling");
            }
            _ = Self::sigterm() => {
                tracing::info!("Received SIGTERM, cancelling");
            }
            _ = self.token.cancelled() => return,
        }
        self.token.cancel();
    }

    /// Run [`Self::listen`] on a background task.
    pub fn spawn(self) -> (CancellationToken, JoinHandle<()>) {
        let token = self.token();
        let handle = tokio::spawn(async move { self.listen().await });
        (token, handle)
    }

    #[cfg(unix)]
    async fn sigterm() {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    async fn sigterm() {
        std::future::pending::<()>().await;
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
