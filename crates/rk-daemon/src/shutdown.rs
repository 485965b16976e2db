use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

/// Shared stop flag for the daemon.
///
/// Backed by a `watch` channel holding `true` once stop was requested, so a
/// [`wait`](Self::wait) that starts after [`trigger`](Self::trigger) still
/// returns at once. Clones share the flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    stopped: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            stopped: Arc::new(stopped),
        }
    }

    /// Request shutdown. Later calls are no-ops.
    pub fn trigger(&self) {
        let first = self
            .stopped
            .send_if_modified(|stopped| !std::mem::replace(stopped, true));
        if first {
            info!("shutdown requested");
        } else {
            debug!("shutdown already requested");
        }
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.stopped.subscribe();
        // The sender lives in `self`, so this only returns once the flag is set.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
