//! Pooled SSH sessions and the remote operations built on them.
//!
//! [`pool::SessionPool`] owns one live session per target identity.
//! [`executor::CommandExecutor`] runs commands over it and
//! [`retriever::FileRetriever`] pulls files through an SFTP sub-session on
//! the same connection. The wire is reached through the traits in
//! [`transport`], implemented by [`ssh`] for real devices and by
//! [`simulated`] for offline runs.

pub mod error;
pub mod executor;
pub mod host_keys;
pub mod pool;
pub mod retriever;
pub mod simulated;
pub mod ssh;
pub mod transport;

pub use error::{SessionError, TransferStage, TransportError};
pub use executor::CommandExecutor;
pub use pool::{Lease, SessionPool};
pub use retriever::FileRetriever;

use std::sync::Arc;

use rk_core::config::{SecurityConfig, TransportConfig, TransportMode};

/// Build the connector selected by `[transport] mode`.
pub fn connector_for(
    transport: &TransportConfig,
    security: &SecurityConfig,
) -> Arc<dyn transport::Connector> {
    match transport.mode {
        TransportMode::Ssh => {
            let verifier = Arc::new(host_keys::HostKeyVerifier::from_config(security));
            Arc::new(ssh::SshConnector::from_config(transport, verifier))
        }
        TransportMode::Simulated => {
            tracing::warn!("simulated transport selected, no device will be contacted");
            Arc::new(simulated::SimulatedConnector::new())
        }
    }
}
