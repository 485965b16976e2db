use std::collections::BTreeMap;

use dashmap::DashMap;
use rk_core::config::{HostKeyPolicy, SecurityConfig};
use tracing::{info, warn};

/// Decides whether a server's host key is acceptable.
///
/// Fingerprints are compared as opaque strings (`SHA256:<base64>`). Pinned
/// entries from configuration apply under every policy except `accept_any`.
/// Keys learned under trust-on-first-use live for the process lifetime.
#[derive(Debug)]
pub struct HostKeyVerifier {
    policy: HostKeyPolicy,
    pinned: BTreeMap<String, Vec<String>>,
    learned: DashMap<String, String>,
}

impl HostKeyVerifier {
    pub fn new(policy: HostKeyPolicy, pinned: BTreeMap<String, Vec<String>>) -> Self {
        if policy == HostKeyPolicy::AcceptAny {
            warn!("host key verification disabled (host_key_policy = accept_any)");
        }
        Self {
            policy,
            pinned,
            learned: DashMap::new(),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(config.host_key_policy, config.known_hosts.clone())
    }

    /// Check `fingerprint` presented by `addr` (`host:port`).
    pub fn verify(&self, addr: &str, fingerprint: &str) -> bool {
        if self.policy == HostKeyPolicy::AcceptAny {
            return true;
        }

        if let Some(allowed) = self.pinned.get(addr) {
            let ok = allowed.iter().any(|p| p == fingerprint);
            if !ok {
                warn!(addr, fingerprint, "host key does not match pinned fingerprint");
            }
            return ok;
        }

        match self.policy {
            HostKeyPolicy::Pinned => {
                warn!(addr, fingerprint, "no pinned fingerprint for host");
                false
            }
            HostKeyPolicy::TrustOnFirstUse => {
                let entry = self
                    .learned
                    .entry(addr.to_string())
                    .or_insert_with(|| {
                        info!(addr, fingerprint, "learned host key on first use");
                        fingerprint.to_string()
                    });
                let ok = entry.value() == fingerprint;
                if !ok {
                    warn!(
                        addr,
                        expected = entry.value().as_str(),
                        presented = fingerprint,
                        "host key changed since first use"
                    );
                }
                ok
            }
            HostKeyPolicy::AcceptAny => true,
        }
    }
}
