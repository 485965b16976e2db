use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rk_core::types::{Target, TargetKey};
use rk_telemetry::metrics::{global_metrics, POOL_DIALS_TOTAL, POOL_SESSIONS};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::{Connector, RemoteSession};

struct Pooled {
    serial: u64,
    session: Arc<dyn RemoteSession>,
}

/// One target's session, or `None` between dials.
type Slot = Arc<Mutex<Option<Pooled>>>;

/// A caller's handle to a pooled session.
///
/// The serial identifies which dial produced the session, so an eviction
/// triggered by an old lease never removes a newer replacement.
#[derive(Clone)]
pub struct Lease {
    key: TargetKey,
    serial: u64,
    session: Arc<dyn RemoteSession>,
}

impl Lease {
    pub fn session(&self) -> &Arc<dyn RemoteSession> {
        &self.session
    }

    pub fn key(&self) -> &TargetKey {
        &self.key
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("serial", &self.serial)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SessionPool
// ---------------------------------------------------------------------------

/// Keeps at most one live session per target identity.
///
/// Each target has its own slot behind an async mutex, held across the
/// liveness probe and any dial. Concurrent `acquire` calls for the same
/// target wait for one dial; a slow dial to one target never blocks another.
/// Sessions stay open between calls until they fail a probe, are evicted, or
/// the pool is closed.
pub struct SessionPool {
    connector: Arc<dyn Connector>,
    slots: DashMap<TargetKey, Slot>,
    live: AtomicUsize,
    next_serial: AtomicU64,
}

impl SessionPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            slots: DashMap::new(),
            live: AtomicUsize::new(0),
            next_serial: AtomicU64::new(1),
        }
    }

    fn slot(&self, key: &TargetKey) -> Slot {
        self.slots.entry(key.clone()).or_default().clone()
    }

    /// Snapshot of every slot; the map is not locked while the caller awaits.
    fn all_slots(&self) -> Vec<(TargetKey, Slot)> {
        self.slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn forget(&self) {
        let live = self.live.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        global_metrics().set_gauge(POOL_SESSIONS, live as i64);
    }

    /// Return a live session for `target`, dialing if needed.
    pub async fn acquire(&self, target: &Target) -> Result<Lease, TransportError> {
        let key = target.key();
        let slot = self.slot(&key);
        let mut guard = slot.lock().await;

        if let Some(pooled) = guard.as_ref() {
            if pooled.session.probe().await {
                debug!(peer = %key, serial = pooled.serial, "reusing pooled session");
                return Ok(Lease {
                    key,
                    serial: pooled.serial,
                    session: pooled.session.clone(),
                });
            }
        }
        if let Some(stale) = guard.take() {
            warn!(peer = %key, serial = stale.serial, "pooled session failed health check, redialing");
            stale.session.close().await;
            self.forget();
        }

        let session = self.connector.connect(target).await?;
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        global_metrics().increment_counter(POOL_DIALS_TOTAL, &[]);

        *guard = Some(Pooled {
            serial,
            session: session.clone(),
        });
        let live = self.live.fetch_add(1, Ordering::Relaxed) + 1;
        global_metrics().set_gauge(POOL_SESSIONS, live as i64);
        info!(peer = %key, serial, "session added to pool");

        Ok(Lease {
            key,
            serial,
            session,
        })
    }

    /// Drop the lease's session from the pool if it is still the pooled one.
    pub async fn evict(&self, lease: &Lease) -> bool {
        let Some(slot) = self.slots.get(&lease.key).map(|s| s.value().clone()) else {
            return false;
        };
        let mut guard = slot.lock().await;
        if !guard.as_ref().is_some_and(|p| p.serial == lease.serial) {
            return false;
        }
        if let Some(evicted) = guard.take() {
            warn!(peer = %lease.key, serial = evicted.serial, "evicting session");
            evicted.session.close().await;
            self.forget();
        }
        true
    }

    /// Probe every idle pooled session and drop the dead ones. Slots busy
    /// with an acquire are skipped. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut removed = 0;
        for (key, slot) in self.all_slots() {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let dead = match guard.as_ref() {
                Some(pooled) => !pooled.session.probe().await,
                None => false,
            };
            if !dead {
                continue;
            }
            if let Some(stale) = guard.take() {
                info!(peer = %key, serial = stale.serial, "sweep removed dead session");
                stale.session.close().await;
                self.forget();
                removed += 1;
            }
        }
        removed
    }

    /// Disconnect and forget every session.
    pub async fn close_all(&self) {
        let mut count = 0;
        for (_, slot) in self.all_slots() {
            if let Some(pooled) = slot.lock().await.take() {
                pooled.session.close().await;
                self.forget();
                count += 1;
            }
        }
        info!(count, "closed all pooled sessions");
    }

    /// Sessions currently pooled.
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
