//! Tunnel identity and lifetime tracking.
//!
//! # Responsibilities
//! - Generate unique tunnel IDs for tracing
//! - Count open tunnels so shutdown can wait for teardown
//! - Keep the `gateway_tunnels_active` gauge in step with the count

use std::time::Duration;

use tokio_util::task::{task_tracker::TaskTrackerToken, TaskTracker};
use uuid::Uuid;

use crate::observability::metrics;

/// Unique identifier for a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelId(Uuid);

impl TunnelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TunnelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TunnelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tunnel-{}", self.0)
    }
}

/// Counts tunnels that have not finished teardown, from the moment the
/// client upgrade completes (backend dial included).
#[derive(Debug, Clone, Default)]
pub struct TunnelTracker {
    tasks: TaskTracker,
}

impl TunnelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new tunnel. Returns a guard that releases it on drop.
    pub fn track(&self) -> TunnelGuard {
        metrics::tunnel_opened();
        TunnelGuard {
            _token: self.tasks.token(),
            id: TunnelId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.tasks.len() as u64
    }

    /// Stop expecting new tunnels and wait until every tracked one is gone.
    /// Returns `false` if `limit` elapsed first.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        self.tasks.close();
        tokio::time::timeout(limit, self.tasks.wait()).await.is_ok()
    }
}

/// Holds a tunnel's slot in the tracker for as long as the tunnel lives.
#[derive(Debug)]
pub struct TunnelGuard {
    _token: TaskTrackerToken,
    id: TunnelId,
}

impl TunnelGuard {
    pub fn id(&self) -> TunnelId {
        self.id
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        metrics::tunnel_closed();
        tracing::trace!(tunnel_id = %self.id, "Tunnel released");
    }
}
