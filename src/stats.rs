use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::proxy::{ForwardMode, RelayStats};

/// Snapshot of process-wide proxy counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyStats {
    /// Total number of accepted sessions
    pub total_connections: u64,
    /// Currently active sessions
    pub active_connections: u64,
    /// Sessions that ended in a parse or dial failure
    pub failed_connections: u64,
    /// Sessions forwarded in reversed-VPN mode
    pub vpn_connections: u64,
    /// Total bytes relayed from clients to targets
    pub bytes_from_clients: u64,
    /// Total bytes relayed from targets to clients
    pub bytes_to_clients: u64,
    /// Timestamp when the tracker was created (Unix timestamp)
    pub start_time: u64,
}

/// Statistics tracker shared by all sessions
#[derive(Debug, Clone)]
pub struct StatsTracker {
    total_connections: Arc<AtomicU64>,
    active_connections: Arc<AtomicU64>,
    failed_connections: Arc<AtomicU64>,
    vpn_connections: Arc<AtomicU64>,
    bytes_from_clients: Arc<AtomicU64>,
    bytes_to_clients: Arc<AtomicU64>,
    start_time: u64,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            total_connections: Arc::new(AtomicU64::new(0)),
            active_connections: Arc::new(AtomicU64::new(0)),
            failed_connections: Arc::new(AtomicU64::new(0)),
            vpn_connections: Arc::new(AtomicU64::new(0)),
            bytes_from_clients: Arc::new(AtomicU64::new(0)),
            bytes_to_clients: Arc::new(AtomicU64::new(0)),
            start_time: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }

    /// Called when a session starts
    pub fn connection_started(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Called when a session relayed to completion
    pub fn connection_closed(&self, mode: ForwardMode, stats: &RelayStats) {
        if mode == ForwardMode::Vpn {
            self.vpn_connections.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_from_clients
            .fetch_add(stats.bytes_from_client, Ordering::Relaxed);
        self.bytes_to_clients
            .fetch_add(stats.bytes_to_client, Ordering::Relaxed);
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Called when a session failed before relaying
    pub fn connection_failed(&self) {
        self.failed_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get current snapshot of stats
    pub fn snapshot(&self) -> ProxyStats {
        ProxyStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
            vpn_connections: self.vpn_connections.load(Ordering::Relaxed),
            bytes_from_clients: self.bytes_from_clients.load(Ordering::Relaxed),
            bytes_to_clients: self.bytes_to_clients.load(Ordering::Relaxed),
            start_time: self.start_time,
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}
