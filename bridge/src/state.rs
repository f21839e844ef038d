use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

use crate::settings::{BridgeSettings, Direction};

/// Bridge counters. Updated from handler and listener tasks concurrently.
#[derive(Debug, Default)]
pub struct BridgeStats {
    forwarded_out: AtomicU64,
    forwarded_in: AtomicU64,
    errors_out: AtomicU64,
    errors_in: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStatsSnapshot {
    /// Local envelopes published to the broker.
    pub forwarded_out: u64,
    /// Broker messages republished on the local bus.
    pub forwarded_in: u64,
    pub errors_out: u64,
    pub errors_in: u64,
}

impl BridgeStatsSnapshot {
    pub fn total_errors(&self) -> u64 {
        self.errors_out + self.errors_in
    }
}

impl BridgeStats {
    pub fn record_forwarded_out(&self) {
        self.forwarded_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded_in(&self) {
        self.forwarded_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error_out(&self) {
        self.errors_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error_in(&self) {
        self.errors_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            forwarded_out: self.forwarded_out.load(Ordering::Relaxed),
            forwarded_in: self.forwarded_in.load(Ordering::Relaxed),
            errors_out: self.errors_out.load(Ordering::Relaxed),
            errors_in: self.errors_in.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.forwarded_out.store(0, Ordering::Relaxed);
        self.forwarded_in.store(0, Ordering::Relaxed);
        self.errors_out.store(0, Ordering::Relaxed);
        self.errors_in.store(0, Ordering::Relaxed);
    }
}

/// State shared by the coordinator, the forwarder handlers and the listen
/// loops. Settings are fixed at construction; direction flags and counters
/// change at runtime.
#[derive(Debug)]
pub struct BridgeState {
    settings: BridgeSettings,
    outbound: AtomicBool,
    inbound: AtomicBool,
    stats: BridgeStats,
}

impl BridgeState {
    pub fn new(settings: BridgeSettings) -> Self {
        Self {
            outbound: AtomicBool::new(settings.outbound_enabled),
            inbound: AtomicBool::new(settings.inbound_enabled),
            settings,
            stats: BridgeStats::default(),
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn instance_id(&self) -> &str {
        &self.settings.instance_id
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn outbound_enabled(&self) -> bool {
        self.outbound.load(Ordering::SeqCst)
    }

    pub fn inbound_enabled(&self) -> bool {
        self.inbound.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, direction: Direction, enabled: bool) {
        if direction.includes_outbound() {
            self.outbound.store(enabled, Ordering::SeqCst);
        }
        if direction.includes_inbound() {
            self.inbound.store(enabled, Ordering::SeqCst);
        }
    }

    pub fn is_enabled(&self, direction: Direction) -> bool {
        match direction {
            Direction::Outbound => self.outbound_enabled(),
            Direction::Inbound => self.inbound_enabled(),
            Direction::Both => self.outbound_enabled() && self.inbound_enabled(),
        }
    }
}
