//! Usage counters for the agent pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use vox_core::Capability;

/// Monotonic counters owned by one pipeline.
#[derive(Debug, Default)]
pub struct UsageStats {
    queries: AtomicU64,
    web_searches: AtomicU64,
    calculations: AtomicU64,
    date_time_lookups: AtomicU64,
    calls_avoided: AtomicU64,
}

/// Point-in-time copy of [`UsageStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub queries: u64,
    pub web_searches: u64,
    pub calculations: u64,
    pub date_time_lookups: u64,
    /// Estimated model calls saved by local classification.
    pub calls_avoided: u64,
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool(&self, capability: Capability) {
        let counter = match capability {
            Capability::WebSearch => &self.web_searches,
            Capability::Calculation => &self.calculations,
            Capability::DateTime => &self.date_time_lookups,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_call_avoided(&self) {
        self.calls_avoided.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            web_searches: self.web_searches.load(Ordering::Relaxed),
            calculations: self.calculations.load(Ordering::Relaxed),
            date_time_lookups: self.date_time_lookups.load(Ordering::Relaxed),
            calls_avoided: self.calls_avoided.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.queries,
            &self.web_searches,
            &self.calculations,
            &self.date_time_lookups,
            &self.calls_avoided,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
