use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Source of correlation ids for outbound requests. Ids must be distinct for
/// the life of the process.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> u64;
}

/// Monotonic counter.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Seeded from the wall clock in milliseconds since the epoch.
    pub fn clock_seeded() -> Self {
        let seed = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(1);
        Self::starting_at(seed)
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
