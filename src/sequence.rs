//! Process-wide-unique subscription ids (spec §4.1).
//!
//! Per the "global sequence generator" design note in spec §9, this is
//! constructor-injected rather than a process-wide static: one [`Sequence`]
//! lives inside the [`crate::manager::SubscriptionManager`] and is cloned
//! (it's just an `Arc<AtomicU64>`) into every subscription constructor.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub type SubscriptionId = u64;

#[derive(Debug, Clone, Default)]
pub struct Sequence(Arc<AtomicU64>);

impl Sequence {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    /// Returns the next id, starting at 0, strictly increasing, never
    /// repeating for the lifetime of this `Sequence`.
    pub fn next(&self) -> SubscriptionId {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}
