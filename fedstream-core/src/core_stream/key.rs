//! Ordering key generation
//!
//! Keys are `(micros, seq)`: the wall clock in microseconds, never
//! allowed to step backwards, and a process-wide counter that breaks
//! timestamp collisions. No lock is taken.
//!
//! A fresh generator starts from zero; `advance_past` lifts it above the
//! newest key already in a durable log so a restarted process (or a clock
//! that moved back) cannot hand out a smaller or duplicate key.

use crate::core_model::OrderingKey;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct OrderingKeyGenerator {
    last_micros: AtomicU64,
    seq: AtomicU64,
}

impl OrderingKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next key. Keys handed out by one generator are unique, and a key
    /// obtained after another call returned is strictly greater.
    pub fn next_key(&self) -> OrderingKey {
        let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0);
        let previous = self.last_micros.fetch_max(now, Ordering::SeqCst);
        let micros = previous.max(now);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        OrderingKey::new(micros, seq)
    }

    /// Ensure every later key is strictly greater than `key`
    pub fn advance_past(&self, key: OrderingKey) {
        self.last_micros.fetch_max(key.micros, Ordering::SeqCst);
        self.seq.fetch_max(key.seq.saturating_add(1), Ordering::SeqCst);
    }
}
