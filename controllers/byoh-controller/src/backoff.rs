//! # Fibonacci Backoff
//!
//! Per-object retry delays for transient reconcile failures. The sequence
//! grows more slowly than exponential backoff so a host that is still coming
//! up is polled often at first without hammering the API server later.
//!
//! Sequence with the manager defaults: 5s, 5s, 10s, 15s, 25s, 40s, ... capped at 5m.

/// Shortest delay in seconds
pub const MIN_BACKOFF_SECS: u64 = 5;

/// Longest delay in seconds
pub const MAX_BACKOFF_SECS: u64 = 300;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max_secs`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    prev_secs: u64,
    current_secs: u64,
    max_secs: u64,
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(MIN_BACKOFF_SECS, MAX_BACKOFF_SECS)
    }
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min_secs` (used for the first two delays)
    /// and capped at `max_secs`.
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            prev_secs: 0,
            current_secs: min_secs,
            max_secs,
        }
    }

    /// Current delay in seconds; advances the sequence.
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_secs;
        let next = self.prev_secs + self.current_secs;
        self.prev_secs = self.current_secs;
        self.current_secs = std::cmp::min(next, self.max_secs);
        result
    }
}
