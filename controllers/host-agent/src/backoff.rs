//! Bounded exponential backoff for failed host reconciles.
//!
//! Sequence with the agent defaults: 2s, 4s, 8s, ... capped at 5m.

use std::time::Duration;

pub const MIN_BACKOFF_SECS: u64 = 2;
pub const MAX_BACKOFF_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min_secs: u64,
    current_secs: u64,
    max_secs: u64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(MIN_BACKOFF_SECS, MAX_BACKOFF_SECS)
    }
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs,
            current_secs: min_secs,
            max_secs,
        }
    }

    /// Current delay; doubles the next one up to the cap.
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_secs;
        self.current_secs = self.current_secs.saturating_mul(2).min(self.max_secs);
        Duration::from_secs(result)
    }

    pub fn reset(&mut self) {
        self.current_secs = self.min_secs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_capped() {
        let mut backoff = ExponentialBackoff::new(60, 300);
        let seq: Vec<u64> = (0..5).map(|_| backoff.next_backoff().as_secs()).collect();
        assert_eq!(seq, vec![60, 120, 240, 300, 300]);
    }

    #[test]
    fn test_reset() {
        let mut backoff = ExponentialBackoff::default();
        backoff.next_backoff();
        backoff.next_backoff();
        assert_eq!(backoff.next_backoff(), Duration::from_secs(8));
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
    }
}
