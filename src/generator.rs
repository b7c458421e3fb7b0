//! Source token for self-driving pipeline heads.

use std::thread;
use std::time::Instant;

/// Zero-content marker consumed by source filters.
///
/// A pipe carrying `Generator` is an infinite spring: every pop synthesises
/// a fresh token instead of waiting for an upstream push, so a stage whose
/// input is `Generator` produces as fast as its downstream drains it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Generator;

impl Generator {
    /// Block the calling thread until `deadline`, then hand out a token.
    ///
    /// A pacing primitive for source filters: call it at the top of
    /// `process` with `now + period` to cap the stage's output rate.
    pub fn finish_at(deadline: Instant) -> Self {
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        Generator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn finish_at_waits_for_the_deadline() {
        let start = Instant::now();
        Generator::finish_at(start + Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn finish_at_with_a_past_deadline_returns_at_once() {
        let start = Instant::now();
        Generator::finish_at(start - Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(20));
    }
}
