//! Busy-wait policy for hardware status bits
//!
//! Every handshake in this crate is a loop re-reading a status register.
//! On real hardware these loops are unbounded: a peripheral that never
//! reaches the expected state hangs the caller. [`PollPolicy`] keeps that
//! default but lets a caller (or a test) bound the number of checks and
//! pace them with a sleep.

use std::time::Duration;

/// Bound and pacing for a status poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollPolicy {
    /// Maximum number of checks; `None` polls forever
    pub limit: Option<u32>,
    /// Sleep between checks; zero spins with a CPU hint
    pub interval: Duration,
}

/// A bounded poll ran out before the condition held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Exhausted;

impl PollPolicy {
    /// Poll forever without sleeping
    pub const UNBOUNDED: Self = Self {
        limit: None,
        interval: Duration::ZERO,
    };

    /// Give up after `limit` checks
    pub const fn bounded(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            interval: Duration::ZERO,
        }
    }

    /// Same bound, sleeping `interval` between checks
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Re-evaluate `ready` until it returns true or the bound is used up
    ///
    /// `ready` is checked at least once, so a zero bound still succeeds on
    /// an already-set bit.
    pub fn wait_until(&self, mut ready: impl FnMut() -> bool) -> Result<(), Exhausted> {
        let mut checks: u32 = 0;
        loop {
            if ready() {
                return Ok(());
            }
            checks = checks.saturating_add(1);
            if let Some(limit) = self.limit {
                if checks >= limit {
                    return Err(Exhausted);
                }
            }
            self.pause();
        }
    }

    fn pause(&self) {
        if self.interval.is_zero() {
            std::hint::spin_loop();
        } else {
            std::thread::sleep(self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_poll_gives_up() {
        let mut calls = 0;
        let result = PollPolicy::bounded(5).wait_until(|| {
            calls += 1;
            false
        });
        assert_eq!(result, Err(Exhausted));
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_condition_met_mid_poll() {
        let mut calls = 0;
        let result = PollPolicy::bounded(10).wait_until(|| {
            calls += 1;
            calls == 3
        });
        assert_eq!(result, Ok(()));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_ready_checked_before_bound() {
        assert_eq!(PollPolicy::bounded(0).wait_until(|| true), Ok(()));
        assert_eq!(PollPolicy::bounded(0).wait_until(|| false), Err(Exhausted));
    }

    #[test]
    fn test_unbounded_eventually_ready() {
        let mut calls = 0u32;
        PollPolicy::UNBOUNDED
            .wait_until(|| {
                calls += 1;
                calls > 1000
            })
            .unwrap();
        assert_eq!(calls, 1001);
    }

    #[test]
    fn test_interval_sleeps() {
        let policy = PollPolicy::bounded(3).with_interval(Duration::from_millis(1));
        let start = std::time::Instant::now();
        assert!(policy.wait_until(|| false).is_err());
        // Two pauses: none after the final check
        assert!(start.elapsed() >= Duration::from_millis(2));
    }
}
