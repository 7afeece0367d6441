//! Periodic forced-update timer.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Smallest accepted periodic interval. Anything below this adds nothing
/// over the seek and content-change triggers.
pub const MIN_PERIODIC_INTERVAL_SECS: u64 = 15;

const COUNTDOWN_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Tracks when a periodic forced re-push is due. The variant is fixed at
/// construction: with periodic updates off, `tick` and
/// `should_force_update` cost nothing.
#[derive(Debug)]
pub enum UpdateTimer {
    Disabled,
    Enabled {
        interval: Duration,
        last_forced: Instant,
        due: bool,
        last_log: Option<Instant>,
    },
}

impl UpdateTimer {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    /// Build from the configured interval in seconds. `0` disables periodic
    /// updates; sub-minimum values warn and disable.
    pub fn from_secs(secs: u64) -> Self {
        match secs {
            0 => Self::Disabled,
            s if s < MIN_PERIODIC_INTERVAL_SECS => {
                warn!(
                    requested = s,
                    minimum = MIN_PERIODIC_INTERVAL_SECS,
                    "Periodic update interval too small, disabling periodic updates"
                );
                Self::Disabled
            }
            s => Self::Enabled {
                interval: Duration::from_secs(s),
                last_forced: Instant::now(),
                due: false,
                last_log: None,
            },
        }
    }

    /// Advance the clock. Called once per reconciliation iteration; the
    /// expiry it detects is consumed through [`Self::should_force_update`]
    /// and armed again on the next call.
    pub fn tick(&mut self) {
        let Self::Enabled {
            interval,
            last_forced,
            due,
            last_log,
        } = self
        else {
            return;
        };

        let now = Instant::now();
        let remaining = interval.saturating_sub(now.duration_since(*last_forced));
        *due = remaining == Duration::ZERO;

        if *due {
            debug!("Periodic interval reached, resetting the timer");
            *last_forced = now;
        } else if last_log.is_none_or(|t| now.duration_since(t) >= COUNTDOWN_LOG_INTERVAL) {
            debug!(
                seconds = remaining.as_secs(),
                "Time until the next periodic forced update"
            );
            *last_log = Some(now);
        }
    }

    pub fn should_force_update(&self) -> bool {
        matches!(self, Self::Enabled { due: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewind(timer: &mut UpdateTimer, by: Duration) {
        if let UpdateTimer::Enabled { last_forced, .. } = timer {
            *last_forced -= by;
        }
    }

    #[test]
    fn test_zero_interval_disables() {
        let mut timer = UpdateTimer::from_secs(0);
        timer.tick();
        assert!(!timer.should_force_update());
        assert!(matches!(timer, UpdateTimer::Disabled));
    }

    #[test]
    fn test_sub_minimum_interval_disables() {
        let timer = UpdateTimer::from_secs(5);
        assert!(matches!(timer, UpdateTimer::Disabled));
    }

    #[test]
    fn test_not_due_before_interval() {
        let mut timer = UpdateTimer::from_secs(15);
        timer.tick();
        assert!(!timer.should_force_update());
    }

    #[test]
    fn test_due_exactly_once_per_interval() {
        let mut timer = UpdateTimer::from_secs(15);

        rewind(&mut timer, Duration::from_secs(16));
        timer.tick();
        assert!(timer.should_force_update());

        // the expiring tick reset the clock
        timer.tick();
        assert!(!timer.should_force_update());
    }

    #[test]
    fn test_rearms_after_next_interval() {
        let mut timer = UpdateTimer::from_secs(15);

        rewind(&mut timer, Duration::from_secs(16));
        timer.tick();
        assert!(timer.should_force_update());
        timer.tick();
        assert!(!timer.should_force_update());

        rewind(&mut timer, Duration::from_secs(16));
        timer.tick();
        assert!(timer.should_force_update());
    }
}
