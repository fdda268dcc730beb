//! Query time windows, including the one-shot historical walk.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

/// Half-open `[start, end)` interval of a `GetMetricData` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: SystemTime,
    pub end: SystemTime,
}

impl TimeWindow {
    /// The live window: it ends `delay` before `now` and spans one `period`.
    ///
    /// Only on platforms that cannot represent the result does the window
    /// collapse onto `now`.
    pub fn base(period: Duration, delay: Duration, now: SystemTime) -> Self {
        let end = now.checked_sub(delay).unwrap_or(now);
        let start = end.checked_sub(period).unwrap_or(end);
        Self { start, end }
    }

    /// Length of the window.
    pub fn length(&self) -> Duration {
        self.end.duration_since(self.start).unwrap_or_default()
    }
}

/// Resolves windows for successive batches.
///
/// With a walk duration configured, every call moves the window one more
/// step of `period` forward. The first time the window end reaches
/// `now - walk` the walk ends for good and later calls return the base
/// window.
#[derive(Debug, Clone)]
pub struct WindowResolver {
    walk: Option<Duration>,
    step: u32,
}

impl WindowResolver {
    /// A zero `walk` disables walking.
    pub fn new(walk: Duration) -> Self {
        Self {
            walk: (!walk.is_zero()).then_some(walk),
            step: 0,
        }
    }

    /// Whether the walk is still in progress.
    pub fn is_walking(&self) -> bool {
        self.walk.is_some()
    }

    /// Number of walk steps taken so far.
    pub fn step(&self) -> u32 {
        self.step
    }

    /// Compute the window for the next batch.
    pub fn resolve(&mut self, period: Duration, delay: Duration, now: SystemTime) -> TimeWindow {
        let mut window = TimeWindow::base(period, delay, now);

        let Some(walk) = self.walk else {
            return window;
        };

        self.step = self.step.saturating_add(1);
        let advance = period.saturating_mul(self.step);
        let end = window.end.checked_add(advance).unwrap_or(window.end);
        let target = now.checked_sub(walk).unwrap_or(UNIX_EPOCH);

        if end >= target {
            self.walk = None;
            window.end = end.checked_sub(period).unwrap_or(window.start);
            info!(steps = self.step, "walk reached its target lag, switching to live windows");
        } else {
            window.end = end;
            window.start = window.start.checked_add(advance).unwrap_or(window.start);
        }

        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_secs(60);

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn test_base_window() {
        let mut resolver = WindowResolver::new(Duration::ZERO);
        let delay = Duration::from_secs(600);

        for _ in 0..3 {
            let window = resolver.resolve(PERIOD, delay, now());
            assert_eq!(window.length(), PERIOD);
            assert_eq!(window.end, now() - delay);
        }
        assert!(!resolver.is_walking());
        assert_eq!(resolver.step(), 0);
    }

    #[test]
    fn test_walk_advances_until_target() {
        // Start a day back and walk until the window is within 10 minutes of now.
        let delay = Duration::from_secs(86_400);
        let walk = Duration::from_secs(600);
        let mut resolver = WindowResolver::new(walk);
        let base = TimeWindow::base(PERIOD, delay, now());

        let first = resolver.resolve(PERIOD, delay, now());
        assert_eq!(first.end, base.end + PERIOD);
        assert_eq!(first.start, base.start + PERIOD);
        assert_eq!(first.length(), PERIOD);

        let second = resolver.resolve(PERIOD, delay, now());
        assert_eq!(second.end, base.end + PERIOD * 2);
        assert_eq!(second.start, base.start + PERIOD * 2);
        assert!(second.end > first.end);
        assert!(resolver.is_walking());
    }

    #[test]
    fn test_walk_ends_exactly_once() {
        let delay = Duration::from_secs(3_600);
        let walk = Duration::from_secs(600);
        let mut resolver = WindowResolver::new(walk);
        let target = now() - walk;

        let mut last_end = UNIX_EPOCH;
        let mut exhausted_at = None;
        for call in 0..100 {
            let was_walking = resolver.is_walking();
            let window = resolver.resolve(PERIOD, delay, now());
            if was_walking {
                assert!(window.end >= last_end);
                last_end = window.end;
                if !resolver.is_walking() {
                    assert!(exhausted_at.is_none());
                    exhausted_at = Some(call);
                    // pulled back by one period from the advanced end
                    assert!(window.end + PERIOD >= target);
                } else {
                    assert!(window.end < target);
                }
            } else {
                assert_eq!(window, TimeWindow::base(PERIOD, delay, now()));
            }
        }

        assert!(exhausted_at.is_some());
        assert!(!resolver.is_walking());
    }

    #[test]
    fn test_walk_shorter_than_delay_ends_immediately() {
        let delay = Duration::from_secs(600);
        let mut resolver = WindowResolver::new(Duration::from_secs(3_600));

        let window = resolver.resolve(PERIOD, delay, now());
        assert!(!resolver.is_walking());
        // advanced by one step then pulled back by one period
        assert_eq!(window.end, now() - delay);
        assert_eq!(window.start, now() - delay - PERIOD);

        let next = resolver.resolve(PERIOD, delay, now());
        assert_eq!(next, TimeWindow::base(PERIOD, delay, now()));
    }

    #[test]
    fn test_base_window_near_epoch() {
        let now = UNIX_EPOCH + Duration::from_secs(100);
        let delay = Duration::from_secs(600);

        let window = TimeWindow::base(PERIOD, delay, now);
        assert_eq!(window.length(), PERIOD);
        assert_eq!(window.end + delay, now);
    }
}
