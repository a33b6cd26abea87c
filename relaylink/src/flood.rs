//! Per-category flood detection.
//!
//! Each category keeps a queue of recent event timestamps. Entries older
//! than the retention window are dropped lazily on every check; there is no
//! background sweep. `active` is a latch: set when a check pushes the count
//! over threshold (producing the one-time notice), cleared silently the
//! first time a check finds the window back under threshold.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::FloodPolicy;
use crate::event::FloodCategory;

/// Outcome of recording one event against a category's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FloodVerdict {
    Ok,
    /// Over threshold. `notice` is `Some` only on the crossing call, so a
    /// still-active flood never spams notices.
    Suppressed { notice: Option<String> },
}

#[derive(Debug, Default)]
struct Window {
    stamps: VecDeque<Instant>,
    active: bool,
}

/// Sliding-window flood counters, one window per [`FloodCategory`].
///
/// Windows are independently latched; append-and-prune happens under the
/// category's own mutex so concurrent networks never lose or double-count
/// an entry.
pub struct FloodGuard {
    privmsg_policy: FloodPolicy,
    presence_policy: FloodPolicy,
    privmsg: Mutex<Window>,
    presence: Mutex<Window>,
}

impl FloodGuard {
    pub fn new(privmsg_policy: FloodPolicy, presence_policy: FloodPolicy) -> Self {
        Self {
            privmsg_policy,
            presence_policy,
            privmsg: Mutex::new(Window::default()),
            presence: Mutex::new(Window::default()),
        }
    }

    /// Records the current instant and checks the category's window.
    pub fn record_and_check(&self, category: FloodCategory) -> FloodVerdict {
        self.record_and_check_at(category, Instant::now())
    }

    /// Timestamp-injectable form of [`record_and_check`], for tests.
    ///
    /// [`record_and_check`]: FloodGuard::record_and_check
    pub fn record_and_check_at(&self, category: FloodCategory, now: Instant) -> FloodVerdict {
        let (policy, window) = self.category(category);
        let mut w = window.lock();
        w.stamps.push_back(now);
        Self::prune(&mut w.stamps, now, policy.window);

        if w.stamps.len() > policy.threshold {
            if w.active {
                return FloodVerdict::Suppressed { notice: None };
            }
            w.active = true;
            return FloodVerdict::Suppressed {
                notice: Some(format!(
                    "Flood detected, not relaying messages for {} seconds",
                    policy.window.as_secs()
                )),
            };
        }
        // Back under threshold: clear the latch without announcing it.
        w.active = false;
        FloodVerdict::Ok
    }

    /// Appends without checking. Used for the flood notice itself, which
    /// counts toward the other category's window when it fans out.
    pub fn record_at(&self, category: FloodCategory, now: Instant) {
        let (policy, window) = self.category(category);
        let mut w = window.lock();
        w.stamps.push_back(now);
        Self::prune(&mut w.stamps, now, policy.window);
    }

    /// Current in-window count, for diagnostics and tests.
    pub fn count(&self, category: FloodCategory) -> usize {
        let (_, window) = self.category(category);
        window.lock().stamps.len()
    }

    fn category(&self, category: FloodCategory) -> (&FloodPolicy, &Mutex<Window>) {
        match category {
            FloodCategory::Privmsg => (&self.privmsg_policy, &self.privmsg),
            FloodCategory::Presence => (&self.presence_policy, &self.presence),
        }
    }

    fn prune(stamps: &mut VecDeque<Instant>, now: Instant, retention: Duration) {
        while let Some(front) = stamps.front() {
            if now.saturating_duration_since(*front) > retention {
                stamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(threshold: usize, window_secs: u64) -> FloodGuard {
        let policy = FloodPolicy::new(threshold, Duration::from_secs(window_secs));
        FloodGuard::new(policy, policy)
    }

    #[test]
    fn under_threshold_is_ok() {
        let g = guard(3, 20);
        let t0 = Instant::now();
        for i in 0..3 {
            let v = g.record_and_check_at(FloodCategory::Privmsg, t0 + Duration::from_secs(i));
            assert_eq!(v, FloodVerdict::Ok);
        }
    }

    #[test]
    fn fourth_event_in_window_suppresses_with_notice_then_silently() {
        let g = guard(3, 20);
        let t0 = Instant::now();
        for i in 0..3 {
            g.record_and_check_at(FloodCategory::Privmsg, t0 + Duration::from_secs(i));
        }
        let fourth = g.record_and_check_at(FloodCategory::Privmsg, t0 + Duration::from_secs(3));
        match fourth {
            FloodVerdict::Suppressed { notice: Some(n) } => {
                assert!(n.contains("20 seconds"), "notice should name the window: {n}");
            }
            other => panic!("expected suppression with notice, got {other:?}"),
        }
        let fifth = g.record_and_check_at(FloodCategory::Privmsg, t0 + Duration::from_secs(4));
        assert_eq!(fifth, FloodVerdict::Suppressed { notice: None });
    }

    #[test]
    fn window_elapse_resets_detection() {
        let g = guard(3, 20);
        let t0 = Instant::now();
        for i in 0..4 {
            g.record_and_check_at(FloodCategory::Privmsg, t0 + Duration::from_secs(i));
        }
        // Past the retention window: old stamps prune away, latch clears,
        // and a fresh burst gets a fresh notice.
        let later = t0 + Duration::from_secs(60);
        assert_eq!(g.record_and_check_at(FloodCategory::Privmsg, later), FloodVerdict::Ok);
        for i in 1..3 {
            g.record_and_check_at(FloodCategory::Privmsg, later + Duration::from_secs(i));
        }
        let v = g.record_and_check_at(FloodCategory::Privmsg, later + Duration::from_secs(3));
        assert!(matches!(v, FloodVerdict::Suppressed { notice: Some(_) }));
    }

    #[test]
    fn categories_are_latched_independently() {
        let g = guard(1, 20);
        let t0 = Instant::now();
        g.record_and_check_at(FloodCategory::Privmsg, t0);
        let v = g.record_and_check_at(FloodCategory::Privmsg, t0 + Duration::from_secs(1));
        assert!(matches!(v, FloodVerdict::Suppressed { .. }));
        // Presence window is untouched by the privmsg flood.
        let v = g.record_and_check_at(FloodCategory::Presence, t0 + Duration::from_secs(1));
        assert_eq!(v, FloodVerdict::Ok);
    }

    #[test]
    fn record_at_counts_without_latching() {
        let g = guard(1, 20);
        let t0 = Instant::now();
        g.record_at(FloodCategory::Presence, t0);
        g.record_at(FloodCategory::Presence, t0 + Duration::from_secs(1));
        assert_eq!(g.count(FloodCategory::Presence), 2);
    }
}
