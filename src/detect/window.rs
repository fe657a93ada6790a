use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

/// Post-insert view of one key's window.
#[derive(Debug, Clone, Copy)]
pub struct WindowSnapshot {
    pub count: u32,
    /// Oldest instant still inside the window.
    pub window_start: DateTime<Utc>,
}

/// Sliding window for a single `(user_id, signal_type)` key: observation
/// instants in nondecreasing order, plus the newest instant ever seen.
///
/// Instants live only in memory. After `record(at, ..)` every held instant
/// `t` satisfies `at - window <= t <= last_seen`.
#[derive(Debug)]
pub struct WindowState {
    stamps: VecDeque<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
}

impl WindowState {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            stamps: VecDeque::new(),
            last_seen: at,
        }
    }

    /// Fold one instant into the window: prune, insert, count.
    pub fn record(&mut self, at: DateTime<Utc>, window: Duration) -> WindowSnapshot {
        self.prune(at - window);

        // Concurrent flows stamp `received_at` before taking the key's
        // guard, so instants can land a hair out of order. Insert in sorted
        // position; pushing blindly would break front-pruning.
        let idx = self.stamps.partition_point(|&t| t <= at);
        self.stamps.insert(idx, at);

        if at > self.last_seen {
            self.last_seen = at;
        }

        WindowSnapshot {
            count: self.stamps.len() as u32,
            // non-empty: `at` was just inserted
            window_start: *self.stamps.front().unwrap_or(&at),
        }
    }

    /// Drop instants strictly older than `cutoff`. An instant exactly at the
    /// cutoff still counts.
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while let Some(&front) = self.stamps.front() {
            if front < cutoff {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// True once the key has gone at least `idle_expiry` without an event.
    /// Idle expiry is validated to be >= one window, so an idle key cannot
    /// still hold a live instant.
    pub fn is_idle(&self, now: DateTime<Utc>, idle_expiry: Duration) -> bool {
        now.signed_duration_since(self.last_seen) >= idle_expiry
    }

    #[cfg(test)]
    fn stamps(&self) -> impl Iterator<Item = &DateTime<Utc>> {
        self.stamps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn counts_grow_within_window() {
        let base = t0();
        let mut w = WindowState::new(base);
        let window = Duration::seconds(5);
        for i in 0..4 {
            let snap = w.record(base + Duration::milliseconds(i * 100), window);
            assert_eq!(snap.count, i as u32 + 1);
            assert_eq!(snap.window_start, base);
        }
    }

    #[test]
    fn prune_is_strictly_older_than_cutoff() {
        let base = t0();
        let window = Duration::seconds(5);
        let mut w = WindowState::new(base);
        w.record(base, window);

        // at = base + 5s, cutoff = base: the instant at the cutoff survives
        let snap = w.record(base + Duration::seconds(5), window);
        assert_eq!(snap.count, 2);
        assert_eq!(snap.window_start, base);

        // one millisecond later the old instant is gone
        let snap = w.record(base + Duration::seconds(5) + Duration::milliseconds(1), window);
        assert_eq!(snap.count, 2);
        assert_eq!(snap.window_start, base + Duration::seconds(5));
    }

    #[test]
    fn out_of_order_instants_keep_sorted_order() {
        let base = t0();
        let window = Duration::seconds(5);
        let mut w = WindowState::new(base);
        w.record(base + Duration::milliseconds(300), window);
        w.record(base + Duration::milliseconds(100), window);
        let snap = w.record(base + Duration::milliseconds(200), window);

        assert_eq!(snap.count, 3);
        assert_eq!(snap.window_start, base + Duration::milliseconds(100));
        let stamps: Vec<_> = w.stamps().copied().collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
    }

    #[test]
    fn window_empties_by_time_alone() {
        let base = t0();
        let window = Duration::seconds(5);
        let mut w = WindowState::new(base);
        for i in 0..10 {
            w.record(base + Duration::milliseconds(i * 10), window);
        }
        // next burst an hour later: all prior instants fall out
        let snap = w.record(base + Duration::hours(1), window);
        assert_eq!(snap.count, 1);
        assert_eq!(snap.window_start, base + Duration::hours(1));
    }

    #[test]
    fn idle_check_uses_last_seen() {
        let base = t0();
        let mut w = WindowState::new(base);
        w.record(base, Duration::seconds(5));
        let expiry = Duration::seconds(60);
        assert!(!w.is_idle(base + Duration::seconds(59), expiry));
        assert!(w.is_idle(base + Duration::seconds(60), expiry));
        assert!(w.is_idle(base + Duration::hours(2), expiry));
    }
}
