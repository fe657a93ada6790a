use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::info;

use crate::config::PolicyTable;
use crate::detect::window::{WindowSnapshot, WindowState};
use crate::detect::{classify, DetectionResult};
use crate::event::SignalType;

/// Identity of one tracked stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DetectorKey {
    pub user_id: String,
    pub signal_type: SignalType,
}

/// Keyed sliding-window storage. In-process by default; the seam exists so
/// the windows could live somewhere shared without touching the detector.
pub trait WindowStore: Send + Sync {
    /// Fold one instant into the key's window and return the post-insert view.
    fn record(&self, key: DetectorKey, at: DateTime<Utc>, window: Duration) -> WindowSnapshot;

    /// Drop every key idle past its expiry. Returns how many were dropped.
    fn evict_idle(&self, now: DateTime<Utc>, idle_expiry: &dyn Fn(SignalType) -> Duration)
        -> usize;

    /// Number of keys currently tracked.
    fn tracked_keys(&self) -> usize;
}

/// Sharded in-memory store. The entry guard serializes prune/insert/count
/// per key, while distinct keys land on independent shards, so a burst on
/// one key does not stall observations on another.
#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    windows: DashMap<DetectorKey, WindowState>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for InMemoryWindowStore {
    fn record(&self, key: DetectorKey, at: DateTime<Utc>, window: Duration) -> WindowSnapshot {
        self.windows
            .entry(key)
            .or_insert_with(|| WindowState::new(at))
            .record(at, window)
    }

    fn evict_idle(
        &self,
        now: DateTime<Utc>,
        idle_expiry: &dyn Fn(SignalType) -> Duration,
    ) -> usize {
        let mut evicted = 0;
        self.windows.retain(|key, state| {
            let idle = state.is_idle(now, idle_expiry(key.signal_type));
            if idle {
                evicted += 1;
            }
            !idle
        });
        evicted
    }

    fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

/// Policy-aware front of the window store. Shared by cloning.
#[derive(Clone)]
pub struct Detector {
    store: Arc<dyn WindowStore>,
    policies: PolicyTable,
}

impl Detector {
    pub fn new(policies: PolicyTable) -> Self {
        Self::with_store(Arc::new(InMemoryWindowStore::new()), policies)
    }

    pub fn with_store(store: Arc<dyn WindowStore>, policies: PolicyTable) -> Self {
        Self { store, policies }
    }

    /// Count one observation at `at` and judge it against the signal's policy.
    pub fn observe(&self, user_id: &str, signal_type: SignalType, at: DateTime<Utc>) -> DetectionResult {
        let policy = self.policies.for_signal(signal_type);
        let key = DetectorKey {
            user_id: user_id.to_string(),
            signal_type,
        };
        let snapshot = self.store.record(key, at, policy.window());
        DetectionResult {
            count: snapshot.count,
            threshold: policy.threshold,
            severity: classify(snapshot.count, policy),
            window_start: snapshot.window_start,
        }
    }

    /// Reclaim keys idle past their per-signal expiry.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        self.store
            .evict_idle(now, &|signal| self.policies.for_signal(signal).idle_expiry())
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.tracked_keys()
    }
}

/// Background reclaim of idle windows. Runs until the process exits.
pub async fn run_eviction_loop(detector: Detector, every: std::time::Duration) {
    info!(every_secs = every.as_secs(), "eviction sweep started");

    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;
        let evicted = detector.evict_idle(Utc::now());
        if evicted > 0 {
            info!(
                evicted,
                tracked = detector.tracked_keys(),
                "reclaimed idle detector keys"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignalPolicy;
    use crate::detect::Severity;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn detector(threshold: u32, window_secs: u64) -> Detector {
        Detector::new(PolicyTable::uniform(SignalPolicy {
            window_secs,
            threshold,
            severity_multiplier: 1.5,
            idle_expiry_secs: window_secs * 12,
        }))
    }

    #[test]
    fn severity_appears_only_above_threshold() {
        let d = detector(10, 5);
        let base = t0();
        for i in 0..16 {
            let r = d.observe("u1", SignalType::Hrv, base + Duration::milliseconds(i * 100));
            let expected = match i + 1 {
                c if c <= 10 => None,
                c if c <= 15 => Some(Severity::Warning),
                _ => Some(Severity::Critical),
            };
            assert_eq!(r.severity, expected, "event {}", i + 1);
            assert_eq!(r.count, i as u32 + 1);
            assert_eq!(r.threshold, 10);
        }
    }

    #[test]
    fn keys_are_independent() {
        let d = detector(10, 5);
        let base = t0();
        for i in 0..11 {
            d.observe("noisy", SignalType::Hrv, base + Duration::milliseconds(i * 10));
        }
        // other user, same signal: untouched
        let r = d.observe("quiet", SignalType::Hrv, base);
        assert_eq!(r.count, 1);
        assert_eq!(r.severity, None);
        // same user, other signal: untouched
        let r = d.observe("noisy", SignalType::Eda, base);
        assert_eq!(r.count, 1);
        assert_eq!(r.severity, None);
        assert_eq!(d.tracked_keys(), 3);
    }

    #[test]
    fn spaced_observations_never_alarm() {
        let d = detector(10, 5);
        let base = t0();
        for i in 0..100 {
            let r = d.observe("steady", SignalType::Sentiment, base + Duration::seconds(i * 6));
            assert_eq!(r.count, 1, "observation {i}");
            assert_eq!(r.severity, None);
        }
    }

    #[test]
    fn idle_keys_are_evicted_live_keys_kept() {
        let d = detector(10, 5);
        let base = t0();
        d.observe("old", SignalType::Hrv, base);
        d.observe("fresh", SignalType::Hrv, base + Duration::seconds(55));
        assert_eq!(d.tracked_keys(), 2);

        // idle expiry is 12 windows = 60s
        let evicted = d.evict_idle(base + Duration::seconds(60));
        assert_eq!(evicted, 1);
        assert_eq!(d.tracked_keys(), 1);

        // the survivor still has its window
        let r = d.observe("fresh", SignalType::Hrv, base + Duration::seconds(56));
        assert_eq!(r.count, 2);
    }

    #[test]
    fn sweep_never_reclaims_a_recent_key() {
        let d = detector(10, 5);
        let base = t0();
        d.observe("u1", SignalType::Hrv, base);
        assert_eq!(d.evict_idle(base + Duration::seconds(59)), 0);
        assert_eq!(d.tracked_keys(), 1);
    }

    #[test]
    fn concurrent_observations_on_one_key_all_count() {
        let store = Arc::new(InMemoryWindowStore::new());
        let base = t0();
        let window = Duration::seconds(60);

        let mut handles = Vec::new();
        for worker in 0..8i64 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..50i64 {
                    // interleaved instants so workers race on ordering
                    let at = base + Duration::milliseconds(worker + i * 8);
                    store.record(
                        DetectorKey {
                            user_id: "u1".to_string(),
                            signal_type: SignalType::Hrv,
                        },
                        at,
                        window,
                    );
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let snap = store.record(
            DetectorKey {
                user_id: "u1".to_string(),
                signal_type: SignalType::Hrv,
            },
            base + Duration::seconds(1),
            window,
        );
        // 8 workers x 50 each, plus the final probe
        assert_eq!(snap.count, 401);
        assert_eq!(snap.window_start, base);
    }

    #[test]
    fn concurrent_bursts_on_distinct_keys_stay_separate() {
        let d = detector(10, 60);
        let base = t0();

        let mut handles = Vec::new();
        for worker in 0..4 {
            let d = d.clone();
            handles.push(std::thread::spawn(move || {
                let user = format!("user-{worker}");
                for i in 0..20i64 {
                    d.observe(&user, SignalType::Engagement, base + Duration::milliseconds(i));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(d.tracked_keys(), 4);
        for worker in 0..4 {
            let user = format!("user-{worker}");
            let r = d.observe(&user, SignalType::Engagement, base + Duration::seconds(1));
            assert_eq!(r.count, 21, "{user}");
        }
    }
}
