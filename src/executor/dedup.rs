//! Deduplication decision logic.
//!
//! Pure functions over the dedup state of one fingerprint: whether a
//! failure should alert, whether it repeats a previous alert, and whether a
//! success is a recovery. The caller applies the returned store actions and
//! owns the actual key reads and writes; contention between workers is
//! resolved optimistically, where the worst case is one redundant alert.

use std::time::Duration;

/// What the executor should do with the result at hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    /// Publish the result as-is. Also used for every result of a test with
    /// deduplication disabled, success or failure.
    EmitAlert,
    /// Publish the failure flagged as a repeat of an earlier alert.
    EmitDedupedAlert,
    /// Drop the failure; the previous alert is still fresh.
    Suppress,
    /// Publish the success flagged as a recovery from a tracked failure.
    EmitRecovery,
    /// Drop the success; nothing was failing.
    EmitNothing,
}

/// A decision plus the dedup-state writes it entails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupOutcome {
    pub decision: AlertDecision,
    /// Write the cache-time key, keeping the failing state alive.
    pub refresh_cache: bool,
    /// Write the last-alert-time key, restarting the window.
    pub set_last_alert: bool,
    /// Delete both keys.
    pub clear_state: bool,
}

impl DedupOutcome {
    fn emit(decision: AlertDecision) -> Self {
        Self {
            decision,
            refresh_cache: false,
            set_last_alert: false,
            clear_state: false,
        }
    }

    pub fn should_emit(&self) -> bool {
        !matches!(
            self.decision,
            AlertDecision::Suppress | AlertDecision::EmitNothing
        )
    }
}

/// TTL applied to both dedup keys, long enough that an active fingerprint
/// never expires between refreshes.
pub fn state_ttl(window: Duration) -> Duration {
    window * 10
}

/// Decides how to treat one test outcome for one fingerprint.
///
/// `cache_time` and `last_alert_time` are the current key values, `now` is
/// unix seconds. The dedup flag keys off the last-alert record while
/// recovery keys off the cache record; the two only diverge across TTL
/// races, which resolve toward an extra alert rather than a missed one.
pub fn decide(
    test_failed: bool,
    window: Option<Duration>,
    now: i64,
    cache_time: Option<i64>,
    last_alert_time: Option<i64>,
) -> DedupOutcome {
    let Some(window) = window else {
        return DedupOutcome::emit(AlertDecision::EmitAlert);
    };
    let window_secs = window.as_secs() as i64;

    if test_failed {
        return match last_alert_time {
            Some(last_alert) if now.saturating_sub(last_alert) < window_secs => DedupOutcome {
                decision: AlertDecision::Suppress,
                refresh_cache: true,
                set_last_alert: false,
                clear_state: false,
            },
            Some(_) => DedupOutcome {
                decision: AlertDecision::EmitDedupedAlert,
                refresh_cache: true,
                set_last_alert: true,
                clear_state: false,
            },
            None => DedupOutcome {
                decision: AlertDecision::EmitAlert,
                refresh_cache: true,
                set_last_alert: true,
                clear_state: false,
            },
        };
    }

    if cache_time.is_some() {
        DedupOutcome {
            decision: AlertDecision::EmitRecovery,
            refresh_cache: false,
            set_last_alert: false,
            clear_state: true,
        }
    } else {
        DedupOutcome::emit(AlertDecision::EmitNothing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(300);

    #[test]
    fn disabled_dedup_always_emits() {
        let failure = decide(true, None, 1_000, None, None);
        assert_eq!(failure.decision, AlertDecision::EmitAlert);
        assert!(!failure.refresh_cache && !failure.set_last_alert && !failure.clear_state);

        let success = decide(false, None, 1_000, Some(900), Some(900));
        assert_eq!(success.decision, AlertDecision::EmitAlert);
        assert!(!success.clear_state);
    }

    #[test]
    fn first_failure_alerts_and_seeds_state() {
        let outcome = decide(true, Some(WINDOW), 1_000, None, None);
        assert_eq!(outcome.decision, AlertDecision::EmitAlert);
        assert!(outcome.refresh_cache);
        assert!(outcome.set_last_alert);
        assert!(!outcome.clear_state);
    }

    #[test]
    fn repeated_failure_inside_the_window_is_suppressed() {
        let outcome = decide(true, Some(WINDOW), 1_030, Some(1_000), Some(1_000));
        assert_eq!(outcome.decision, AlertDecision::Suppress);
        assert!(outcome.refresh_cache, "cache must stay alive while failing");
        assert!(!outcome.set_last_alert, "suppression must not restart the window");
    }

    #[test]
    fn failure_past_the_window_emits_a_deduped_alert() {
        let outcome = decide(true, Some(WINDOW), 1_360, Some(1_000), Some(1_000));
        assert_eq!(outcome.decision, AlertDecision::EmitDedupedAlert);
        assert!(outcome.refresh_cache);
        assert!(outcome.set_last_alert);
    }

    #[test]
    fn failure_with_an_expired_last_alert_alerts_plainly() {
        let outcome = decide(true, Some(WINDOW), 9_000, Some(8_990), None);
        assert_eq!(outcome.decision, AlertDecision::EmitAlert);
    }

    #[test]
    fn success_after_a_tracked_failure_recovers_and_clears() {
        let outcome = decide(false, Some(WINDOW), 1_400, Some(1_000), Some(1_000));
        assert_eq!(outcome.decision, AlertDecision::EmitRecovery);
        assert!(outcome.clear_state);
        assert!(!outcome.refresh_cache && !outcome.set_last_alert);
    }

    #[test]
    fn success_with_no_tracked_failure_emits_nothing() {
        let outcome = decide(false, Some(WINDOW), 1_400, None, None);
        assert_eq!(outcome.decision, AlertDecision::EmitNothing);
        assert!(!outcome.should_emit());
    }

    #[test]
    fn ttl_is_ten_windows() {
        assert_eq!(state_ttl(WINDOW), Duration::from_secs(3_000));
    }
}
