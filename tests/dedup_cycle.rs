//! Deduplication over the shared key space: alert once, suppress repeats
//! inside the window, flag repeats beyond it, and detect recoveries.

mod support;

use lookout::probe::{fingerprint, unix_now};
use lookout::queue::ResultStore;
use std::time::Duration;
use support::*;

const WINDOW: Duration = Duration::from_secs(300);
const INPUT: &str = "host must run scripted";

fn dedup_spec() -> lookout::probe::TestSpec {
    let mut spec = resolving_spec(INPUT, "host");
    spec.dedup_duration = Some(WINDOW);
    spec
}

fn no_retry_settings() -> lookout::executor::ExecutorSettings {
    let mut settings = quick_settings();
    settings.retry = false;
    settings
}

#[tokio::test]
async fn repeated_failures_alert_once_inside_the_window() {
    let rig = rig(
        ScriptedHandler::failing(true, "connection refused"),
        static_resolver(&["192.0.2.1"]),
        no_retry_settings(),
    );

    for _ in 0..3 {
        rig.executor
            .execute(1, dedup_spec())
            .await
            .expect("execution completes");
    }

    let results = rig.store.published();
    assert_eq!(results.len(), 1, "one alert for three failures");
    assert!(results[0].error.is_some());
    assert!(!results[0].is_dedup);

    let fp = fingerprint(&dedup_spec().sanitize());
    assert!(
        rig.store
            .dedup_cache_time(&fp)
            .await
            .expect("read succeeds")
            .is_some(),
        "the failing state stays tracked"
    );
    assert!(rig
        .store
        .last_alert_time(&fp)
        .await
        .expect("read succeeds")
        .is_some());
}

#[tokio::test]
async fn a_failure_past_the_window_is_flagged_as_a_duplicate() {
    let rig = rig(
        ScriptedHandler::failing(true, "connection refused"),
        static_resolver(&["192.0.2.1"]),
        no_retry_settings(),
    );

    // Age the previous alert beyond the window.
    let fp = fingerprint(&dedup_spec().sanitize());
    let stale = unix_now() - WINDOW.as_secs() as i64 - 60;
    rig.store
        .set_dedup_cache_time(&fp, stale, WINDOW * 10)
        .await
        .expect("seed cache");
    rig.store
        .set_last_alert_time(&fp, stale, WINDOW * 10)
        .await
        .expect("seed last alert");

    rig.executor
        .execute(1, dedup_spec())
        .await
        .expect("execution completes");

    let results = rig.store.published();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_dedup, "the repeat alert carries the dedup flag");
    assert!(results[0].error.is_some());

    let refreshed = rig
        .store
        .last_alert_time(&fp)
        .await
        .expect("read succeeds")
        .expect("last alert is tracked");
    assert!(refreshed > stale, "the window restarts at the new alert");
}

#[tokio::test]
async fn the_first_success_after_a_failure_recovers_and_clears_state() {
    let script = vec![Some("connection refused".to_string()), None];
    let rig = rig(
        ScriptedHandler::scripted(true, script),
        static_resolver(&["192.0.2.1"]),
        no_retry_settings(),
    );

    rig.executor
        .execute(1, dedup_spec())
        .await
        .expect("failing pass completes");
    rig.executor
        .execute(1, dedup_spec())
        .await
        .expect("recovering pass completes");

    let results = rig.store.published();
    assert_eq!(results.len(), 2);
    assert!(results[0].error.is_some());
    let recovery = &results[1];
    assert!(recovery.recovered);
    assert_eq!(recovery.error, None);
    assert!(!recovery.is_dedup);

    let fp = fingerprint(&dedup_spec().sanitize());
    assert_eq!(
        rig.store.dedup_cache_time(&fp).await.expect("read succeeds"),
        None,
        "recovery clears the cache key"
    );
    assert_eq!(
        rig.store.last_alert_time(&fp).await.expect("read succeeds"),
        None,
        "recovery clears the last-alert key"
    );
}

#[tokio::test]
async fn a_success_with_no_tracked_failure_emits_nothing() {
    let rig = rig(
        ScriptedHandler::passing(true),
        static_resolver(&["192.0.2.1"]),
        no_retry_settings(),
    );

    rig.executor
        .execute(1, dedup_spec())
        .await
        .expect("execution completes");

    assert_eq!(rig.store.published().len(), 0);
}

#[tokio::test]
async fn tests_without_dedup_emit_every_outcome() {
    let rig = rig(
        ScriptedHandler::failing(true, "connection refused"),
        static_resolver(&["192.0.2.1"]),
        no_retry_settings(),
    );

    for _ in 0..3 {
        rig.executor
            .execute(1, resolving_spec(INPUT, "host"))
            .await
            .expect("execution completes");
    }

    assert_eq!(rig.store.published().len(), 3);
}

#[tokio::test]
async fn the_worker_default_window_applies_to_plain_tests() {
    let mut settings = no_retry_settings();
    settings.dedup_duration = Some(WINDOW);
    let rig = rig(
        ScriptedHandler::failing(true, "connection refused"),
        static_resolver(&["192.0.2.1"]),
        settings,
    );

    for _ in 0..2 {
        rig.executor
            .execute(1, resolving_spec(INPUT, "host"))
            .await
            .expect("execution completes");
    }

    assert_eq!(
        rig.store.published().len(),
        1,
        "the injected default window suppresses the repeat"
    );
}

#[tokio::test]
async fn period_tests_never_receive_the_default_window() {
    let mut settings = no_retry_settings();
    settings.dedup_duration = Some(WINDOW);
    let rig = rig(
        ScriptedHandler::passing(true),
        static_resolver(&["192.0.2.1"]),
        settings,
    );

    let mut spec = resolving_spec("host must run scripted with pt-duration 60ms", "host");
    spec.period_duration = Some(Duration::from_millis(60));
    spec.period_sleep = Some(Duration::from_millis(20));

    rig.executor
        .execute(1, spec)
        .await
        .expect("execution completes");

    assert_eq!(
        rig.store.published().len(),
        1,
        "a passing period test still emits its aggregate result"
    );
}
