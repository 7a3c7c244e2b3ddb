//! Period tests: one aggregated result per probed target, threshold
//! comparison, and the failure log in `details`.

mod support;

use regex::Regex;
use std::time::Duration;
use support::*;

fn period_spec(duration: Duration, sleep: Duration) -> lookout::probe::TestSpec {
    let mut spec = resolving_spec("host must run scripted with pt-duration 1s", "host");
    spec.period_duration = Some(duration);
    spec.period_sleep = Some(sleep);
    spec
}

#[tokio::test]
async fn a_failing_period_emits_one_aggregated_alert() {
    let rig = rig(
        ScriptedHandler::failing(true, "connection refused"),
        static_resolver(&["192.0.2.1"]),
        quick_settings(),
    );
    let spec = period_spec(Duration::from_millis(250), Duration::from_millis(50));

    rig.executor
        .execute(1, spec)
        .await
        .expect("execution completes");

    let results = rig.store.published();
    assert_eq!(results.len(), 1, "a period test emits exactly one result");

    let result = &results[0];
    let error = result.error.as_deref().expect("all iterations failed");
    let shape = Regex::new(r"^(\d+) tests failed out of (\d+) \(100\.00%\)$")
        .expect("pattern compiles");
    let captures = shape.captures(error).expect("error matches the summary shape");
    let failed: usize = captures[1].parse().expect("count parses");
    let total: usize = captures[2].parse().expect("count parses");
    assert_eq!(failed, total);
    assert!(total >= 1);

    let details = result.details.as_deref().expect("failures are logged");
    assert!(details.starts_with("Period-test errors:"));
    let lines: Vec<&str> = details
        .lines()
        .filter(|line| line.starts_with("- test "))
        .collect();
    assert_eq!(lines.len(), failed, "one log line per failed iteration");
    assert!(lines[0].contains("failed, took"));
    assert!(lines[0].contains("connection refused"));
}

#[tokio::test]
async fn a_clean_period_emits_one_success() {
    let rig = rig(
        ScriptedHandler::passing(true),
        static_resolver(&["192.0.2.1"]),
        quick_settings(),
    );
    let spec = period_spec(Duration::from_millis(150), Duration::from_millis(50));

    rig.executor
        .execute(1, spec)
        .await
        .expect("execution completes");

    let results = rig.store.published();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].error, None);
    assert_eq!(results[0].details, None);
    assert!(rig.handler.invocations() >= 1);
}

#[tokio::test]
async fn failures_under_the_threshold_still_pass() {
    // One failure, then passes; with a generous threshold the aggregate is
    // a success that keeps the failure log.
    let script = vec![Some("connection refused".to_string())];
    let rig = rig(
        ScriptedHandler::scripted(true, script),
        static_resolver(&["192.0.2.1"]),
        quick_settings(),
    );
    let mut spec = period_spec(Duration::from_millis(250), Duration::from_millis(50));
    spec.period_threshold = Some(0.9);

    rig.executor
        .execute(1, spec)
        .await
        .expect("execution completes");

    let results = rig.store.published();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].error, None);
    assert!(
        results[0]
            .details
            .as_deref()
            .expect("the failure log survives")
            .contains("test 1 failed"),
        "details keep the per-iteration log even on success"
    );
}

#[tokio::test]
async fn a_window_too_short_for_any_iteration_counts_as_a_pass() {
    let rig = rig(
        ScriptedHandler::failing(true, "never invoked"),
        static_resolver(&["192.0.2.1"]),
        quick_settings(),
    );
    let spec = period_spec(Duration::ZERO, Duration::from_millis(50));

    rig.executor
        .execute(1, spec)
        .await
        .expect("execution completes");

    let results = rig.store.published();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].error, None);
    assert_eq!(rig.handler.invocations(), 0);
}

#[tokio::test]
async fn iteration_counts_track_the_window_and_sleep() {
    let rig = rig(
        ScriptedHandler::passing(true),
        static_resolver(&["192.0.2.1"]),
        quick_settings(),
    );
    let spec = period_spec(Duration::from_millis(300), Duration::from_millis(100));

    rig.executor
        .execute(1, spec)
        .await
        .expect("execution completes");

    let invocations = rig.handler.invocations();
    assert!(
        (2..=5).contains(&invocations),
        "expected roughly duration/sleep iterations, got {invocations}"
    );
}

#[tokio::test]
async fn retries_stay_disabled_inside_period_tests() {
    // With retries enabled a single failing invocation would be repeated;
    // inside a period window every invocation is single-shot, so the
    // iteration count stays bounded by the window.
    let mut settings = quick_settings();
    settings.retry = true;
    settings.retry_count = 50;
    let rig = rig(
        ScriptedHandler::failing(true, "connection refused"),
        static_resolver(&["192.0.2.1"]),
        settings,
    );
    let spec = period_spec(Duration::from_millis(200), Duration::from_millis(50));

    rig.executor
        .execute(1, spec)
        .await
        .expect("execution completes");

    assert!(
        rig.handler.invocations() <= 6,
        "a retry loop would have run far more invocations"
    );
    assert_eq!(rig.store.published().len(), 1);
}
