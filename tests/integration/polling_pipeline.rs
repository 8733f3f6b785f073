//! End-to-end polling tests: extractor → evaluator → broadcaster
//!
//! All tests run on a paused clock, so intervals of several seconds pass
//! instantly and timings are exact.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use threshold_watch::extractor::ExtractionError;
use tokio::time::Instant;

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_localized_value_below_threshold_alerts() {
    let (harness, mut observer) =
        Harness::start(ScriptedExtractor::always(Step::ok("523,4 kW")), 600.0, 15_000).await;

    let metric = observer.next().await;
    assert_eq!(metric["type"], "metric");
    assert_eq!(metric["value"], 523.4);
    assert_eq!(metric["raw"], "523,4 kW");
    assert_eq!(metric["threshold"], 600.0);

    let alert = observer.next().await;
    assert_eq!(alert["type"], "alert");
    assert_eq!(alert["value"], 523.4);
    assert_eq!(alert["threshold"], 600.0);
    assert_eq!(alert["ts"], metric["ts"]);

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_value_above_threshold_does_not_alert() {
    let (harness, mut observer) =
        Harness::start(ScriptedExtractor::always(Step::ok("712 kW")), 600.0, 15_000).await;

    let metric = observer.next().await;
    assert_eq!(metric["type"], "metric");
    assert_eq!(metric["value"], 712.0);

    harness.settle().await;
    assert_eq!(observer.try_next(), None);

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_value_equal_to_threshold_does_not_alert() {
    let (harness, mut observer) =
        Harness::start(ScriptedExtractor::always(Step::ok("600")), 600.0, 15_000).await;

    assert_eq!(observer.next().await["type"], "metric");
    harness.settle().await;
    assert_eq!(observer.try_next(), None);

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unparseable_text_is_reported_without_alert() {
    let (harness, mut observer) =
        Harness::start(ScriptedExtractor::always(Step::ok("")), 600.0, 15_000).await;

    let metric = observer.next().await;
    assert_eq!(metric["type"], "metric");
    assert_eq!(metric["value"], json!(null));
    assert_eq!(metric["raw"], "");

    harness.settle().await;
    assert_eq!(observer.try_next(), None);

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reports_error_and_keeps_schedule() {
    let extractor = ScriptedExtractor::new(
        vec![Step::err(ExtractionError::Timeout(Duration::from_secs(15)))],
        Step::ok("700"),
    );
    let (harness, mut observer) = Harness::start(extractor.clone(), 600.0, 5_000).await;

    let error = observer.next().await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["message"], "timed out after 15s waiting for the metric");
    assert!(error["ts"].is_string());

    let metric = observer.next().await;
    assert_eq!(metric["type"], "metric");
    assert_eq!(metric["value"], 700.0);

    let times = extractor.call_times();
    assert_eq!(times.len(), 2);
    assert_eq!(times[1] - times[0], Duration::from_millis(5_000));

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failures_never_stop_the_schedule() {
    let extractor = ScriptedExtractor::always(Step::err(ExtractionError::failure("session lost")));
    let (harness, mut observer) = Harness::start(extractor.clone(), 600.0, 1_000).await;

    for _ in 0..3 {
        let error = observer.next().await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["message"], "session lost");
    }
    assert!(extractor.calls() >= 3);

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_threshold_change_during_extraction_applies_to_that_sample() {
    let extractor = ScriptedExtractor::always(Step::ok("500").after(Duration::from_secs(5)));
    let (harness, mut observer) = Harness::start(extractor, 400.0, 15_000).await;

    // Let the immediate poll start, then raise the threshold while it runs
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(harness.scheduler.state().await.unwrap().poll_in_flight);
    harness.config.set_threshold(600.0).unwrap();

    let metric = observer.next().await;
    assert_eq!(metric["type"], "metric");
    assert_eq!(metric["threshold"], 600.0);

    let alert = observer.next().await;
    assert_eq!(alert["type"], "alert");

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_reschedule_replaces_old_timer() {
    let extractor = ScriptedExtractor::always(Step::ok("700"));
    let (harness, mut observer) = Harness::start(extractor.clone(), 600.0, 10_000).await;

    assert_eq!(observer.next().await["type"], "metric");

    tokio::time::sleep(Duration::from_secs(3)).await;
    let rescheduled_at = Instant::now();
    harness.scheduler.reschedule(2_000).await.unwrap();

    for _ in 0..4 {
        assert_eq!(observer.next().await["type"], "metric");
    }

    let times = extractor.call_times();
    assert_eq!(times.len(), 5);

    // First tick on the new timer is a full interval after rescheduling
    assert!(times[1] >= rescheduled_at + Duration::from_millis(2_000));
    for pair in times[1..].windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_millis(2_000));
    }

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_reschedule_during_extraction_lets_poll_finish() {
    let extractor = ScriptedExtractor::always(Step::ok("700").after(Duration::from_secs(4)));
    let (harness, mut observer) = Harness::start(extractor.clone(), 600.0, 10_000).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    harness.scheduler.reschedule(6_000).await.unwrap();
    let state = harness.scheduler.state().await.unwrap();
    assert!(state.poll_in_flight);
    assert_eq!(state.interval_ms, 6_000);

    // The in-flight poll completes normally, exactly once
    assert_eq!(observer.next().await["type"], "metric");
    harness.settle().await;
    assert_eq!(extractor.calls(), 1);

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_extraction_never_overlaps_ticks() {
    // Each extraction takes longer than the interval
    let extractor = ScriptedExtractor::always(Step::ok("700").after(Duration::from_millis(2_500)));
    let (harness, mut observer) = Harness::start(extractor.clone(), 600.0, 1_000).await;

    for _ in 0..3 {
        assert_eq!(observer.next().await["type"], "metric");
    }

    let times = extractor.call_times();
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(2_500));
    }

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_closes_extractor_and_silences_events() {
    let extractor = ScriptedExtractor::always(Step::ok("700").after(Duration::from_secs(5)));
    let (harness, mut observer) = Harness::start(extractor.clone(), 600.0, 1_000).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    harness.scheduler.stop().await;
    assert!(extractor.is_closed());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(observer.try_next(), None);
    assert_eq!(extractor.calls(), 1);
}
