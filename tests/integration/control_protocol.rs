//! Control protocol tests against a running scheduler

use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use threshold_watch::{
    actors::messages::TriggerOutcome,
    config::ValidationError,
    protocol::{Outcome, ProtocolError},
};

use crate::helpers::*;

/// Start a harness and swallow the immediate first poll
async fn started(threshold: f64, poll_interval_ms: u32, step: Step) -> (Harness, Observer) {
    let (harness, mut observer) =
        Harness::start(ScriptedExtractor::always(step), threshold, poll_interval_ms).await;

    assert_eq!(observer.next().await["type"], "metric");
    harness.settle().await;
    assert_eq!(observer.try_next(), None);

    (harness, observer)
}

#[tokio::test(start_paused = true)]
async fn test_set_threshold_broadcasts_config_then_info() {
    let (harness, mut observer) = started(600.0, 15_000, Step::ok("712")).await;
    let mut other = Observer::register(&harness.broadcaster).await;

    let outcome = harness
        .protocol
        .handle_message(observer.id, r#"{"type":"setThreshold","value":450}"#)
        .await
        .unwrap();
    assert_matches!(outcome, Outcome::ThresholdUpdated(config) if config.threshold == 450.0);

    for rx in [&mut observer, &mut other] {
        assert_eq!(
            rx.next().await,
            json!({"type": "config", "threshold": 450.0, "pollIntervalMs": 15000})
        );
        assert_eq!(
            rx.next().await,
            json!({"type": "info", "message": "Threshold updated to 450"})
        );
    }
    assert_eq!(harness.config.get().threshold, 450.0);

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_new_threshold_drives_next_evaluation() {
    let (harness, mut observer) = started(600.0, 15_000, Step::ok("712")).await;

    harness
        .protocol
        .handle_message(observer.id, r#"{"type":"setThreshold","value":"800"}"#)
        .await
        .unwrap();
    assert_eq!(observer.next().await["type"], "config");
    assert_eq!(observer.next().await["type"], "info");

    harness
        .protocol
        .handle_message(observer.id, r#"{"type":"checkNow"}"#)
        .await
        .unwrap();

    let metric = observer.next().await;
    assert_eq!(metric["threshold"], 800.0);
    let alert = observer.next().await;
    assert_eq!(alert["type"], "alert");
    assert_eq!(alert["value"], 712.0);

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_non_numeric_threshold_is_ignored() {
    let (harness, mut observer) = started(600.0, 15_000, Step::ok("712")).await;

    for message in [
        r#"{"type":"setThreshold","value":"abc"}"#,
        r#"{"type":"setThreshold","value":null}"#,
        r#"{"type":"setThreshold"}"#,
        r#"{"type":"setThreshold","value":true}"#,
    ] {
        let result = harness.protocol.handle_message(observer.id, message).await;
        assert_matches!(
            result,
            Err(ProtocolError::Rejected(ValidationError::NotNumeric))
        );
    }

    assert_eq!(harness.config.get().threshold, 600.0);
    assert_eq!(observer.try_next(), None);

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_short_interval_is_ignored() {
    let (harness, mut observer) = started(600.0, 15_000, Step::ok("712")).await;

    let result = harness
        .protocol
        .handle_message(observer.id, r#"{"type":"setPollIntervalMs","value":500}"#)
        .await;
    assert_matches!(
        result,
        Err(ProtocolError::Rejected(ValidationError::IntervalTooShort { .. }))
    );

    let result = harness
        .protocol
        .handle_message(observer.id, r#"{"type":"setPollIntervalMs","value":"soon"}"#)
        .await;
    assert_matches!(result, Err(ProtocolError::Rejected(ValidationError::NotNumeric)));

    assert_eq!(harness.config.get().poll_interval_ms, 15_000);
    assert_eq!(harness.scheduler.state().await.unwrap().interval_ms, 15_000);
    assert_eq!(observer.try_next(), None);

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_set_interval_reschedules_and_broadcasts() {
    let (harness, mut observer) = started(600.0, 15_000, Step::ok("712")).await;

    let outcome = harness
        .protocol
        .handle_message(observer.id, r#"{"type":"setPollIntervalMs","value":2000}"#)
        .await
        .unwrap();
    assert_matches!(outcome, Outcome::IntervalUpdated(config) if config.poll_interval_ms == 2000);

    assert_eq!(
        observer.next().await,
        json!({"type": "config", "threshold": 600.0, "pollIntervalMs": 2000})
    );
    assert_eq!(
        observer.next().await,
        json!({"type": "info", "message": "Poll interval set to 2 s"})
    );
    assert_eq!(harness.scheduler.state().await.unwrap().interval_ms, 2_000);

    // Next sample comes on the new cadence
    let before = tokio::time::Instant::now();
    assert_eq!(observer.next().await["type"], "metric");
    assert_eq!(before.elapsed(), Duration::from_millis(2_000));

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_interval_info_rounds_to_seconds() {
    let (harness, mut observer) = started(600.0, 15_000, Step::ok("712")).await;

    harness
        .protocol
        .handle_message(observer.id, r#"{"type":"setPollIntervalMs","value":2600.7}"#)
        .await
        .unwrap();

    assert_eq!(observer.next().await["pollIntervalMs"], 2600);
    assert_eq!(
        observer.next().await["message"],
        "Poll interval set to 3 s"
    );

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_get_config_replies_only_to_requester() {
    let (harness, mut observer) = started(600.0, 15_000, Step::ok("712")).await;
    let mut other = Observer::register(&harness.broadcaster).await;

    let outcome = harness
        .protocol
        .handle_message(observer.id, r#"{"type":"getConfig"}"#)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::ConfigSent);

    assert_eq!(
        observer.next().await,
        json!({"type": "config", "threshold": 600.0, "pollIntervalMs": 15000})
    );
    assert_eq!(other.try_next(), None);

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_on_connect_sends_config_to_new_observer_only() {
    let (harness, mut observer) = started(600.0, 15_000, Step::ok("712")).await;
    let mut newcomer = Observer::register(&harness.broadcaster).await;

    harness.protocol.on_connect(newcomer.id).await.unwrap();

    assert_eq!(newcomer.next().await["type"], "config");
    assert_eq!(observer.try_next(), None);

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_check_now_while_in_flight_yields_single_metric() {
    let (harness, mut observer) =
        started(600.0, 60_000, Step::ok("712").after(Duration::from_secs(5))).await;

    let first = harness
        .protocol
        .handle_message(observer.id, r#"{"type":"checkNow"}"#)
        .await
        .unwrap();
    assert_eq!(first, Outcome::PollTriggered(TriggerOutcome::Started));

    let second = harness
        .protocol
        .handle_message(observer.id, r#"{"type":"checkNow"}"#)
        .await
        .unwrap();
    assert_eq!(second, Outcome::PollTriggered(TriggerOutcome::AlreadyInFlight));

    assert_eq!(observer.next().await["type"], "metric");
    harness.settle().await;
    assert_eq!(observer.try_next(), None);
    // Immediate startup poll plus the one manual poll
    assert_eq!(harness.extractor.calls(), 2);

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_messages_are_ignored() {
    let (harness, mut observer) = started(600.0, 15_000, Step::ok("712")).await;

    for message in ["", "{", "[]", r#"{"type":"shutdown"}"#, r#"{"kind":"checkNow"}"#] {
        assert_matches!(
            harness.protocol.handle_message(observer.id, message).await,
            Err(ProtocolError::Malformed(_))
        );
        harness.protocol.dispatch(observer.id, message).await;
    }

    assert_eq!(observer.try_next(), None);
    assert_eq!(harness.config.get().threshold, 600.0);

    harness.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_check_now_after_stop_is_reported() {
    let (harness, observer) = started(600.0, 15_000, Step::ok("712")).await;

    harness.scheduler.stop().await;

    assert_matches!(
        harness
            .protocol
            .handle_message(observer.id, r#"{"type":"checkNow"}"#)
            .await,
        Err(ProtocolError::SchedulerUnavailable)
    );
}
