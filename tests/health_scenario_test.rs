//! Collector outages never surface to callers and the circuit recovers once
//! the collector answers again.

mod support;

use std::time::Duration;

use cmdrdata_anthropic::delivery::{DeliveryOutcome, HealthSettings, HealthStatus};
use cmdrdata_anthropic::intercept::TrackedClient;
use cmdrdata_anthropic::types::UsageEvent;
use serde_json::json;
use support::{FakeMessagesClient, SwitchableExporter, message_response, params, tracker_with};

const FLUSH: Duration = Duration::from_secs(5);

fn settings(cooldown: Duration) -> HealthSettings {
    HealthSettings {
        degraded_threshold: 1,
        unhealthy_threshold: 3,
        cooldown,
    }
}

#[tokio::test]
async fn outage_marks_unhealthy_and_one_success_recovers() {
    let exporter = SwitchableExporter::down();
    let tracker = tracker_with(exporter.clone(), 3, settings(Duration::ZERO)).expect("tracker");
    let client = TrackedClient::new(
        FakeMessagesClient::replying(message_response("claude-3-5-haiku-20241022", 12, 8)),
        tracker.clone(),
    );

    for _ in 0..5 {
        let response = client
            .messages()
            .create(params(json!({"model": "claude-3-5-haiku-20241022", "customer_id": "cust-outage"})))
            .await;
        assert!(response.is_ok(), "collector outage leaked into the call");
        assert!(tracker.flush(FLUSH).await);
    }

    let health = tracker.health_status();
    assert!(!health.healthy);
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.consecutive_failures, 5);
    assert_eq!(health.failed, 5);
    assert!(health.last_error.is_some());
    // three full retry rounds, then single-attempt probes
    assert_eq!(exporter.attempts(), 3 * 3 + 2);

    exporter.set_down(false);
    client
        .messages()
        .create(params(json!({"model": "claude-3-5-haiku-20241022", "customer_id": "cust-outage"})))
        .await
        .expect("call");
    assert!(tracker.flush(FLUSH).await);

    let health = tracker.health_status();
    assert!(health.healthy);
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.consecutive_failures, 0);
    assert!(health.last_success.is_some());
    assert_eq!(exporter.events().len(), 1);
}

#[tokio::test]
async fn open_circuit_skips_deliveries_until_cooldown() {
    let exporter = SwitchableExporter::down();
    let tracker = tracker_with(exporter.clone(), 1, settings(Duration::from_secs(3600))).expect("tracker");
    let delivery = tracker.delivery().expect("tracking enabled");

    let event = || {
        UsageEvent::builder("cust-skip", "claude-3-opus-20240229")
            .input_tokens(1)
            .output_tokens(1)
            .build()
            .expect("event")
    };

    for _ in 0..3 {
        assert!(matches!(
            delivery.deliver_now(&event()).await,
            DeliveryOutcome::Failed { attempts: 1, .. }
        ));
    }
    assert_eq!(tracker.health_status().status, HealthStatus::Unhealthy);

    exporter.set_down(false);
    assert_eq!(delivery.deliver_now(&event()).await, DeliveryOutcome::Skipped);
    assert_eq!(exporter.attempts(), 3);

    let health = tracker.health_status();
    assert_eq!(health.dropped, 1);
    assert_eq!(health.consecutive_failures, 3);
}

#[tokio::test]
async fn degraded_after_first_failure_still_delivers() {
    let exporter = SwitchableExporter::down();
    let tracker = tracker_with(exporter.clone(), 1, settings(Duration::from_secs(3600))).expect("tracker");
    let delivery = tracker.delivery().expect("tracking enabled");
    let event = UsageEvent::builder("cust-degraded", "claude-3-opus-20240229")
        .build()
        .expect("event");

    delivery.deliver_now(&event).await;
    let health = tracker.health_status();
    assert_eq!(health.status, HealthStatus::Degraded);
    assert!(health.healthy);

    exporter.set_down(false);
    assert!(delivery.deliver_now(&event).await.is_delivered());
    assert_eq!(tracker.health_status().status, HealthStatus::Healthy);
    assert!((tracker.health_status().failure_rate() - 0.5).abs() < f64::EPSILON);
}
