//! Publishing a realistic outcome timeline through the sinks.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::Arc;

use warden_core::DeviceId;
use warden_events::{EventLog, EventSink, FleetEvent, TracedSink};

fn timeline() -> Vec<FleetEvent> {
    vec![
        FleetEvent::inconsistencies_detected(1, BTreeMap::from([("missing_container".into(), 1)])),
        FleetEvent::self_healing_succeeded(
            "missing_container",
            Some(DeviceId::new("device-1")),
            "Marked device as error for failover",
        ),
        FleetEvent::recovery_failed(
            DeviceId::new("device-1"),
            "high_error_rate",
            "recreate",
            Some("image pull failed".into()),
            3,
        ),
        FleetEvent::recovery_succeeded(
            DeviceId::new("device-2"),
            "container_unhealthy",
            "restart_container",
            40,
        ),
        FleetEvent::permanent_failure(DeviceId::new("device-1"), 3),
    ]
}

#[tokio::test]
async fn timeline_is_kept_in_publish_order() {
    let log = Arc::new(EventLog::new());
    let sink = TracedSink::new(log.clone());

    let mut ids = Vec::new();
    for event in timeline() {
        ids.push(sink.publish(event).await.unwrap());
    }

    let events = log.events().await;
    assert_eq!(
        events.iter().map(FleetEvent::event_id).collect::<Vec<_>>(),
        ids
    );
    assert_eq!(
        log.event_types().await,
        vec![
            "inconsistencies_detected",
            "self_healing_success",
            "recovery_failed",
            "recovery_success",
            "permanent_failure",
        ]
    );
    assert_eq!(events.iter().filter(|e| e.is_failure()).count(), 2);
}

#[tokio::test]
async fn device_slices_skip_fleet_wide_events() {
    let log = EventLog::new();
    for event in timeline() {
        log.publish(event).await.unwrap();
    }

    let device1: Vec<_> = log
        .for_device(&DeviceId::new("device-1"))
        .await
        .iter()
        .map(FleetEvent::event_type)
        .collect();

    assert_eq!(
        device1,
        vec!["self_healing_success", "recovery_failed", "permanent_failure"]
    );
    assert_eq!(log.for_device(&DeviceId::new("device-2")).await.len(), 1);
    assert!(log.for_device(&DeviceId::new("device-9")).await.is_empty());
}

#[tokio::test]
async fn rejection_passes_through_the_traced_sink() {
    let log = Arc::new(EventLog::new());
    let sink = TracedSink::new(log.clone());
    log.reject_publishes(true).await;

    let result = sink
        .publish(FleetEvent::permanent_failure(DeviceId::new("device-1"), 3))
        .await;

    assert!(result.is_err());
    assert!(log.is_empty().await);
}

#[test]
fn events_serialize_with_variant_tag() {
    let event = FleetEvent::permanent_failure(DeviceId::new("device-7"), 3);

    let json = serde_json::to_value(&event).unwrap();

    assert_eq!(json["PermanentFailure"]["device_id"], "device-7");
    assert_eq!(json["PermanentFailure"]["consecutive_failures"], 3);
}
