use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

use lumen_photos::ws::{NotificationHub, message_types};

#[tokio::test]
async fn broadcast_reaches_every_registered_connection() {
    let hub = NotificationHub::new();
    let (_id_a, mut rx_a) = hub.register().expect("register failed");
    let (_id_b, mut rx_b) = hub.register().expect("register failed");

    hub.broadcast(message_types::IMAGE_COUNT, json!({ "count": 7 }))
        .expect("broadcast failed");

    let got_a = rx_a.recv().await.expect("first connection got nothing");
    let got_b = rx_b.recv().await.expect("second connection got nothing");
    assert_eq!(got_a.message_type, message_types::IMAGE_COUNT);
    assert_eq!(got_b.data["count"], 7);
}

#[tokio::test]
async fn slow_consumer_is_dropped_on_overflow() {
    let hub = NotificationHub::new();
    let (_slow_id, slow_rx) = hub.register().expect("register failed");
    let (_ok_id, mut ok_rx) = hub.register().expect("register failed");
    assert_eq!(hub.connection_count().expect("count failed"), 2);

    // The slow connection never drains; the draining one must survive the
    // broadcast that overflows its neighbour.
    for i in 0..=NotificationHub::SEND_BUFFER {
        hub.broadcast(message_types::IMAGE_COUNT, json!({ "count": i }))
            .expect("broadcast failed");
        while ok_rx.try_recv().is_ok() {}
    }

    assert_eq!(hub.connection_count().expect("count failed"), 1);

    drop(slow_rx);
    hub.broadcast(message_types::IMAGE_COUNT, json!({ "count": -1 }))
        .expect("broadcast failed");
    let last = ok_rx.try_recv().expect("healthy connection stopped receiving");
    assert_eq!(last.data["count"], -1);
}

#[tokio::test]
async fn unregister_removes_the_connection() {
    let hub = NotificationHub::new();
    let (id, mut rx) = hub.register().expect("register failed");
    hub.unregister(id).expect("unregister failed");
    assert_eq!(hub.connection_count().expect("count failed"), 0);

    hub.broadcast(message_types::IMAGE_COUNT, json!({ "count": 1 }))
        .expect("broadcast failed");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn debounce_skips_rapid_repeats_of_the_same_type() {
    let hub = NotificationHub::new();
    let (_id, mut rx) = hub.register().expect("register failed");

    for i in 0..10 {
        hub.broadcast_debounced(message_types::AI_QUEUE_STATUS, json!({ "n": i }))
            .expect("broadcast failed");
    }

    let mut received = 0;
    while rx.try_recv().is_ok() {
        received += 1;
    }
    assert_eq!(received, 1, "only the first snapshot inside the window goes out");
}

#[tokio::test]
async fn debounce_lets_messages_through_after_the_window() {
    let hub = NotificationHub::new();
    let (_id, mut rx) = hub.register().expect("register failed");

    hub.broadcast_debounced(message_types::AI_QUEUE_STATUS, json!({ "n": 0 }))
        .expect("broadcast failed");
    sleep(Duration::from_millis(250)).await;
    hub.broadcast_debounced(message_types::AI_QUEUE_STATUS, json!({ "n": 1 }))
        .expect("broadcast failed");

    let mut received = 0;
    while rx.try_recv().is_ok() {
        received += 1;
    }
    assert_eq!(received, 2);
}

#[tokio::test]
async fn send_to_targets_a_single_connection() {
    let hub = NotificationHub::new();
    let (id_a, mut rx_a) = hub.register().expect("register failed");
    let (_id_b, mut rx_b) = hub.register().expect("register failed");

    hub.send_to(id_a, message_types::STORAGE_STATS, json!([]))
        .expect("send failed");

    assert!(rx_a.try_recv().is_ok());
    assert!(rx_b.try_recv().is_err());
}
