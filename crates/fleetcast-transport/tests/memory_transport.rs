//! Integration tests for the in-memory transport.
//!
//! These go through the `Publisher` / `Inbox` traits the way the
//! coordinator does, including spawning publishes onto other tasks.

use std::sync::Arc;

use fleetcast_transport::{Delivery, Inbox, MemoryBroker, Publisher, QoS};

/// Generic helper: only compiles if the trait futures are `Send`.
async fn publish_from_task<P: Publisher>(publisher: Arc<P>, topic: &'static str, byte: u8) {
    tokio::spawn(async move {
        publisher
            .publish(topic, QoS::AtMostOnce, false, vec![byte])
            .await
            .expect("publish should succeed");
    })
    .await
    .expect("task should complete");
}

async fn next<I: Inbox>(inbox: &mut I) -> Option<Delivery> {
    inbox.recv().await.expect("memory inbox never errors")
}

#[tokio::test]
async fn test_publishes_from_spawned_tasks_are_recorded() {
    let (broker, _inbox) = MemoryBroker::new();
    let publisher = Arc::new(broker.clone());

    publish_from_task(Arc::clone(&publisher), "weather/94107", 1).await;
    publish_from_task(Arc::clone(&publisher), "dev0", 2).await;

    let published = broker.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].topic, "weather/94107");
    assert_eq!(published[1].payload, vec![2]);
}

#[tokio::test]
async fn test_injected_deliveries_arrive_in_order() {
    let (broker, mut inbox) = MemoryBroker::new();
    broker.inject("dev_bootup", vec![0x03, 0]);
    broker.inject("dev_heartbeat", vec![0x11, 1, 0]);

    assert_eq!(next(&mut inbox).await.unwrap().topic, "dev_bootup");
    assert_eq!(next(&mut inbox).await.unwrap().topic, "dev_heartbeat");
}

#[tokio::test]
async fn test_subscriptions_are_recorded_with_qos() {
    let (broker, _inbox) = MemoryBroker::new();
    broker.subscribe("dev_bootup", QoS::AtLeastOnce).await.unwrap();
    broker.subscribe("etch_sketch", QoS::AtLeastOnce).await.unwrap();

    assert_eq!(
        broker.subscriptions(),
        vec![
            ("dev_bootup".to_string(), QoS::AtLeastOnce),
            ("etch_sketch".to_string(), QoS::AtLeastOnce),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_publish_delay_holds_the_publish() {
    let (broker, _inbox) = MemoryBroker::new();
    broker.set_publish_delay(Some(std::time::Duration::from_secs(10)));

    let start = tokio::time::Instant::now();
    broker.publish("t", QoS::AtMostOnce, false, vec![]).await.unwrap();
    assert!(start.elapsed() >= std::time::Duration::from_secs(10));
}
