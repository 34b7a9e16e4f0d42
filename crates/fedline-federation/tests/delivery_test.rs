//! Delivery of federate traffic through the queue and scheduler.

use std::time::Duration;

use fedline_core::{FederationConfig, TimeStatus};
use fedline_harness::TestCluster;
use fedline_proto::{Category, Message};

async fn two_joined(seed: u64) -> TestCluster {
    let config = FederationConfig::default()
        .with_discovery_timeout(Duration::from_millis(50))
        .with_immediate_idle_sleep(Duration::from_millis(20));
    let mut cluster = TestCluster::new(seed, 2, "fed", &config).unwrap();
    cluster.connect_all().await.unwrap();
    cluster.create(0, b"fom").await.unwrap();
    cluster.process(1).time.set(TimeStatus::constrained());
    cluster.join(0, "sender").await.unwrap();
    cluster.join(1, "receiver").await.unwrap();
    cluster
}

fn update(time: f64) -> Message {
    Message::timestamped(0, time, Category::Reflection, format!("t={time}").into_bytes())
}

#[tokio::test(start_paused = true)]
async fn test_constrained_receiver_waits_for_advance() {
    let mut cluster = two_joined(1).await;
    for time in [3.0, 1.0, 2.0] {
        cluster.send(0, update(time)).await.unwrap();
    }

    let receiver = cluster.process(1);
    let session = receiver.session.as_ref().unwrap();
    assert_eq!(session.queue().len(), 3);
    assert!(session.queue().poll().is_none());

    receiver.time.update(|status| status.advance_requested(2.0));
    session.queue().wake();
    let delivered = session.scheduler().tick().await.unwrap();

    assert_eq!(delivered, 2);
    assert_eq!(receiver.handler.timestamps(), vec![Some(1.0), Some(2.0)]);
    assert_eq!(session.queue().peek_tso_time(), Some(3.0));
}

#[tokio::test(start_paused = true)]
async fn test_unconstrained_receiver_gets_arrival_order() {
    let mut cluster = two_joined(2).await;
    for time in [3.0, 1.0, 2.0] {
        cluster.send(1, update(time)).await.unwrap();
    }

    let sender = cluster.process(0);
    let session = sender.session.as_ref().unwrap();
    let delivered = session.scheduler().tick().await.unwrap();

    assert_eq!(delivered, 3);
    assert_eq!(sender.handler.timestamps(), vec![None, None, None]);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_delivery_drains_without_ticks() {
    let mut cluster = two_joined(3).await;
    let session = cluster.process(0).session.as_ref().unwrap();
    session.scheduler().enable_immediate_delivery();

    cluster
        .send(1, Message::receive_order(0, Category::Interaction, &b"now"[..]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(cluster.process(0).handler.len(), 1);

    let session = cluster.process(0).session.as_ref().unwrap();
    session.scheduler().disable_immediate_delivery().await;
    assert!(!session.scheduler().is_immediate_delivery_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_disabled_callbacks_hold_messages() {
    let mut cluster = two_joined(4).await;
    let session = cluster.process(0).session.as_ref().unwrap();
    session.scheduler().disable_callbacks();

    cluster
        .send(1, Message::receive_order(0, Category::Interaction, &b"held"[..]))
        .await
        .unwrap();

    let session = cluster.process(0).session.as_ref().unwrap();
    assert_eq!(session.scheduler().tick().await.unwrap(), 0);
    assert!(cluster.process(0).handler.is_empty());

    session.scheduler().enable_callbacks();
    assert_eq!(session.scheduler().tick().await.unwrap(), 1);
}
