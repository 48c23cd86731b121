mod common;

use common::order;
use order_bell::feed::{ChangeFeed, FeedDelivery, MemoryFeed};
use order_bell::model::{ChangeKind, OrderStatus};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn next(rx: &mut mpsc::Receiver<FeedDelivery>) -> FeedDelivery {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("delivery in time")
        .expect("subscription open")
}

fn summary(d: &FeedDelivery) -> (Vec<(String, ChangeKind, bool)>, bool) {
    match d {
        FeedDelivery::Changes { events, initial } => (
            events
                .iter()
                .map(|e| (e.order.id.clone(), e.kind, e.initial))
                .collect(),
            *initial,
        ),
        FeedDelivery::Closed(reason) => panic!("closed: {:?}", reason),
    }
}

#[tokio::test]
async fn first_delivery_is_the_tagged_snapshot_then_diffs_follow() {
    let feed = MemoryFeed::new(vec![
        order("ord-2", OrderStatus::Pending),
        order("ord-1", OrderStatus::Accepted),
    ]);
    let (tx, mut rx) = mpsc::channel(8);
    let sub = feed.subscribe(tx).await.unwrap();
    assert!(sub.is_active());

    let (events, initial) = summary(&next(&mut rx).await);
    assert!(initial);
    assert_eq!(
        events,
        vec![
            ("ord-2".to_string(), ChangeKind::Added, true),
            ("ord-1".to_string(), ChangeKind::Added, true)
        ]
    );

    feed.insert(order("ord-3", OrderStatus::Pending));
    let (events, initial) = summary(&next(&mut rx).await);
    assert!(!initial);
    assert_eq!(events, vec![("ord-3".to_string(), ChangeKind::Added, false)]);

    assert!(feed.set_status("ord-2", OrderStatus::Accepted));
    let (events, _) = summary(&next(&mut rx).await);
    assert_eq!(events, vec![("ord-2".to_string(), ChangeKind::Modified, false)]);

    assert!(feed.remove("ord-1"));
    let (events, _) = summary(&next(&mut rx).await);
    assert_eq!(events, vec![("ord-1".to_string(), ChangeKind::Removed, false)]);
    assert!(!feed.remove("ord-1"));
}

#[tokio::test]
async fn positions_increase_across_deliveries() {
    let feed = MemoryFeed::new(vec![order("ord-1", OrderStatus::Pending)]);
    let (tx, mut rx) = mpsc::channel(8);
    let _sub = feed.subscribe(tx).await.unwrap();

    let mut positions = Vec::new();
    for step in 0..2 {
        if step == 1 {
            feed.insert(order("ord-2", OrderStatus::Pending));
        }
        if let FeedDelivery::Changes { events, .. } = next(&mut rx).await {
            positions.extend(events.iter().map(|e| e.position));
        }
    }
    assert_eq!(positions.len(), 2);
    assert!(positions[0] < positions[1]);
}

#[tokio::test]
async fn failure_closes_the_subscription_with_the_reason() {
    let feed = MemoryFeed::default();
    let (tx, mut rx) = mpsc::channel(8);
    let _sub = feed.subscribe(tx).await.unwrap();
    next(&mut rx).await;

    feed.fail("permission denied");
    assert_eq!(
        next(&mut rx).await,
        FeedDelivery::Closed(Some("permission denied".into()))
    );
    assert!(timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn unsubscribing_stops_deliveries() {
    let feed = MemoryFeed::default();
    let (tx, mut rx) = mpsc::channel(8);
    let sub = feed.subscribe(tx).await.unwrap();
    next(&mut rx).await;

    sub.unsubscribe();
    feed.insert(order("ord-1", OrderStatus::Pending));
    // The sender was owned by the aborted task, so the channel just ends.
    assert!(timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .is_none());
}
