//! Order change feed: subscriptions that deliver an initial snapshot followed
//! by incremental diffs.
//!
//! The first delivery of every subscription is tagged `initial`; downstream
//! code discards it wholesale. A failed subscription ends with
//! [`FeedDelivery::Closed`] and is not retried here.

use crate::model::{ChangeEvent, ChangeKind, Order};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub mod http;
pub mod memory;

pub use http::HttpChangeFeed;
pub use memory::MemoryFeed;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("feed returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid feed url: {0}")]
    Url(String),
    #[error("subscription failed: {0}")]
    Subscription(String),
}

/// One callback's worth of changes.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedDelivery {
    Changes {
        events: Vec<ChangeEvent>,
        initial: bool,
    },
    /// The subscription ended. `Some` carries the error that ended it.
    Closed(Option<String>),
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, sink: mpsc::Sender<FeedDelivery>) -> Result<Subscription, FeedError>;
}

/// Disposable subscription handle. Dropping it stops the feed.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Turns successive full snapshots of the collection into change events.
#[derive(Debug, Default)]
pub struct SnapshotDiffer {
    previous: HashMap<String, Order>,
    previous_ids: Vec<String>,
    position: u64,
    initial_consumed: bool,
}

impl SnapshotDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_consumed(&self) -> bool {
        self.initial_consumed
    }

    /// Diff `snapshot` against the last one. The first call reports every
    /// order as `added` with `initial` set.
    pub fn apply(&mut self, snapshot: Vec<Order>) -> FeedDelivery {
        let initial = !self.initial_consumed;
        let mut events = Vec::new();
        let mut next: HashMap<String, Order> = HashMap::with_capacity(snapshot.len());
        let mut next_ids = Vec::with_capacity(snapshot.len());

        for order in snapshot {
            let kind = match self.previous.get(&order.id) {
                None => Some(ChangeKind::Added),
                Some(prev) if prev != &order => Some(ChangeKind::Modified),
                Some(_) => None,
            };
            if let Some(kind) = kind {
                events.push(self.event(order.clone(), kind, initial));
            }
            next_ids.push(order.id.clone());
            next.insert(order.id.clone(), order);
        }

        let removed: Vec<String> = self
            .previous_ids
            .iter()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        for id in removed {
            if let Some(order) = self.previous.remove(&id) {
                events.push(self.event(order, ChangeKind::Removed, initial));
            }
        }

        self.previous = next;
        self.previous_ids = next_ids;
        self.initial_consumed = true;
        FeedDelivery::Changes { events, initial }
    }

    fn event(&mut self, order: Order, kind: ChangeKind, initial: bool) -> ChangeEvent {
        self.position += 1;
        ChangeEvent {
            order,
            kind,
            position: self.position,
            initial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OrderStatus;

    fn order(id: &str, status: OrderStatus) -> Order {
        Order {
            id: id.into(),
            user_name: None,
            phone: None,
            address: None,
            lat: None,
            lng: None,
            items: vec![],
            subtotal: None,
            delivery_charge: None,
            total_amount: None,
            payment_method: None,
            status,
            timestamp: None,
        }
    }

    fn unpack(d: FeedDelivery) -> (Vec<(String, ChangeKind, u64)>, bool) {
        match d {
            FeedDelivery::Changes { events, initial } => (
                events
                    .into_iter()
                    .map(|e| (e.order.id, e.kind, e.position))
                    .collect(),
                initial,
            ),
            FeedDelivery::Closed(_) => panic!("unexpected close"),
        }
    }

    #[test]
    fn first_snapshot_is_initial_and_all_added() {
        let mut differ = SnapshotDiffer::new();
        let (events, initial) = unpack(differ.apply(vec![
            order("b", OrderStatus::Pending),
            order("a", OrderStatus::Delivered),
        ]));
        assert!(initial);
        assert_eq!(
            events,
            vec![
                ("b".to_string(), ChangeKind::Added, 1),
                ("a".to_string(), ChangeKind::Added, 2)
            ]
        );
        assert!(differ.initial_consumed());
    }

    #[test]
    fn later_snapshots_carry_only_the_diff() {
        let mut differ = SnapshotDiffer::new();
        differ.apply(vec![
            order("a", OrderStatus::Pending),
            order("b", OrderStatus::Pending),
        ]);

        let (events, initial) = unpack(differ.apply(vec![
            order("c", OrderStatus::Pending),
            order("a", OrderStatus::Accepted),
        ]));
        assert!(!initial);
        assert_eq!(
            events,
            vec![
                ("c".to_string(), ChangeKind::Added, 3),
                ("a".to_string(), ChangeKind::Modified, 4),
                ("b".to_string(), ChangeKind::Removed, 5),
            ]
        );

        let (events, _) = unpack(differ.apply(vec![
            order("c", OrderStatus::Pending),
            order("a", OrderStatus::Accepted),
        ]));
        assert!(events.is_empty());
    }
}
