use super::{ChangeFeed, FeedDelivery, FeedError, SnapshotDiffer, Subscription};
use crate::model::{Order, OrderStatus};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Default)]
struct FeedState {
    orders: Vec<Order>,
    error: Option<String>,
}

/// In-process collection with a live change feed. Updates that land before a
/// subscriber wakes up are coalesced into one diff.
#[derive(Debug, Clone)]
pub struct MemoryFeed {
    state: Arc<watch::Sender<FeedState>>,
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MemoryFeed {
    pub fn new(orders: Vec<Order>) -> Self {
        let (tx, _rx) = watch::channel(FeedState {
            orders,
            error: None,
        });
        Self { state: Arc::new(tx) }
    }

    /// Newest orders go first, matching the descending timestamp ordering.
    pub fn insert(&self, order: Order) {
        self.state.send_modify(|s| {
            s.orders.retain(|o| o.id != order.id);
            s.orders.insert(0, order);
        });
    }

    pub fn set_status(&self, order_id: &str, status: OrderStatus) -> bool {
        let mut found = false;
        self.state.send_modify(|s| {
            if let Some(o) = s.orders.iter_mut().find(|o| o.id == order_id) {
                o.status = status;
                found = true;
            }
        });
        found
    }

    pub fn remove(&self, order_id: &str) -> bool {
        let mut found = false;
        self.state.send_modify(|s| {
            let before = s.orders.len();
            s.orders.retain(|o| o.id != order_id);
            found = s.orders.len() != before;
        });
        found
    }

    /// Simulate a transport failure; every live subscription closes.
    pub fn fail(&self, reason: &str) {
        let reason = reason.to_string();
        self.state.send_modify(|s| s.error = Some(reason));
    }

    /// Clear a failure so new subscriptions work again.
    pub fn recover(&self) {
        self.state.send_modify(|s| s.error = None);
    }

    pub fn orders(&self) -> Vec<Order> {
        self.state.borrow().orders.clone()
    }
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn subscribe(&self, sink: mpsc::Sender<FeedDelivery>) -> Result<Subscription, FeedError> {
        let mut rx = self.state.subscribe();
        let task = tokio::spawn(async move {
            let mut differ = SnapshotDiffer::new();
            loop {
                let state = rx.borrow_and_update().clone();
                if let Some(err) = state.error {
                    let _ = sink.send(FeedDelivery::Closed(Some(err))).await;
                    return;
                }
                let delivery = differ.apply(state.orders);
                let deliver = match &delivery {
                    FeedDelivery::Changes { events, initial } => *initial || !events.is_empty(),
                    FeedDelivery::Closed(_) => true,
                };
                if deliver && sink.send(delivery).await.is_err() {
                    return;
                }
                if rx.changed().await.is_err() {
                    let _ = sink.send(FeedDelivery::Closed(None)).await;
                    return;
                }
            }
        });
        Ok(Subscription::new(task))
    }
}
