#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use order_bell::channels::{
    AlertCard, AudioChannel, ChannelError, NotificationOutcome, OsNotification, OsNotifier,
    Permission, StatusKind, VisualChannel,
};
use order_bell::fanout::Channels;
use order_bell::model::{Order, OrderItem, OrderStatus};
use order_bell::orders::{OrderStore, OrderStoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Sound,
    CardShown(String),
    CardRemoved(String),
    Status(StatusKind, String),
    Os {
        source: &'static str,
        title: String,
        order_id: Option<String>,
    },
}

/// Shared, ordered log of every channel call.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Recorder {
    pub async fn push(&self, call: Call) {
        self.calls.lock().await.push(call);
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn sounds(&self) -> usize {
        self.calls().await.iter().filter(|c| **c == Call::Sound).count()
    }

    pub async fn cards_shown(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                Call::CardShown(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub async fn cards_removed(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                Call::CardRemoved(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// `(source, order_id)` of every OS notification shown.
    pub async fn os(&self) -> Vec<(&'static str, Option<String>)> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                Call::Os {
                    source, order_id, ..
                } => Some((source, order_id)),
                _ => None,
            })
            .collect()
    }

    pub async fn statuses(&self) -> Vec<(StatusKind, String)> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                Call::Status(kind, msg) => Some((kind, msg)),
                _ => None,
            })
            .collect()
    }
}

pub struct MockAudio {
    rec: Recorder,
}

#[async_trait]
impl AudioChannel for MockAudio {
    async fn play(&self) -> Result<&'static str, ChannelError> {
        self.rec.push(Call::Sound).await;
        Ok("mock")
    }
}

pub struct MockVisual {
    rec: Recorder,
    fail: bool,
}

#[async_trait]
impl VisualChannel for MockVisual {
    async fn show(&self, card: &AlertCard) -> Result<(), ChannelError> {
        if self.fail {
            return Err(ChannelError::Failed("no display".into()));
        }
        self.rec.push(Call::CardShown(card.order_id.clone())).await;
        Ok(())
    }

    async fn remove(&self, order_id: &str) -> Result<(), ChannelError> {
        self.rec.push(Call::CardRemoved(order_id.to_string())).await;
        Ok(())
    }

    async fn show_status(&self, kind: StatusKind, message: &str) -> Result<(), ChannelError> {
        self.rec.push(Call::Status(kind, message.to_string())).await;
        Ok(())
    }
}

pub struct MockOs {
    rec: Recorder,
    source: &'static str,
    permission: Permission,
    outcome: NotificationOutcome,
}

impl MockOs {
    pub fn new(rec: &Recorder, source: &'static str, permission: Permission) -> Self {
        Self::with_outcome(rec, source, permission, NotificationOutcome::Displayed)
    }

    pub fn with_outcome(
        rec: &Recorder,
        source: &'static str,
        permission: Permission,
        outcome: NotificationOutcome,
    ) -> Self {
        Self {
            rec: rec.clone(),
            source,
            permission,
            outcome,
        }
    }
}

#[async_trait]
impl OsNotifier for MockOs {
    fn permission(&self) -> Permission {
        self.permission
    }

    async fn request_permission(&self) -> Permission {
        self.permission
    }

    async fn show(&self, n: &OsNotification) -> Result<NotificationOutcome, ChannelError> {
        if self.permission != Permission::Granted {
            return Err(ChannelError::PermissionDenied(self.permission));
        }
        self.rec
            .push(Call::Os {
                source: self.source,
                title: n.title.clone(),
                order_id: n.order_id.clone(),
            })
            .await;
        Ok(self.outcome.clone())
    }
}

pub fn channels(rec: &Recorder, permission: Permission) -> Channels {
    channels_with(rec, permission, NotificationOutcome::Displayed, false)
}

pub fn channels_with(
    rec: &Recorder,
    permission: Permission,
    outcome: NotificationOutcome,
    visual_fails: bool,
) -> Channels {
    Channels {
        audio: Arc::new(MockAudio { rec: rec.clone() }),
        visual: Arc::new(MockVisual {
            rec: rec.clone(),
            fail: visual_fails,
        }),
        os: Arc::new(MockOs::with_outcome(rec, "fanout", permission, outcome)),
    }
}

#[derive(Clone, Default)]
pub struct RecordingOrders {
    writes: Arc<Mutex<Vec<(String, Option<OrderStatus>)>>>,
}

impl RecordingOrders {
    pub async fn writes(&self) -> Vec<(String, Option<OrderStatus>)> {
        self.writes.lock().await.clone()
    }
}

#[async_trait]
impl OrderStore for RecordingOrders {
    async fn update_status(&self, order_id: &str, status: OrderStatus) -> Result<(), OrderStoreError> {
        self.writes
            .lock()
            .await
            .push((order_id.to_string(), Some(status)));
        Ok(())
    }

    async fn delete(&self, order_id: &str) -> Result<(), OrderStoreError> {
        self.writes.lock().await.push((order_id.to_string(), None));
        Ok(())
    }
}

pub fn order(id: &str, status: OrderStatus) -> Order {
    Order {
        id: id.to_string(),
        user_name: Some("Asha".into()),
        phone: Some("9999999999".into()),
        address: Some("12 MG Road".into()),
        lat: None,
        lng: None,
        items: vec![OrderItem {
            name: "Margherita".into(),
            qty: 1,
            price: 599.0,
        }],
        subtotal: Some(599.0),
        delivery_charge: Some(0.0),
        total_amount: Some(599.0),
        payment_method: Some("COD".into()),
        status,
        timestamp: Some(Utc::now()),
    }
}

pub async fn memory_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Poll `check` every 10ms until it holds or `within` elapses.
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
