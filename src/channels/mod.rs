//! Alert delivery channels. Each one is best-effort: failures are reported to
//! the caller as [`ChannelError`] and logged there, never escalated.

use crate::model::{format_amount, AlertPayload};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod audio;
pub mod desktop;
pub mod tone;
pub mod visual;

pub use audio::{AudioError, CommandStage, FallbackAudio, SoundStage, ToneStage};
pub use desktop::DesktopNotifier;
pub use visual::TerminalToaster;

/// Coalescing key shared by every OS notification about a new order.
pub const ORDER_TAG: &str = "new-order";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelKind {
    Audio,
    Visual,
    Os,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error("notification permission is {0:?}")]
    PermissionDenied(Permission),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
    Default,
}

/// How an OS notification ended, when the backend can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Displayed,
    Activated { action: Option<String> },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Success,
    Warning,
    Error,
}

/// Content of the transient on-screen card.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCard {
    pub order_id: String,
    pub title: String,
    pub headline: String,
    pub footer: String,
}

impl AlertCard {
    pub fn from_payload(payload: &AlertPayload) -> Self {
        Self {
            order_id: payload.order_id.clone(),
            title: "🍕 New Order!".to_string(),
            headline: payload.headline(),
            footer: format!("Order #{}", payload.order_id),
        }
    }

    pub fn text(&self) -> String {
        format!("{}\n{}\n{}", self.title, self.headline, self.footer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OsNotification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub tag: String,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
    pub order_id: Option<String>,
}

impl OsNotification {
    pub fn for_order(payload: &AlertPayload, icon: &str) -> Self {
        Self {
            title: "🍕 New Order Received!".to_string(),
            body: format!(
                "{} placed an order of ₹{}\nOrder #{}",
                payload.customer_name,
                format_amount(payload.total_amount),
                payload.order_id
            ),
            icon: icon.to_string(),
            tag: ORDER_TAG.to_string(),
            require_interaction: true,
            actions: vec![NotificationAction {
                action: "open".to_string(),
                title: "View Order".to_string(),
            }],
            order_id: Some(payload.order_id.clone()),
        }
    }
}

#[async_trait]
pub trait AudioChannel: Send + Sync {
    /// Play the alert sound once. Returns the name of the stage that worked.
    async fn play(&self) -> Result<&'static str, ChannelError>;
}

#[async_trait]
pub trait VisualChannel: Send + Sync {
    async fn show(&self, card: &AlertCard) -> Result<(), ChannelError>;
    async fn remove(&self, order_id: &str) -> Result<(), ChannelError>;
    /// One-off status line (permission guidance and similar).
    async fn show_status(&self, kind: StatusKind, message: &str) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait OsNotifier: Send + Sync {
    fn permission(&self) -> Permission;
    async fn request_permission(&self) -> Permission;
    /// Resolves when the notification is gone or was interacted with.
    async fn show(&self, notification: &OsNotification) -> Result<NotificationOutcome, ChannelError>;
}
