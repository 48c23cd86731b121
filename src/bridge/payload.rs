//! Push payloads and the typed messages exchanged between the bridge and its
//! foreground clients.

use crate::model::{AlertPayload, DEFAULT_CUSTOMER_NAME};
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

static ORDER_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)order").expect("valid regex"));

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NotificationPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
}

/// A push delivery as received from the push service. Legacy senders put
/// `title`/`body`/`icon` at the top level instead of under `notification`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PushPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl PushPayload {
    /// String view of a `data` field; numbers are rendered as text.
    pub fn data_str(&self, key: &str) -> Option<String> {
        match self.data.as_ref()?.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn data_f64(&self, key: &str) -> Option<f64> {
        self.data_str(key)?.trim().parse().ok()
    }

    pub fn title(&self) -> Option<String> {
        self.notification
            .as_ref()
            .and_then(|n| n.title.clone())
            .or_else(|| self.data_str("title"))
            .or_else(|| self.title.clone())
    }

    pub fn body(&self) -> Option<String> {
        self.notification
            .as_ref()
            .and_then(|n| n.body.clone())
            .or_else(|| self.data_str("body"))
            .or_else(|| self.body.clone())
    }

    pub fn icon(&self) -> Option<String> {
        self.notification
            .as_ref()
            .and_then(|n| n.icon.clone())
            .or_else(|| self.data_str("icon"))
            .or_else(|| self.icon.clone())
    }

    pub fn is_order_notification(&self) -> bool {
        if self.data_str("type").as_deref() == Some("order") {
            return true;
        }
        let title = self.title().unwrap_or_default();
        let body = self.body().unwrap_or_default();
        ORDER_WORD.is_match(&title) || ORDER_WORD.is_match(&body)
    }

    pub fn order_id(&self) -> Option<String> {
        self.data_str("orderId").or_else(|| self.data_str("id"))
    }

    /// Pushes without an order id get a unique key, so they never collapse
    /// into another order's session.
    pub fn alert_payload(&self) -> AlertPayload {
        let order_id = self
            .order_id()
            .unwrap_or_else(|| format!("push-{}", Uuid::new_v4()));
        let customer_name = self
            .data_str("userName")
            .or_else(|| self.data_str("customerName"))
            .unwrap_or_else(|| DEFAULT_CUSTOMER_NAME.to_string());
        let total_amount = self
            .data_f64("totalAmount")
            .or_else(|| self.data_f64("totalPrice"))
            .unwrap_or(0.0);
        let item_count = self
            .data_str("itemCount")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        AlertPayload {
            order_id,
            customer_name,
            total_amount,
            item_count,
            created_at: self.data_str("timestamp").and_then(|s| parse_timestamp(&s)),
        }
    }
}

/// Epoch milliseconds or RFC 3339.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(millis) = raw.trim().parse::<i64>() {
        return Utc.timestamp_millis_opt(millis).single();
    }
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Bridge → foreground.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    FcmPushNotification {
        data: PushPayload,
        timestamp: i64,
    },
    UpdateAvailable {
        version: String,
        message: String,
    },
    /// The user activated a bridge notification; `order_id` when known.
    Focus {
        #[serde(rename = "orderId")]
        order_id: Option<String>,
    },
    FcmToken {
        token: Option<String>,
    },
}

/// Foreground → bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    SkipWaiting,
    GetFcmToken,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> PushPayload {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn classification_rules() {
        assert!(payload(json!({"data": {"type": "order"}})).is_order_notification());
        assert!(payload(json!({"notification": {"title": "New ORDER"}})).is_order_notification());
        assert!(payload(json!({"data": {"body": "an order arrived"}})).is_order_notification());
        assert!(payload(json!({"title": "Order #5"})).is_order_notification());
        assert!(!payload(json!({"notification": {"title": "Weekly report", "body": "ready"}}))
            .is_order_notification());
        assert!(!payload(json!({})).is_order_notification());
    }

    #[test]
    fn notification_part_wins_over_data() {
        let p = payload(json!({
            "notification": {"title": "A"},
            "data": {"title": "B", "body": "from data"}
        }));
        assert_eq!(p.title().as_deref(), Some("A"));
        assert_eq!(p.body().as_deref(), Some("from data"));
    }

    #[test]
    fn alert_payload_extraction() {
        let p = payload(json!({"data": {
            "type": "order",
            "orderId": "ord-2",
            "customerName": "Ravi",
            "totalPrice": "249.50",
            "itemCount": "3",
            "timestamp": "1748779200000"
        }}));
        let a = p.alert_payload();
        assert_eq!(a.order_id, "ord-2");
        assert_eq!(a.customer_name, "Ravi");
        assert_eq!(a.total_amount, 249.5);
        assert_eq!(a.item_count, 3);
        assert_eq!(a.created_at.unwrap().timestamp_millis(), 1_748_779_200_000);
    }

    #[test]
    fn pushes_without_order_id_get_unique_keys() {
        let p = payload(json!({"data": {"type": "order"}}));
        let a = p.alert_payload();
        let b = p.alert_payload();
        assert!(a.order_id.starts_with("push-"));
        assert_ne!(a.order_id, b.order_id);
        assert_eq!(a.customer_name, "Customer");
    }

    #[test]
    fn worker_message_wire_shape() {
        let msg = WorkerMessage::FcmPushNotification {
            data: payload(json!({"data": {"type": "order", "orderId": "ord-1"}})),
            timestamp: 42,
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "FCM_PUSH_NOTIFICATION");
        assert_eq!(v["data"]["data"]["orderId"], "ord-1");
        assert_eq!(v["timestamp"], 42);

        let focus = serde_json::to_value(WorkerMessage::Focus { order_id: Some("x".into()) }).unwrap();
        assert_eq!(focus, json!({"type": "FOCUS", "orderId": "x"}));

        let skip: ClientMessage = serde_json::from_value(json!({"type": "SKIP_WAITING"})).unwrap();
        assert_eq!(skip, ClientMessage::SkipWaiting);
    }
}
