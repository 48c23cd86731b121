use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    #[serde(rename = "Payment Awaited")]
    PaymentAwaited,
    Accepted,
    Ready,
    Delivered,
    Rejected,
    #[serde(other)]
    Unknown,
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Unknown
    }
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::PaymentAwaited => "Payment Awaited",
            OrderStatus::Accepted => "Accepted",
            OrderStatus::Ready => "Ready",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Rejected => "Rejected",
            OrderStatus::Unknown => "Unknown",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(OrderStatus::Pending),
            "payment awaited" | "payment_awaited" => Some(OrderStatus::PaymentAwaited),
            "accepted" | "accept" => Some(OrderStatus::Accepted),
            "ready" => Some(OrderStatus::Ready),
            "delivered" => Some(OrderStatus::Delivered),
            "rejected" | "reject" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }

    /// Orders that still need a decision from staff.
    pub fn is_actionable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::PaymentAwaited)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub name: String,
    #[serde(default)]
    pub qty: u32,
    #[serde(default, deserialize_with = "lenient_price")]
    pub price: f64,
}

/// An order document as stored in the `orders` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub subtotal: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub delivery_charge: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_amount: Option<f64>,
    #[serde(default)]
    pub payment_method: Option<String>,
    /// Missing means [`OrderStatus::Unknown`], which never alerts.
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

// Older documents store amounts as strings and timestamps in several shapes.
// Anything unreadable becomes `None` rather than failing the whole document.

fn amount_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn lenient_amount<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?.as_ref().and_then(amount_from))
}

fn lenient_price<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(lenient_amount(d)?.unwrap_or(0.0))
}

/// RFC 3339 strings, epoch milliseconds, or `{seconds, nanoseconds}` objects.
fn timestamp_from(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))?
                .as_i64()?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Utc.timestamp_opt(seconds, u32::try_from(nanos).ok()?).single()
        }
        _ => None,
    }
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?.as_ref().and_then(timestamp_from))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        }
    }
}

/// One change delivered by a feed subscription. Consumed once, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub order: Order,
    pub kind: ChangeKind,
    /// Sequence position within the subscription.
    pub position: u64,
    /// True for every change that belongs to the first snapshot delivery.
    pub initial: bool,
}

/// Which path produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOrigin {
    ChangeFeed,
    Push,
}

/// Normalized alert content shared by every channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub order_id: String,
    pub customer_name: String,
    pub total_amount: f64,
    pub item_count: usize,
    pub created_at: Option<DateTime<Utc>>,
}

pub const DEFAULT_CUSTOMER_NAME: &str = "Customer";

impl AlertPayload {
    pub fn from_order(order: &Order) -> Self {
        let customer_name = order
            .user_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_CUSTOMER_NAME)
            .to_string();
        Self {
            order_id: order.id.clone(),
            customer_name,
            total_amount: order.total_amount.unwrap_or(0.0),
            item_count: order.items.len(),
            created_at: order.timestamp,
        }
    }

    /// `"Asha • ₹599"`
    pub fn headline(&self) -> String {
        format!("{} • ₹{}", self.customer_name, format_amount(self.total_amount))
    }
}

/// Whole amounts print without decimals, everything else with two.
pub fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{:.0}", amount)
    } else {
        format!("{:.2}", amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_parses_camel_case_document() {
        let order: Order = serde_json::from_value(json!({
            "id": "ord-1",
            "userName": "Asha",
            "items": [{"name": "Margherita", "qty": 2, "price": 249.5}],
            "deliveryCharge": 100,
            "totalAmount": 599,
            "status": "Payment Awaited",
            "timestamp": "2025-06-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(order.status, OrderStatus::PaymentAwaited);
        assert_eq!(order.items[0].qty, 2);
        assert_eq!(order.delivery_charge, Some(100.0));
        assert!(order.timestamp.is_some());
    }

    #[test]
    fn unknown_status_is_not_actionable() {
        let order: Order =
            serde_json::from_value(json!({"id": "x", "status": "Cooking"})).unwrap();
        assert_eq!(order.status, OrderStatus::Unknown);
        assert!(!order.status.is_actionable());
    }

    #[test]
    fn payload_defaults_missing_fields() {
        let order: Order = serde_json::from_value(json!({"id": "x", "status": "Pending"})).unwrap();
        let payload = AlertPayload::from_order(&order);
        assert_eq!(payload.customer_name, "Customer");
        assert_eq!(payload.total_amount, 0.0);
        assert_eq!(payload.item_count, 0);
        assert_eq!(payload.headline(), "Customer • ₹0");
    }

    #[test]
    fn legacy_field_shapes_are_tolerated() {
        let order: Order = serde_json::from_value(json!({
            "id": "legacy",
            "items": [{"name": "Garlic bread", "qty": 1, "price": "99.5"}],
            "totalAmount": "250",
            "subtotal": "n/a",
            "timestamp": {"seconds": 1_736_000_000, "nanoseconds": 0}
        }))
        .unwrap();
        assert_eq!(order.status, OrderStatus::Unknown);
        assert_eq!(order.total_amount, Some(250.0));
        assert_eq!(order.subtotal, None);
        assert_eq!(order.items[0].price, 99.5);
        assert_eq!(order.timestamp.unwrap().timestamp(), 1_736_000_000);

        let order: Order = serde_json::from_value(json!({
            "id": "odd",
            "status": "Pending",
            "timestamp": "yesterday",
            "deliveryCharge": null
        }))
        .unwrap();
        assert!(order.timestamp.is_none());
        assert!(order.delivery_charge.is_none());

        let order: Order =
            serde_json::from_value(json!({"id": "ms", "status": "Pending", "timestamp": 1_736_000_000_123_i64}))
                .unwrap();
        assert_eq!(order.timestamp.unwrap().timestamp_millis(), 1_736_000_000_123);
    }

    #[test]
    fn amounts_format_like_receipts() {
        assert_eq!(format_amount(599.0), "599");
        assert_eq!(format_amount(12.5), "12.50");
    }

    #[test]
    fn status_parsing_accepts_console_words() {
        assert_eq!(OrderStatus::parse_status("accept"), Some(OrderStatus::Accepted));
        assert_eq!(OrderStatus::parse_status("Payment Awaited"), Some(OrderStatus::PaymentAwaited));
        assert_eq!(OrderStatus::parse_status("nope"), None);
    }
}
