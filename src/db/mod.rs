//! Database module: durable client-local storage backed by SQLite.
//!
//! - `model`: the row type returned by repositories.
//! - `repo`: SQL-only functions over the `local_storage` key/value table.
//!
//! Callers import from `order_bell::db`; the repository API is re-exported.

pub mod model;
pub mod repo;

pub use model::StorageEntry;
pub use repo::*;

/// Keys used in `local_storage`.
pub mod keys {
    pub const PUSH_TOKEN: &str = "fcmToken";
    pub const NOTIFICATIONS_DISABLED: &str = "disableOrderNotifications";
    pub const LAST_NOTIFICATION: &str = "lastOrderNotification";
    pub const SETTINGS: &str = "adminNotificationSettings";
}
