//! Row models returned by the storage repository.

use chrono::{DateTime, Utc};

/// One `local_storage` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}
