//! Persisted notification preferences and suppression flags.
use crate::db::{self, keys, Pool};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

pub const MIN_LOOP_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings: {0}")]
    Invalid(&'static str),
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// User preferences read on every policy decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    pub loop_enabled: bool,
    pub loop_interval_ms: u64,
    pub cooldown_ms: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            loop_enabled: false,
            loop_interval_ms: 5_000,
            cooldown_ms: 0,
        }
    }
}

impl NotificationSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.loop_interval_ms < MIN_LOOP_INTERVAL_MS {
            return Err(SettingsError::Invalid("loopIntervalMs must be >= 1000"));
        }
        Ok(())
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Typed access to the durable storage keys this crate owns.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    pool: Pool,
}

impl SettingsStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Stored settings, or defaults when absent, malformed or out of range.
    #[instrument(skip_all)]
    pub async fn load(&self) -> NotificationSettings {
        let raw = match db::get_item(&self.pool, keys::SETTINGS).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return NotificationSettings::default(),
            Err(err) => {
                warn!(?err, "failed to read notification settings; using defaults");
                return NotificationSettings::default();
            }
        };
        match serde_json::from_str::<NotificationSettings>(&raw) {
            Ok(settings) if settings.validate().is_ok() => settings,
            Ok(_) => {
                warn!(raw = %raw, "stored notification settings out of range; using defaults");
                NotificationSettings::default()
            }
            Err(err) => {
                warn!(?err, raw = %raw, "malformed notification settings; using defaults");
                NotificationSettings::default()
            }
        }
    }

    #[instrument(skip_all)]
    pub async fn save(
        &self,
        settings: NotificationSettings,
    ) -> Result<NotificationSettings, SettingsError> {
        settings.validate()?;
        let raw = serde_json::to_string(&settings)?;
        db::set_item(&self.pool, keys::SETTINGS, &raw).await?;
        info!(
            loop_enabled = settings.loop_enabled,
            loop_interval_ms = settings.loop_interval_ms,
            cooldown_ms = settings.cooldown_ms,
            "saved notification settings"
        );
        Ok(settings)
    }

    /// Unreadable storage counts as "enabled".
    pub async fn notifications_disabled(&self) -> bool {
        match db::get_item(&self.pool, keys::NOTIFICATIONS_DISABLED).await {
            Ok(value) => value.as_deref() == Some("true"),
            Err(err) => {
                warn!(?err, "failed to read notification toggle");
                false
            }
        }
    }

    pub async fn set_notifications_disabled(&self, disabled: bool) -> Result<(), SettingsError> {
        if disabled {
            db::set_item(&self.pool, keys::NOTIFICATIONS_DISABLED, "true").await?;
        } else {
            db::remove_item(&self.pool, keys::NOTIFICATIONS_DISABLED).await?;
        }
        info!(disabled, "order notifications toggled");
        Ok(())
    }

    /// Flip the toggle and return the new "disabled" value.
    pub async fn toggle_notifications(&self) -> Result<bool, SettingsError> {
        let disabled = !self.notifications_disabled().await;
        self.set_notifications_disabled(disabled).await?;
        Ok(disabled)
    }

    pub async fn record_last_notification(&self, at: DateTime<Utc>) -> Result<(), SettingsError> {
        db::set_item(
            &self.pool,
            keys::LAST_NOTIFICATION,
            &at.timestamp_millis().to_string(),
        )
        .await?;
        Ok(())
    }

    pub async fn last_notification(&self) -> Option<DateTime<Utc>> {
        let raw = db::get_item(&self.pool, keys::LAST_NOTIFICATION).await.ok()??;
        let millis = raw.trim().parse::<i64>().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    pub async fn push_token(&self) -> Option<String> {
        db::get_item(&self.pool, keys::PUSH_TOKEN).await.ok().flatten()
    }

    pub async fn set_push_token(&self, token: &str) -> Result<(), SettingsError> {
        db::set_item(&self.pool, keys::PUSH_TOKEN, token).await?;
        Ok(())
    }
}
