//! Approve/reject decisions for order alerts.
//!
//! Rules run in a fixed order and the first failing rule decides the reason.
//! Approval stamps `last_notification`, which drives the cooldown rule.

use crate::bridge::payload::PushPayload;
use crate::model::{AlertPayload, ChangeEvent, ChangeKind};
use crate::settings::NotificationSettings;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InitialSnapshot,
    NotAdded,
    NotActionable,
    Stale,
    Disabled,
    Cooldown,
    NotOrder,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InitialSnapshot => "initial_snapshot",
            RejectReason::NotAdded => "not_added",
            RejectReason::NotActionable => "not_actionable",
            RejectReason::Stale => "stale",
            RejectReason::Disabled => "disabled",
            RejectReason::Cooldown => "cooldown",
            RejectReason::NotOrder => "not_order",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Approve(AlertPayload),
    Reject(RejectReason),
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approve(_))
    }
}

/// Process-wide suppression state; reset when the process restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuppressionState {
    pub last_notification: Option<DateTime<Utc>>,
    pub notifications_disabled: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct NotificationPolicy {
    freshness_window: Duration,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS_WINDOW)
    }
}

impl NotificationPolicy {
    pub fn new(freshness_window: Duration) -> Self {
        Self { freshness_window }
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    pub fn should_alert(
        &self,
        event: &ChangeEvent,
        settings: &NotificationSettings,
        state: &mut SuppressionState,
        now: DateTime<Utc>,
    ) -> Decision {
        if event.initial {
            return Decision::Reject(RejectReason::InitialSnapshot);
        }
        if event.kind != ChangeKind::Added {
            return Decision::Reject(RejectReason::NotAdded);
        }
        if !event.order.status.is_actionable() {
            return Decision::Reject(RejectReason::NotActionable);
        }
        if let Some(created) = event.order.timestamp {
            if elapsed(created, now) > self.freshness_window {
                return Decision::Reject(RejectReason::Stale);
            }
        }
        if let Some(reason) = gate(settings, state, now) {
            return Decision::Reject(reason);
        }
        state.last_notification = Some(now);
        Decision::Approve(AlertPayload::from_order(&event.order))
    }

    /// Gate for push-originated alerts. The bridge has already classified and
    /// shown the push, so only the order check and the user's switch apply;
    /// de-duplication against an existing session happens in the fanout.
    pub fn push_decision(
        &self,
        payload: &PushPayload,
        state: &mut SuppressionState,
        now: DateTime<Utc>,
    ) -> Decision {
        if !payload.is_order_notification() {
            return Decision::Reject(RejectReason::NotOrder);
        }
        if state.notifications_disabled {
            return Decision::Reject(RejectReason::Disabled);
        }
        state.last_notification = Some(now);
        Decision::Approve(payload.alert_payload())
    }
}

fn gate(
    settings: &NotificationSettings,
    state: &SuppressionState,
    now: DateTime<Utc>,
) -> Option<RejectReason> {
    if state.notifications_disabled {
        return Some(RejectReason::Disabled);
    }
    if let Some(last) = state.last_notification {
        if elapsed(last, now) < settings.cooldown() {
            return Some(RejectReason::Cooldown);
        }
    }
    None
}

/// Clock skew (timestamps in the future) counts as zero elapsed time.
fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    to.signed_duration_since(from).to_std().unwrap_or(Duration::ZERO)
}
