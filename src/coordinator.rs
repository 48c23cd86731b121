//! The foreground owner of all alert state.
//!
//! One task processes one input at a time: feed deliveries, bridge messages,
//! user commands and the fanout's own timer events. Policy decisions and the
//! session table are therefore never raced, even when the same order arrives
//! through the change feed and a push at nearly the same moment.
//!
//! Settings and the notification switch are re-read from storage before each
//! decision, so changes written by `alert-settings` apply immediately.

use crate::bridge::WorkerMessage;
use crate::channels::{Permission, StatusKind};
use crate::fanout::{AlertChannelFanout, CancelReason, FanoutEvent, FireOutcome};
use crate::feed::{ChangeFeed, FeedDelivery};
use crate::model::{AlertOrigin, AlertPayload, ChangeEvent, ChangeKind, OrderStatus};
use crate::orders::{OrderStore, OrderStoreError};
use crate::policy::{Decision, NotificationPolicy, SuppressionState};
use crate::settings::{NotificationSettings, SettingsError, SettingsStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("coordinator is not running")]
    Closed,
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Orders(#[from] OrderStoreError),
}

/// Point-in-time view of the coordinator, for the console and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSnapshot {
    pub settings: NotificationSettings,
    pub suppression: SuppressionState,
    pub active_sessions: Vec<String>,
}

enum Input {
    Feed(FeedDelivery),
    Worker(WorkerMessage),
    Dismiss(String, CancelReason, oneshot::Sender<bool>),
    UpdateStatus(String, OrderStatus, oneshot::Sender<Result<(), CoordinatorError>>),
    Delete(String, oneshot::Sender<Result<(), CoordinatorError>>),
    SaveSettings(
        NotificationSettings,
        oneshot::Sender<Result<NotificationSettings, CoordinatorError>>,
    ),
    SetDisabled(Option<bool>, oneshot::Sender<Result<bool, CoordinatorError>>),
    RequestPermission(oneshot::Sender<Permission>),
    Snapshot(oneshot::Sender<CoordinatorSnapshot>),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Input>,
}

impl CoordinatorHandle {
    async fn send(&self, input: Input) -> Result<(), CoordinatorError> {
        self.tx.send(input).await.map_err(|_| CoordinatorError::Closed)
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Input,
    ) -> Result<T, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| CoordinatorError::Closed)
    }

    pub async fn feed(&self, delivery: FeedDelivery) -> Result<(), CoordinatorError> {
        self.send(Input::Feed(delivery)).await
    }

    pub async fn worker_message(&self, msg: WorkerMessage) -> Result<(), CoordinatorError> {
        self.send(Input::Worker(msg)).await
    }

    /// Card click or close button. Returns whether a session was active.
    pub async fn dismiss(&self, order_id: &str, reason: CancelReason) -> Result<bool, CoordinatorError> {
        let id = order_id.to_string();
        self.call(|reply| Input::Dismiss(id, reason, reply)).await
    }

    pub async fn update_status(&self, order_id: &str, status: OrderStatus) -> Result<(), CoordinatorError> {
        let id = order_id.to_string();
        self.call(|reply| Input::UpdateStatus(id, status, reply)).await?
    }

    pub async fn delete_order(&self, order_id: &str) -> Result<(), CoordinatorError> {
        let id = order_id.to_string();
        self.call(|reply| Input::Delete(id, reply)).await?
    }

    pub async fn save_settings(
        &self,
        settings: NotificationSettings,
    ) -> Result<NotificationSettings, CoordinatorError> {
        self.call(|reply| Input::SaveSettings(settings, reply)).await?
    }

    /// Returns the new disabled flag.
    pub async fn set_notifications_disabled(&self, disabled: bool) -> Result<bool, CoordinatorError> {
        self.call(|reply| Input::SetDisabled(Some(disabled), reply)).await?
    }

    pub async fn toggle_notifications(&self) -> Result<bool, CoordinatorError> {
        self.call(|reply| Input::SetDisabled(None, reply)).await?
    }

    pub async fn request_permission(&self) -> Result<Permission, CoordinatorError> {
        self.call(Input::RequestPermission).await
    }

    pub async fn snapshot(&self) -> Result<CoordinatorSnapshot, CoordinatorError> {
        self.call(Input::Snapshot).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Input::Shutdown).await;
    }
}

pub struct NotificationCoordinator {
    policy: NotificationPolicy,
    state: SuppressionState,
    settings: NotificationSettings,
    fanout: AlertChannelFanout,
    fanout_events: mpsc::UnboundedReceiver<FanoutEvent>,
    store: SettingsStore,
    orders: Arc<dyn OrderStore>,
    inputs: mpsc::Receiver<Input>,
    permission_hint_shown: bool,
}

impl NotificationCoordinator {
    /// Reads the persisted settings and disabled flag. The last notification
    /// time starts empty in every process.
    pub async fn new(
        policy: NotificationPolicy,
        fanout: (AlertChannelFanout, mpsc::UnboundedReceiver<FanoutEvent>),
        store: SettingsStore,
        orders: Arc<dyn OrderStore>,
    ) -> (Self, CoordinatorHandle) {
        let (tx, rx) = mpsc::channel(256);
        let settings = store.load().await;
        let state = SuppressionState {
            last_notification: None,
            notifications_disabled: store.notifications_disabled().await,
        };
        info!(
            loop_enabled = settings.loop_enabled,
            loop_interval_ms = settings.loop_interval_ms,
            cooldown_ms = settings.cooldown_ms,
            disabled = state.notifications_disabled,
            "coordinator ready"
        );
        let (fanout, fanout_events) = fanout;
        (
            Self {
                policy,
                state,
                settings,
                fanout,
                fanout_events,
                store,
                orders,
                inputs: rx,
                permission_hint_shown: false,
            },
            CoordinatorHandle { tx },
        )
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    #[instrument(skip_all)]
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                input = self.inputs.recv() => match input {
                    Some(Input::Shutdown) | None => break,
                    Some(input) => self.handle(input).await,
                },
                Some(event) = self.fanout_events.recv() => {
                    if let Some(reason) = self.fanout.on_event(event).await {
                        debug!(reason = reason.as_str(), "session ended by timer or click");
                    }
                }
            }
        }
        let ended = self.fanout.cancel_all(CancelReason::Shutdown).await;
        info!(sessions = ended, "coordinator stopped");
    }

    async fn handle(&mut self, input: Input) {
        match input {
            Input::Feed(delivery) => self.on_feed(delivery).await,
            Input::Worker(msg) => self.on_worker_message(msg).await,
            Input::Dismiss(order_id, reason, reply) => {
                let _ = reply.send(self.fanout.cancel(&order_id, reason).await);
            }
            Input::UpdateStatus(order_id, status, reply) => {
                self.fanout.cancel(&order_id, CancelReason::StatusChange).await;
                let res = self.orders.update_status(&order_id, status).await;
                if let Err(err) = &res {
                    warn!(order_id = %order_id, %err, "status update failed");
                }
                let _ = reply.send(res.map_err(Into::into));
            }
            Input::Delete(order_id, reply) => {
                self.fanout.cancel(&order_id, CancelReason::StatusChange).await;
                let res = self.orders.delete(&order_id).await;
                if let Err(err) = &res {
                    warn!(order_id = %order_id, %err, "order delete failed");
                }
                let _ = reply.send(res.map_err(Into::into));
            }
            Input::SaveSettings(settings, reply) => {
                let res = self.store.save(settings).await;
                if let Ok(saved) = &res {
                    self.settings = *saved;
                    self.fanout.apply_settings(saved);
                }
                let _ = reply.send(res.map_err(Into::into));
            }
            Input::SetDisabled(disabled, reply) => {
                let next = disabled.unwrap_or(!self.state.notifications_disabled);
                let res = self.store.set_notifications_disabled(next).await;
                if res.is_ok() {
                    self.state.notifications_disabled = next;
                    info!(disabled = next, "order notifications switched");
                }
                let _ = reply.send(res.map(|_| next).map_err(Into::into));
            }
            Input::RequestPermission(reply) => {
                let permission = self.request_permission().await;
                let _ = reply.send(permission);
            }
            Input::Snapshot(reply) => {
                self.reload_preferences().await;
                let _ = reply.send(CoordinatorSnapshot {
                    settings: self.settings,
                    suppression: self.state.clone(),
                    active_sessions: self.fanout.active_sessions(),
                });
            }
            Input::Shutdown => {}
        }
    }

    async fn on_feed(&mut self, delivery: FeedDelivery) {
        match delivery {
            FeedDelivery::Changes { events, initial } => {
                if !events.is_empty() {
                    self.reload_preferences().await;
                }
                if initial {
                    debug!(count = events.len(), "initial snapshot suppressed");
                }
                for event in events {
                    self.on_change(event).await;
                }
            }
            FeedDelivery::Closed(reason) => {
                warn!(?reason, "order feed closed");
            }
        }
    }

    async fn on_change(&mut self, event: ChangeEvent) {
        let order_id = event.order.id.clone();
        // A status change or removal made elsewhere acknowledges the alert.
        let settled = match event.kind {
            ChangeKind::Removed => true,
            ChangeKind::Modified => !event.order.status.is_actionable(),
            ChangeKind::Added => false,
        };
        if settled && !event.initial {
            self.fanout.cancel(&order_id, CancelReason::StatusChange).await;
        }

        let now = Utc::now();
        match self
            .policy
            .should_alert(&event, &self.settings, &mut self.state, now)
        {
            Decision::Approve(payload) => self.fire(payload, AlertOrigin::ChangeFeed).await,
            Decision::Reject(reason) => {
                debug!(
                    order_id = %order_id,
                    kind = event.kind.as_str(),
                    position = event.position,
                    reason = reason.as_str(),
                    "change not alerted"
                );
            }
        }
    }

    async fn on_worker_message(&mut self, msg: WorkerMessage) {
        match msg {
            WorkerMessage::FcmPushNotification { data, timestamp } => {
                self.reload_preferences().await;
                let now = Utc::now();
                match self.policy.push_decision(&data, &mut self.state, now) {
                    Decision::Approve(payload) => self.fire(payload, AlertOrigin::Push).await,
                    Decision::Reject(reason) => {
                        debug!(timestamp, reason = reason.as_str(), "push not alerted");
                    }
                }
            }
            WorkerMessage::Focus { order_id } => match order_id {
                Some(id) => {
                    self.fanout.cancel(&id, CancelReason::BridgeFocus).await;
                }
                None => debug!("focus without order id"),
            },
            WorkerMessage::UpdateAvailable { version, message } => {
                info!(%version, "bridge updated");
                let visual = self.fanout.channels().visual.clone();
                if let Err(err) = visual.show_status(StatusKind::Success, &message).await {
                    debug!(%err, "update notice not shown");
                }
            }
            WorkerMessage::FcmToken { token } => {
                debug!(present = token.is_some(), "push token reported by bridge");
            }
        }
    }

    /// Storage is shared with `alert-settings`, so preferences are read again
    /// before every decision.
    async fn reload_preferences(&mut self) {
        let settings = self.store.load().await;
        if settings != self.settings {
            info!(
                loop_enabled = settings.loop_enabled,
                loop_interval_ms = settings.loop_interval_ms,
                cooldown_ms = settings.cooldown_ms,
                "notification settings changed in storage"
            );
            self.fanout.apply_settings(&settings);
            self.settings = settings;
        }
        let disabled = self.store.notifications_disabled().await;
        if disabled != self.state.notifications_disabled {
            info!(disabled, "order notification switch changed in storage");
            self.state.notifications_disabled = disabled;
        }
    }

    async fn fire(&mut self, payload: AlertPayload, origin: AlertOrigin) {
        let order_id = payload.order_id.clone();
        let outcome = self.fanout.fire(payload, origin, &self.settings).await;
        if outcome == FireOutcome::Created {
            if let Some(at) = self.state.last_notification {
                if let Err(err) = self.store.record_last_notification(at).await {
                    warn!(order_id = %order_id, %err, "failed to record last notification");
                }
            }
        }
        debug!(order_id = %order_id, ?outcome, origin = ?origin, "alert fired");
    }

    async fn request_permission(&mut self) -> Permission {
        let channels = self.fanout.channels().clone();
        let permission = channels.os.request_permission().await;
        let status = match permission {
            Permission::Granted => Some((StatusKind::Success, "Desktop notifications enabled.")),
            Permission::Denied | Permission::Default if !self.permission_hint_shown => {
                self.permission_hint_shown = true;
                Some((
                    StatusKind::Warning,
                    "Desktop notifications are unavailable. Alerts will use sound and the console card; install a notify-send compatible notifier to enable them.",
                ))
            }
            _ => None,
        };
        if let Some((kind, message)) = status {
            if let Err(err) = channels.visual.show_status(kind, message).await {
                debug!(%err, "permission status not shown");
            }
        }
        permission
    }
}

/// Keeps a change-feed subscription alive for the coordinator: forwards every
/// delivery, and after a closed subscription waits `reconnect_delay` and
/// subscribes again. Returns when the coordinator is gone.
pub async fn follow_feed(
    feed: Arc<dyn ChangeFeed>,
    handle: CoordinatorHandle,
    reconnect_delay: Duration,
) {
    loop {
        let (tx, mut rx) = mpsc::channel(64);
        let subscription = match feed.subscribe(tx).await {
            Ok(sub) => sub,
            Err(err) => {
                warn!(%err, "order feed subscribe failed");
                tokio::time::sleep(reconnect_delay).await;
                continue;
            }
        };
        info!(subscription = %subscription.id(), "following order feed");
        while let Some(delivery) = rx.recv().await {
            let closed = matches!(delivery, FeedDelivery::Closed(_));
            if handle.feed(delivery).await.is_err() {
                subscription.unsubscribe();
                return;
            }
            if closed {
                break;
            }
        }
        subscription.unsubscribe();
        tokio::time::sleep(reconnect_delay).await;
    }
}
