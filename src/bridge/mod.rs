//! Background bridge: the long-lived context that receives pushes while no
//! foreground client may be listening.
//!
//! The bridge runs as its own task and talks to foreground clients only
//! through [`WorkerMessage`]s. It raises the OS notification for every push
//! itself and never plays audio; the foreground decides about the rest.

use crate::channels::{
    NotificationAction, NotificationOutcome, OsNotification, OsNotifier, ORDER_TAG,
};
use chrono::Utc;
use reqwest::Url;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

pub mod clients;
pub mod lifecycle;
pub mod payload;

pub use clients::{ClientId, ClientRegistry, CommandOpener, WindowOpener};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use payload::{ClientMessage, PushPayload, WorkerMessage};

pub const DEFAULT_PUSH_TITLE: &str = "🍕 New Order!";
pub const DEFAULT_PUSH_BODY: &str = "You have a new order";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error("bridge is not running")]
    Closed,
    #[error("failed to open console: {0}")]
    Open(String),
}

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub version: String,
    pub app_url: String,
    pub icon: String,
    pub push_token: Option<String>,
    /// An older bridge already controls the clients; wait for `SKIP_WAITING`.
    pub has_controller: bool,
}

impl BridgeOptions {
    pub fn from_config(cfg: &crate::config::Config, push_token: Option<String>) -> Self {
        Self {
            version: cfg.worker.version.clone(),
            app_url: cfg.app.app_url.clone(),
            icon: cfg.alerts.icon.clone(),
            push_token,
            has_controller: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Closed,
    Focused(ClientId),
    Opened(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeStatus {
    pub state: LifecycleState,
    pub clients: usize,
    pub pending: usize,
}

enum BridgeInput {
    Connect(oneshot::Sender<(ClientId, mpsc::UnboundedReceiver<WorkerMessage>)>),
    Disconnect(ClientId),
    Push(PushPayload),
    Click {
        action: Option<String>,
        order_id: Option<String>,
        reply: Option<oneshot::Sender<Result<ClickOutcome, BridgeError>>>,
    },
    Client(ClientId, ClientMessage),
    Status(oneshot::Sender<BridgeStatus>),
    Shutdown,
}

/// Cheap, cloneable sender side of a running bridge.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    tx: mpsc::UnboundedSender<BridgeInput>,
}

impl BridgeHandle {
    fn send(&self, input: BridgeInput) -> Result<(), BridgeError> {
        self.tx.send(input).map_err(|_| BridgeError::Closed)
    }

    pub async fn connect(
        &self,
    ) -> Result<(ClientId, mpsc::UnboundedReceiver<WorkerMessage>), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(BridgeInput::Connect(reply))?;
        rx.await.map_err(|_| BridgeError::Closed)
    }

    pub fn disconnect(&self, id: ClientId) -> Result<(), BridgeError> {
        self.send(BridgeInput::Disconnect(id))
    }

    pub fn push(&self, payload: PushPayload) -> Result<(), BridgeError> {
        self.send(BridgeInput::Push(payload))
    }

    /// A click on a bridge notification, with the action key if any.
    pub async fn click(
        &self,
        action: Option<String>,
        order_id: Option<String>,
    ) -> Result<ClickOutcome, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(BridgeInput::Click {
            action,
            order_id,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| BridgeError::Closed)?
    }

    pub fn client_message(&self, id: ClientId, msg: ClientMessage) -> Result<(), BridgeError> {
        self.send(BridgeInput::Client(id, msg))
    }

    pub async fn status(&self) -> Result<BridgeStatus, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(BridgeInput::Status(reply))?;
        rx.await.map_err(|_| BridgeError::Closed)
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(BridgeInput::Shutdown);
    }
}

pub struct BackgroundBridge {
    options: BridgeOptions,
    lifecycle: Lifecycle,
    clients: ClientRegistry,
    pending: VecDeque<PushPayload>,
    notifier: Arc<dyn OsNotifier>,
    opener: Arc<dyn WindowOpener>,
    notifications: Vec<JoinHandle<()>>,
    inputs: mpsc::UnboundedReceiver<BridgeInput>,
    feedback: mpsc::WeakUnboundedSender<BridgeInput>,
}

impl BackgroundBridge {
    pub fn spawn(
        options: BridgeOptions,
        notifier: Arc<dyn OsNotifier>,
        opener: Arc<dyn WindowOpener>,
    ) -> (BridgeHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = BackgroundBridge {
            lifecycle: Lifecycle::new(options.has_controller),
            options,
            clients: ClientRegistry::new(),
            pending: VecDeque::new(),
            notifier,
            opener,
            notifications: Vec::new(),
            inputs: rx,
            feedback: tx.downgrade(),
        };
        let task = tokio::spawn(bridge.run());
        (BridgeHandle { tx }, task)
    }

    #[instrument(skip_all)]
    async fn run(mut self) {
        if let Err(err) = self.install() {
            warn!(%err, "bridge install failed");
        }
        while let Some(input) = self.inputs.recv().await {
            match input {
                BridgeInput::Connect(reply) => {
                    let (id, rx) = self.clients.connect();
                    debug!(client = %id, "client connected");
                    let _ = reply.send((id, rx));
                }
                BridgeInput::Disconnect(id) => {
                    self.clients.disconnect(id);
                }
                BridgeInput::Push(payload) => self.on_push(payload),
                BridgeInput::Click {
                    action,
                    order_id,
                    reply,
                } => {
                    let outcome = self.on_click(action, order_id).await;
                    match reply {
                        Some(reply) => {
                            let _ = reply.send(outcome);
                        }
                        None => {
                            if let Err(err) = outcome {
                                warn!(%err, "notification click not handled");
                            }
                        }
                    }
                }
                BridgeInput::Client(id, msg) => self.on_client_message(id, msg),
                BridgeInput::Status(reply) => {
                    let _ = reply.send(BridgeStatus {
                        state: self.lifecycle.state(),
                        clients: self.clients.len(),
                        pending: self.pending.len(),
                    });
                }
                BridgeInput::Shutdown => break,
            }
        }
        for task in self.notifications.drain(..) {
            task.abort();
        }
        info!("bridge stopped");
    }

    fn install(&mut self) -> Result<(), BridgeError> {
        self.lifecycle.transition(LifecycleState::Installed)?;
        info!(version = %self.options.version, "bridge installed");
        match self.lifecycle.after_install()? {
            LifecycleState::Activating => self.activate(),
            state => {
                info!(%state, "bridge waiting for the current controller");
                Ok(())
            }
        }
    }

    fn activate(&mut self) -> Result<(), BridgeError> {
        self.lifecycle.transition(LifecycleState::Active)?;
        let notice = WorkerMessage::UpdateAvailable {
            version: self.options.version.clone(),
            message: format!(
                "Order alerts updated to {}. Reload to use the new version.",
                self.options.version
            ),
        };
        let reached = self.clients.broadcast(&notice);
        info!(clients = reached, pending = self.pending.len(), "bridge active");
        while let Some(payload) = self.pending.pop_front() {
            self.deliver(payload);
        }
        Ok(())
    }

    fn on_push(&mut self, payload: PushPayload) {
        if !self.lifecycle.is_active() {
            debug!(state = %self.lifecycle.state(), "push queued until activation");
            self.pending.push_back(payload);
            return;
        }
        self.deliver(payload);
    }

    fn deliver(&mut self, payload: PushPayload) {
        let notification = self.notification_for(&payload);
        let order_id = notification.order_id.clone();
        self.show(notification);
        let reached = self.clients.broadcast(&WorkerMessage::FcmPushNotification {
            data: payload,
            timestamp: Utc::now().timestamp_millis(),
        });
        info!(order_id = ?order_id, clients = reached, "push relayed");
    }

    fn notification_for(&self, payload: &PushPayload) -> OsNotification {
        OsNotification {
            title: payload
                .title()
                .unwrap_or_else(|| DEFAULT_PUSH_TITLE.to_string()),
            body: payload
                .body()
                .unwrap_or_else(|| DEFAULT_PUSH_BODY.to_string()),
            icon: payload.icon().unwrap_or_else(|| self.options.icon.clone()),
            tag: ORDER_TAG.to_string(),
            require_interaction: true,
            actions: vec![NotificationAction {
                action: "open".to_string(),
                title: "View Order".to_string(),
            }],
            order_id: payload.order_id(),
        }
    }

    fn show(&mut self, notification: OsNotification) {
        self.notifications.retain(|t| !t.is_finished());
        let notifier = self.notifier.clone();
        let feedback = self.feedback.clone();
        self.notifications.push(tokio::spawn(async move {
            match notifier.show(&notification).await {
                Ok(NotificationOutcome::Activated { action }) => {
                    if let Some(tx) = feedback.upgrade() {
                        let _ = tx.send(BridgeInput::Click {
                            action,
                            order_id: notification.order_id.clone(),
                            reply: None,
                        });
                    }
                }
                Ok(outcome) => debug!(?outcome, "bridge notification finished"),
                Err(err) => warn!(%err, "bridge notification failed"),
            }
        }));
    }

    async fn on_click(
        &mut self,
        action: Option<String>,
        order_id: Option<String>,
    ) -> Result<ClickOutcome, BridgeError> {
        debug!(?action, ?order_id, "notification closed after click");
        match action.as_deref().filter(|a| !a.is_empty()) {
            Some("close") | Some("dismiss") => Ok(ClickOutcome::Closed),
            Some("open") | Some("view") | Some("explore") => {
                let url = match &order_id {
                    Some(id) => self.order_url(id),
                    None => self.options.app_url.clone(),
                };
                self.focus_or_open(order_id, url).await
            }
            _ => {
                let url = self.options.app_url.clone();
                self.focus_or_open(order_id, url).await
            }
        }
    }

    async fn focus_or_open(
        &mut self,
        order_id: Option<String>,
        url: String,
    ) -> Result<ClickOutcome, BridgeError> {
        if let Some(id) = self.clients.focus(WorkerMessage::Focus { order_id }) {
            return Ok(ClickOutcome::Focused(id));
        }
        self.opener.open(&url).await?;
        Ok(ClickOutcome::Opened(url))
    }

    fn order_url(&self, order_id: &str) -> String {
        match Url::parse(&self.options.app_url) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("order", order_id);
                url.to_string()
            }
            Err(_) => format!("{}?order={}", self.options.app_url, order_id),
        }
    }

    fn on_client_message(&mut self, id: ClientId, msg: ClientMessage) {
        match msg {
            ClientMessage::SkipWaiting => match self.lifecycle.skip_waiting() {
                Ok(true) => {
                    if let Err(err) = self.activate() {
                        warn!(%err, "bridge activation failed");
                    }
                }
                Ok(false) => debug!(state = %self.lifecycle.state(), "skip waiting noted"),
                Err(err) => warn!(%err, "skip waiting rejected"),
            },
            ClientMessage::GetFcmToken => {
                let token = self.options.push_token.clone();
                if !self.clients.send(id, WorkerMessage::FcmToken { token }) {
                    debug!(client = %id, "token request from unknown client");
                }
            }
        }
    }
}
