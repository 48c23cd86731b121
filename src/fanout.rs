//! Dispatch of approved alerts to the audio, visual and OS channels.
//!
//! Sessions are keyed by order id: firing for an order that already has a
//! session only refreshes it. Every timer a session owns runs as its own task
//! and reports back through the [`FanoutEvent`] queue; events carry the
//! session generation (and, for restartable timers, an epoch) so that stale
//! events from a cancelled or refreshed timer are ignored.

use crate::channels::{
    AlertCard, AudioChannel, ChannelKind, NotificationOutcome, OsNotification, OsNotifier,
    Permission, VisualChannel,
};
use crate::model::{AlertOrigin, AlertPayload};
use crate::settings::NotificationSettings;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Channels {
    pub audio: Arc<dyn AudioChannel>,
    pub visual: Arc<dyn VisualChannel>,
    pub os: Arc<dyn OsNotifier>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutOptions {
    pub card_display: Duration,
    pub session_expiry: Duration,
    /// Delay before a feed-originated OS notification when a bridge is
    /// attached. A push for the same order inside the window suppresses it.
    pub os_defer: Duration,
    pub bridge_attached: bool,
    pub icon: String,
}

impl Default for FanoutOptions {
    fn default() -> Self {
        Self {
            card_display: Duration::from_millis(8_000),
            session_expiry: Duration::from_secs(600),
            os_defer: Duration::from_millis(1_000),
            bridge_attached: false,
            icon: String::new(),
        }
    }
}

impl FanoutOptions {
    pub fn from_config(alerts: &crate::config::Alerts, bridge_attached: bool) -> Self {
        Self {
            card_display: alerts.card_display(),
            session_expiry: alerts.session_expiry(),
            os_defer: alerts.os_defer(),
            bridge_attached,
            icon: alerts.icon.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutEvent {
    RepeatDue {
        order_id: String,
        generation: u64,
        epoch: u64,
    },
    CardExpired {
        order_id: String,
        generation: u64,
    },
    OsDue {
        order_id: String,
        generation: u64,
    },
    SessionExpired {
        order_id: String,
        generation: u64,
        epoch: u64,
    },
    OsActivated {
        order_id: String,
        generation: u64,
        action: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    CardClick,
    CloseButton,
    OsClick,
    BridgeFocus,
    StatusChange,
    Expired,
    Shutdown,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::CardClick => "card_click",
            CancelReason::CloseButton => "close_button",
            CancelReason::OsClick => "os_click",
            CancelReason::BridgeFocus => "bridge_focus",
            CancelReason::StatusChange => "status_change",
            CancelReason::Expired => "expired",
            CancelReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Created,
    Refreshed,
}

/// Ephemeral per-order alert state. Dropping it aborts every timer and any
/// in-flight playback or OS notification it started.
#[derive(Debug)]
pub struct AlertSession {
    pub order_id: String,
    pub payload: AlertPayload,
    pub channels_fired: BTreeSet<ChannelKind>,
    pub first_fired_at: DateTime<Utc>,
    /// The OS notification for this order was raised by the bridge.
    pub bridge_notified: bool,
    pub audio_plays: u32,
    generation: u64,
    epoch: u64,
    card_visible: bool,
    repeat_timer: Option<JoinHandle<()>>,
    card_timer: Option<JoinHandle<()>>,
    os_timer: Option<JoinHandle<()>>,
    expiry_timer: Option<JoinHandle<()>>,
    audio_task: Option<JoinHandle<()>>,
    os_task: Option<JoinHandle<()>>,
}

impl AlertSession {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn card_visible(&self) -> bool {
        self.card_visible
    }

    pub fn is_repeating(&self) -> bool {
        self.repeat_timer.is_some()
    }

    fn abort_repeat(&mut self) {
        if let Some(t) = self.repeat_timer.take() {
            t.abort();
        }
    }
}

impl Drop for AlertSession {
    fn drop(&mut self) {
        for handle in [
            self.repeat_timer.take(),
            self.card_timer.take(),
            self.os_timer.take(),
            self.expiry_timer.take(),
            self.audio_task.take(),
            self.os_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

pub struct AlertChannelFanout {
    channels: Channels,
    options: FanoutOptions,
    sessions: HashMap<String, AlertSession>,
    next_generation: u64,
    events: mpsc::UnboundedSender<FanoutEvent>,
}

impl std::fmt::Debug for AlertChannelFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertChannelFanout")
            .field("options", &self.options)
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl AlertChannelFanout {
    /// The receiver must be drained by the owner and each event handed back
    /// to [`AlertChannelFanout::on_event`].
    pub fn new(
        channels: Channels,
        options: FanoutOptions,
    ) -> (Self, mpsc::UnboundedReceiver<FanoutEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                channels,
                options,
                sessions: HashMap::new(),
                next_generation: 0,
                events: tx,
            },
            rx,
        )
    }

    pub fn options(&self) -> &FanoutOptions {
        &self.options
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    pub fn session(&self, order_id: &str) -> Option<&AlertSession> {
        self.sessions.get(order_id)
    }

    pub fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn fire(
        &mut self,
        payload: AlertPayload,
        origin: AlertOrigin,
        settings: &NotificationSettings,
    ) -> FireOutcome {
        if self.sessions.contains_key(&payload.order_id) {
            self.refresh(&payload.order_id, origin, settings);
            return FireOutcome::Refreshed;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let order_id = payload.order_id.clone();
        let mut session = AlertSession {
            order_id: order_id.clone(),
            payload,
            channels_fired: BTreeSet::new(),
            first_fired_at: Utc::now(),
            bridge_notified: false,
            audio_plays: 0,
            generation,
            epoch: 0,
            card_visible: false,
            repeat_timer: None,
            card_timer: None,
            os_timer: None,
            expiry_timer: None,
            audio_task: None,
            os_task: None,
        };

        self.play_audio(&mut session);

        let card = AlertCard::from_payload(&session.payload);
        match self.channels.visual.show(&card).await {
            Ok(()) => {
                session.channels_fired.insert(ChannelKind::Visual);
                session.card_visible = true;
                session.card_timer = Some(self.after(
                    self.options.card_display,
                    FanoutEvent::CardExpired {
                        order_id: order_id.clone(),
                        generation,
                    },
                ));
            }
            Err(err) => warn!(order_id = %order_id, %err, "visual alert failed"),
        }

        match origin {
            AlertOrigin::Push => {
                session.bridge_notified = true;
                session.channels_fired.insert(ChannelKind::Os);
            }
            AlertOrigin::ChangeFeed => match self.channels.os.permission() {
                Permission::Granted => {
                    if self.options.bridge_attached && !self.options.os_defer.is_zero() {
                        session.os_timer = Some(self.after(
                            self.options.os_defer,
                            FanoutEvent::OsDue {
                                order_id: order_id.clone(),
                                generation,
                            },
                        ));
                    } else {
                        self.show_os(&mut session);
                    }
                }
                permission => {
                    debug!(order_id = %order_id, ?permission, "os notification skipped");
                }
            },
        }

        if settings.loop_enabled {
            self.start_repeat(&mut session, settings.loop_interval());
        }
        self.start_expiry(&mut session);

        info!(
            order_id = %order_id,
            generation,
            origin = ?origin,
            channels = ?session.channels_fired,
            "alert session started"
        );
        self.sessions.insert(order_id, session);
        FireOutcome::Created
    }

    fn refresh(&mut self, order_id: &str, origin: AlertOrigin, settings: &NotificationSettings) {
        let Some(mut session) = self.sessions.remove(order_id) else {
            return;
        };
        if origin == AlertOrigin::Push && !session.bridge_notified {
            session.bridge_notified = true;
            if let Some(t) = session.os_timer.take() {
                t.abort();
                debug!(order_id, "deferred os notification dropped; bridge raised it");
            }
            session.channels_fired.insert(ChannelKind::Os);
        }
        session.epoch += 1;
        if settings.loop_enabled {
            self.start_repeat(&mut session, settings.loop_interval());
        }
        self.start_expiry(&mut session);
        debug!(order_id, origin = ?origin, "alert session refreshed");
        self.sessions.insert(order_id.to_string(), session);
    }

    pub async fn on_event(&mut self, event: FanoutEvent) -> Option<CancelReason> {
        match event {
            FanoutEvent::RepeatDue {
                order_id,
                generation,
                epoch,
            } => {
                let Some(mut session) = self.sessions.remove(&order_id) else {
                    return None;
                };
                if session.generation == generation && session.epoch == epoch {
                    self.play_audio(&mut session);
                    debug!(order_id = %order_id, plays = session.audio_plays, "alert sound repeated");
                }
                self.sessions.insert(order_id, session);
                None
            }
            FanoutEvent::CardExpired {
                order_id,
                generation,
            } => {
                let visual = self.channels.visual.clone();
                if let Some(session) = self.live_session(&order_id, generation) {
                    session.card_timer = None;
                    if session.card_visible {
                        session.card_visible = false;
                        if let Err(err) = visual.remove(&order_id).await {
                            warn!(order_id = %order_id, %err, "failed to remove alert card");
                        }
                    }
                }
                None
            }
            FanoutEvent::OsDue {
                order_id,
                generation,
            } => {
                let Some(mut session) = self.sessions.remove(&order_id) else {
                    return None;
                };
                if session.generation == generation {
                    session.os_timer = None;
                    if !session.channels_fired.contains(&ChannelKind::Os)
                        && self.channels.os.permission() == Permission::Granted
                    {
                        self.show_os(&mut session);
                    }
                }
                self.sessions.insert(order_id, session);
                None
            }
            FanoutEvent::SessionExpired {
                order_id,
                generation,
                epoch,
            } => {
                let current = self
                    .sessions
                    .get(&order_id)
                    .map(|s| s.generation == generation && s.epoch == epoch)
                    .unwrap_or(false);
                if current {
                    self.cancel(&order_id, CancelReason::Expired).await;
                    return Some(CancelReason::Expired);
                }
                None
            }
            FanoutEvent::OsActivated {
                order_id,
                generation,
                action,
            } => {
                if self.live_session(&order_id, generation).is_none() {
                    return None;
                }
                debug!(order_id = %order_id, ?action, "os notification activated");
                self.cancel(&order_id, CancelReason::OsClick).await;
                Some(CancelReason::OsClick)
            }
        }
    }

    /// Idempotent: cancelling an absent session is a no-op returning false.
    pub async fn cancel(&mut self, order_id: &str, reason: CancelReason) -> bool {
        let Some(session) = self.sessions.remove(order_id) else {
            return false;
        };
        if session.card_visible {
            if let Err(err) = self.channels.visual.remove(order_id).await {
                warn!(order_id, %err, "failed to remove alert card");
            }
        }
        info!(
            order_id,
            reason = reason.as_str(),
            audio_plays = session.audio_plays,
            "alert session ended"
        );
        drop(session);
        true
    }

    pub async fn cancel_all(&mut self, reason: CancelReason) -> usize {
        let ids: Vec<String> = self.sessions.keys().cloned().collect();
        let mut cancelled = 0;
        for id in ids {
            if self.cancel(&id, reason).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Start or stop repeat timers on live sessions after a settings change.
    pub fn apply_settings(&mut self, settings: &NotificationSettings) {
        let ids: Vec<String> = self.sessions.keys().cloned().collect();
        for id in ids {
            let Some(mut session) = self.sessions.remove(&id) else {
                continue;
            };
            if settings.loop_enabled {
                session.epoch += 1;
                self.start_repeat(&mut session, settings.loop_interval());
                self.start_expiry(&mut session);
            } else if session.is_repeating() {
                // A repeat tick may already be queued; the new epoch voids it.
                session.epoch += 1;
                session.abort_repeat();
                self.start_expiry(&mut session);
            }
            self.sessions.insert(id, session);
        }
    }

    fn live_session(&mut self, order_id: &str, generation: u64) -> Option<&mut AlertSession> {
        self.sessions
            .get_mut(order_id)
            .filter(|s| s.generation == generation)
    }

    fn play_audio(&self, session: &mut AlertSession) {
        if let Some(prev) = session.audio_task.take() {
            prev.abort();
        }
        let audio = self.channels.audio.clone();
        let order_id = session.order_id.clone();
        session.audio_task = Some(tokio::spawn(async move {
            match audio.play().await {
                Ok(stage) => debug!(order_id = %order_id, stage, "alert sound finished"),
                Err(err) => warn!(order_id = %order_id, %err, "alert sound unavailable; visual only"),
            }
        }));
        session.audio_plays += 1;
        session.channels_fired.insert(ChannelKind::Audio);
    }

    fn show_os(&self, session: &mut AlertSession) {
        let os = self.channels.os.clone();
        let events = self.events.clone();
        let notification = OsNotification::for_order(&session.payload, &self.options.icon);
        let order_id = session.order_id.clone();
        let generation = session.generation;
        session.os_task = Some(tokio::spawn(async move {
            match os.show(&notification).await {
                Ok(NotificationOutcome::Activated { action }) => {
                    let _ = events.send(FanoutEvent::OsActivated {
                        order_id,
                        generation,
                        action,
                    });
                }
                Ok(outcome) => debug!(order_id = %order_id, ?outcome, "os notification finished"),
                Err(err) => warn!(order_id = %order_id, %err, "os notification failed"),
            }
        }));
        session.channels_fired.insert(ChannelKind::Os);
    }

    fn start_repeat(&self, session: &mut AlertSession, interval: Duration) {
        session.abort_repeat();
        let events = self.events.clone();
        let order_id = session.order_id.clone();
        let generation = session.generation;
        let epoch = session.epoch;
        session.repeat_timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let due = FanoutEvent::RepeatDue {
                    order_id: order_id.clone(),
                    generation,
                    epoch,
                };
                if events.send(due).is_err() {
                    return;
                }
            }
        }));
    }

    fn start_expiry(&self, session: &mut AlertSession) {
        if let Some(t) = session.expiry_timer.take() {
            t.abort();
        }
        session.expiry_timer = Some(self.after(
            self.options.session_expiry,
            FanoutEvent::SessionExpired {
                order_id: session.order_id.clone(),
                generation: session.generation,
                epoch: session.epoch,
            },
        ));
    }

    fn after(&self, delay: Duration, event: FanoutEvent) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        })
    }
}
