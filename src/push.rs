//! Push delivery: polls the push service for this device's messages and
//! hands each payload to the background bridge.

use crate::bridge::{BridgeHandle, PushPayload};
use crate::config::Push;
use reqwest::{Client, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum PushError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("push service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid push url: {0}")]
    Url(String),
}

/// Exponential backoff: 1s * 2^attempt, capped at `max`.
pub fn backoff_delay(attempt: u32, max: Duration) -> Duration {
    let secs = 1_u64 << attempt.min(16);
    Duration::from_secs(secs).min(max)
}

#[derive(Clone)]
pub struct HttpPushSource {
    http: Client,
    base_url: Url,
    token: String,
    poll_interval: Duration,
    max_backoff: Duration,
}

impl fmt::Debug for HttpPushSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPushSource")
            .field("base_url", &self.base_url)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl HttpPushSource {
    pub fn new(cfg: &Push) -> Result<Self, PushError> {
        let base_url = Url::parse(&cfg.base_url).map_err(|e| PushError::Url(e.to_string()))?;
        let http = Client::builder().user_agent("order-bell/0.1").build()?;
        Ok(Self {
            http,
            base_url,
            token: cfg.token.clone(),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            max_backoff: Duration::from_secs(cfg.max_backoff_seconds),
        })
    }

    pub fn messages_url(&self) -> Result<Url, PushError> {
        let mut url = self
            .base_url
            .join("v1/messages")
            .map_err(|e| PushError::Url(e.to_string()))?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url)
    }

    /// Pending messages. Entries that are not push payloads are skipped.
    #[instrument(skip_all)]
    pub async fn fetch(&self) -> Result<Vec<PushPayload>, PushError> {
        let res = self.http.get(self.messages_url()?).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(PushError::Status { status, body });
        }
        let raw: Vec<Value> = res.json().await?;
        Ok(parse_batch(raw))
    }

    /// Runs until the bridge goes away.
    pub async fn run(self, bridge: BridgeHandle) {
        info!(base_url = %self.base_url, "push source started");
        let mut attempt: u32 = 0;
        loop {
            match self.fetch().await {
                Ok(batch) => {
                    attempt = 0;
                    if !batch.is_empty() {
                        debug!(count = batch.len(), "push messages received");
                    }
                    for payload in batch {
                        if bridge.push(payload).is_err() {
                            info!("bridge stopped; push source exiting");
                            return;
                        }
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(err) => {
                    let delay = backoff_delay(attempt, self.max_backoff);
                    warn!(%err, attempt, delay_secs = delay.as_secs(), "push poll failed; backoff");
                    attempt = attempt.saturating_add(1);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn parse_batch(raw: Vec<Value>) -> Vec<PushPayload> {
    raw.into_iter()
        .filter_map(|v| match serde_json::from_value::<PushPayload>(v) {
            Ok(p) => Some(p),
            Err(err) => {
                warn!(%err, "malformed push payload skipped");
                None
            }
        })
        .collect()
}
