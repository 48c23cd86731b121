//! Configuration loader and validator for the order alert daemon.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub feed: Feed,
    #[serde(default)]
    pub push: Option<Push>,
    pub alerts: Alerts,
    pub worker: Worker,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// URL of the admin console, opened from notification clicks.
    pub app_url: String,
}

/// Order change-feed settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feed {
    pub base_url: String,
    pub collection: String,
    pub poll_interval_ms: u64,
    pub reconnect_delay_ms: u64,
}

/// Push delivery settings. Absent means no background push path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Push {
    pub base_url: String,
    pub token: String,
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
}

/// External program plus its leading arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Alert channel settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alerts {
    pub sound_path: String,
    pub icon: String,
    pub freshness_window_ms: u64,
    pub card_display_ms: u64,
    pub session_expiry_ms: u64,
    pub os_defer_ms: u64,
    pub players: Vec<PlayerCommand>,
    pub tone_player: PlayerCommand,
    pub notifier: String,
}

/// Background bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Worker {
    pub version: String,
    pub open_command: String,
}

impl App {
    /// `data_dir` with a leading `~/` expanded to `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }
}

impl Alerts {
    pub fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }

    pub fn card_display(&self) -> Duration {
        Duration::from_millis(self.card_display_ms)
    }

    pub fn session_expiry(&self) -> Duration {
        Duration::from_millis(self.session_expiry_ms)
    }

    pub fn os_defer(&self) -> Duration {
        Duration::from_millis(self.os_defer_ms)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.app_url.trim().is_empty() {
        return Err(ConfigError::Invalid("app.app_url must be non-empty"));
    }

    if cfg.feed.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("feed.base_url must be non-empty"));
    }
    if cfg.feed.collection.trim().is_empty() {
        return Err(ConfigError::Invalid("feed.collection must be non-empty"));
    }
    if cfg.feed.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("feed.poll_interval_ms must be > 0"));
    }

    if let Some(push) = &cfg.push {
        if push.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("push.base_url must be non-empty"));
        }
        if push.token.trim().is_empty() {
            return Err(ConfigError::Invalid("push.token must be non-empty"));
        }
        if push.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("push.poll_interval_ms must be > 0"));
        }
    }

    let alerts = &cfg.alerts;
    if alerts.sound_path.trim().is_empty() {
        return Err(ConfigError::Invalid("alerts.sound_path must be non-empty"));
    }
    if alerts.freshness_window_ms == 0 {
        return Err(ConfigError::Invalid("alerts.freshness_window_ms must be > 0"));
    }
    if !(5_000..=8_000).contains(&alerts.card_display_ms) {
        return Err(ConfigError::Invalid(
            "alerts.card_display_ms must be between 5000 and 8000",
        ));
    }
    if alerts.session_expiry_ms < alerts.card_display_ms {
        return Err(ConfigError::Invalid(
            "alerts.session_expiry_ms must be >= alerts.card_display_ms",
        ));
    }
    if alerts.players.is_empty() {
        return Err(ConfigError::Invalid("alerts.players must list at least one player"));
    }
    if alerts.players.iter().any(|p| p.program.trim().is_empty()) {
        return Err(ConfigError::Invalid("alerts.players[].program must be non-empty"));
    }
    if alerts.tone_player.program.trim().is_empty() {
        return Err(ConfigError::Invalid("alerts.tone_player.program must be non-empty"));
    }
    if alerts.notifier.trim().is_empty() {
        return Err(ConfigError::Invalid("alerts.notifier must be non-empty"));
    }

    if cfg.worker.version.trim().is_empty() {
        return Err(ConfigError::Invalid("worker.version must be non-empty"));
    }
    if cfg.worker.open_command.trim().is_empty() {
        return Err(ConfigError::Invalid("worker.open_command must be non-empty"));
    }

    Ok(())
}

/// Returns the example YAML document shipped as `config.yaml`.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  app_url: "http://localhost:8080/"

feed:
  base_url: "http://localhost:8080/"
  collection: "orders"
  poll_interval_ms: 2000
  reconnect_delay_ms: 5000

push:
  base_url: "http://localhost:8081/"
  token: "YOUR_PUSH_TOKEN"
  poll_interval_ms: 1000
  max_backoff_seconds: 60

alerts:
  sound_path: "alert.mp3"
  icon: "assets/apple-touch-icon.png"
  freshness_window_ms: 10000
  card_display_ms: 8000
  session_expiry_ms: 600000
  os_defer_ms: 1000
  players:
    - program: "paplay"
    - program: "aplay"
      args: ["-q"]
  tone_player:
    program: "aplay"
    args: ["-q", "-"]
  notifier: "notify-send"

worker:
  version: "v1"
  open_command: "xdg-open"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.alerts.players.len(), 2);
        assert_eq!(cfg.alerts.players[0].args, Vec::<String>::new());
    }

    #[test]
    fn push_section_is_optional() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.push = None;
        validate(&cfg).unwrap();
    }

    #[test]
    fn invalid_feed() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.feed.base_url = "".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("feed.base_url")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.feed.poll_interval_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_push_token() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        if let Some(push) = cfg.push.as_mut() {
            push.token = " ".into();
        }
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("push.token")), _ => panic!("wrong error") }
    }

    #[test]
    fn card_window_bounds() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.alerts.card_display_ms = 4_999;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.alerts.card_display_ms = 8_001;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.alerts.session_expiry_ms = 1_000;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn players_required() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.alerts.players.clear();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("alerts.players")), _ => panic!("wrong error") }
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.feed.collection, "orders");
        assert_eq!(cfg.alerts.freshness_window(), Duration::from_secs(10));
    }
}
