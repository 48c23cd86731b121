use anyhow::{Context, Result};
use clap::Parser;
use order_bell::bridge::{BackgroundBridge, BridgeOptions, ClientMessage, CommandOpener};
use order_bell::channels::{DesktopNotifier, FallbackAudio, OsNotifier, TerminalToaster};
use order_bell::config;
use order_bell::coordinator::{follow_feed, CoordinatorHandle, NotificationCoordinator};
use order_bell::db;
use order_bell::fanout::{AlertChannelFanout, CancelReason, Channels, FanoutOptions};
use order_bell::feed::{ChangeFeed, HttpChangeFeed};
use order_bell::model::OrderStatus;
use order_bell::orders::HttpOrderStore;
use order_bell::policy::NotificationPolicy;
use order_bell::push::HttpPushSource;
use order_bell::settings::SettingsStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/order-bell.db", cfg.app.resolved_data_dir()));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;
    let store = SettingsStore::new(pool.clone());

    let notifier = Arc::new(DesktopNotifier::new(cfg.alerts.notifier.clone()));
    let permission = notifier.request_permission().await;
    info!(?permission, "desktop notifications");

    let bridge = match &cfg.push {
        Some(push_cfg) => {
            store
                .set_push_token(&push_cfg.token)
                .await
                .context("failed to store push token")?;
            let options = BridgeOptions::from_config(&cfg, store.push_token().await);
            let opener = Arc::new(CommandOpener::new(cfg.worker.open_command.clone()));
            let (handle, _task) = BackgroundBridge::spawn(options, notifier.clone(), opener);
            let source = HttpPushSource::new(push_cfg)?;
            tokio::spawn(source.run(handle.clone()));
            Some(handle)
        }
        None => None,
    };

    let channels = Channels {
        audio: Arc::new(FallbackAudio::from_config(&cfg.alerts)),
        visual: Arc::new(TerminalToaster::stdout()),
        os: notifier.clone(),
    };
    let fanout = AlertChannelFanout::new(
        channels,
        FanoutOptions::from_config(&cfg.alerts, bridge.is_some()),
    );
    let policy = NotificationPolicy::new(cfg.alerts.freshness_window());
    let orders = Arc::new(HttpOrderStore::from_config(&cfg)?);
    let (coordinator, handle) = NotificationCoordinator::new(policy, fanout, store, orders).await;
    let coordinator_task = coordinator.spawn();

    if let Some(bridge) = &bridge {
        let (client_id, mut messages) = bridge.connect().await?;
        bridge.client_message(client_id, ClientMessage::GetFcmToken)?;
        let relay = handle.clone();
        tokio::spawn(async move {
            while let Some(msg) = messages.recv().await {
                if relay.worker_message(msg).await.is_err() {
                    break;
                }
            }
        });
    }

    let feed: Arc<dyn ChangeFeed> = Arc::new(HttpChangeFeed::from_config(&cfg)?);
    tokio::spawn(follow_feed(
        feed,
        handle.clone(),
        Duration::from_millis(cfg.feed.reconnect_delay_ms),
    ));

    info!("order-bell running; type `help` for console commands");
    if let Err(err) = console(&handle).await {
        error!(?err, "console failed");
    }

    handle.shutdown().await;
    if let Some(bridge) = bridge {
        bridge.shutdown();
    }
    let _ = coordinator_task.await;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Ack(String),
    Status(String, OrderStatus),
    Delete(String),
    Mute,
    Unmute,
    Permission,
    Show,
    Help,
    Quit,
}

const HELP: &str = "commands: ack <id> | accept <id> | reject <id> | ready <id> | delivered <id> | delete <id> | mute | unmute | permission | status | quit";

fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next().map(str::to_string);
    let need_id = |arg: Option<String>| arg.ok_or_else(|| format!("`{}` needs an order id", verb));
    let cmd = match verb.to_ascii_lowercase().as_str() {
        "ack" | "dismiss" => ConsoleCommand::Ack(need_id(arg)?),
        "delete" => ConsoleCommand::Delete(need_id(arg)?),
        "mute" => ConsoleCommand::Mute,
        "unmute" => ConsoleCommand::Unmute,
        "permission" => ConsoleCommand::Permission,
        "status" => ConsoleCommand::Show,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => match OrderStatus::parse_status(other) {
            Some(status) if !status.is_actionable() => {
                ConsoleCommand::Status(need_id(arg)?, status)
            }
            _ => return Err(format!("unknown command `{}`", other)),
        },
    };
    Ok(Some(cmd))
}

/// Reads commands from stdin until EOF or `quit`.
async fn console(handle: &CoordinatorHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let cmd = match parse_command(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(msg) => {
                println!("{}\n{}", msg, HELP);
                continue;
            }
        };
        let result = match cmd {
            ConsoleCommand::Quit => break,
            ConsoleCommand::Help => {
                println!("{}", HELP);
                Ok(())
            }
            ConsoleCommand::Ack(id) => handle
                .dismiss(&id, CancelReason::CardClick)
                .await
                .map(|active| {
                    if !active {
                        println!("no active alert for order #{}", id);
                    }
                }),
            ConsoleCommand::Status(id, status) => handle
                .update_status(&id, status)
                .await
                .map(|_| println!("order #{} marked {}", id, status.as_str())),
            ConsoleCommand::Delete(id) => handle
                .delete_order(&id)
                .await
                .map(|_| println!("order #{} deleted", id)),
            ConsoleCommand::Mute => handle
                .set_notifications_disabled(true)
                .await
                .map(|_| println!("order notifications disabled")),
            ConsoleCommand::Unmute => handle
                .set_notifications_disabled(false)
                .await
                .map(|_| println!("order notifications enabled")),
            ConsoleCommand::Permission => handle
                .request_permission()
                .await
                .map(|p| println!("desktop notification permission: {:?}", p)),
            ConsoleCommand::Show => handle.snapshot().await.map(|s| {
                println!(
                    "loop={} interval={}ms cooldown={}ms disabled={} active={:?}",
                    s.settings.loop_enabled,
                    s.settings.loop_interval_ms,
                    s.settings.cooldown_ms,
                    s.suppression.notifications_disabled,
                    s.active_sessions
                )
            }),
        };
        if let Err(err) = result {
            warn!(%err, "console command failed");
            println!("error: {}", err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_order_commands() {
        assert_eq!(
            parse_command("accept ord-1").unwrap(),
            Some(ConsoleCommand::Status("ord-1".into(), OrderStatus::Accepted))
        );
        assert_eq!(
            parse_command("  ACK ord-2 ").unwrap(),
            Some(ConsoleCommand::Ack("ord-2".into()))
        );
        assert_eq!(
            parse_command("delivered ord-3").unwrap(),
            Some(ConsoleCommand::Status("ord-3".into(), OrderStatus::Delivered))
        );
        assert_eq!(parse_command("mute").unwrap(), Some(ConsoleCommand::Mute));
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn rejects_missing_ids_and_unknown_verbs() {
        assert!(parse_command("delivered").unwrap_err().contains("order id"));
        assert!(parse_command("launch ord-1").unwrap_err().contains("unknown"));
        assert!(parse_command("pending ord-1").unwrap_err().contains("unknown"));
    }
}
