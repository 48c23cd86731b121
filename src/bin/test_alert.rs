use anyhow::Result;
use clap::Parser;
use order_bell::channels::{DesktopNotifier, FallbackAudio, OsNotifier, TerminalToaster};
use order_bell::config;
use order_bell::fanout::{AlertChannelFanout, CancelReason, Channels, FanoutOptions};
use order_bell::model::{AlertOrigin, AlertPayload};
use order_bell::settings::NotificationSettings;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(about = "Fire a sample order alert through the configured sound, card and desktop notification.")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[arg(long, default_value = "test-order")]
    order_id: String,

    #[arg(long, default_value = "Test Customer")]
    customer: String,

    #[arg(long, default_value_t = 499.0)]
    amount: f64,

    /// How long to keep the alert alive before exiting
    #[arg(long, default_value_t = 10_000)]
    wait_ms: u64,
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

    let notifier = Arc::new(DesktopNotifier::new(cfg.alerts.notifier.clone()));
    let permission = notifier.request_permission().await;
    info!(?permission, "desktop notifications");

    let channels = Channels {
        audio: Arc::new(FallbackAudio::from_config(&cfg.alerts)),
        visual: Arc::new(TerminalToaster::stdout()),
        os: notifier,
    };
    let (mut fanout, mut events) =
        AlertChannelFanout::new(channels, FanoutOptions::from_config(&cfg.alerts, false));

    let payload = AlertPayload {
        order_id: args.order_id,
        customer_name: args.customer,
        total_amount: args.amount,
        item_count: 1,
        created_at: Some(chrono::Utc::now()),
    };
    fanout
        .fire(payload, AlertOrigin::ChangeFeed, &NotificationSettings::default())
        .await;

    let deadline = tokio::time::sleep(Duration::from_millis(args.wait_ms));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(event) = events.recv() => {
                if let Some(reason) = fanout.on_event(event).await {
                    info!(reason = reason.as_str(), "test alert ended");
                    break;
                }
            }
        }
    }
    fanout.cancel_all(CancelReason::Shutdown).await;
    Ok(())
}
