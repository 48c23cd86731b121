use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use order_bell::config;
use order_bell::db;
use order_bell::settings::SettingsStore;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(about = "Inspect or change the persisted order alert settings.")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Print settings, the notification switch and the last alert time
    Show,
    /// Change one or more settings; unspecified fields keep their value
    Set {
        #[arg(long)]
        loop_enabled: Option<bool>,
        #[arg(long)]
        loop_interval_ms: Option<u64>,
        #[arg(long)]
        cooldown_ms: Option<u64>,
    },
    /// Flip the global order notification switch
    Toggle,
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
    let store = SettingsStore::new(pool);

    match args.cmd {
        Cmd::Show => show(&store).await?,
        Cmd::Set {
            loop_enabled,
            loop_interval_ms,
            cooldown_ms,
        } => {
            let mut settings = store.load().await;
            if let Some(v) = loop_enabled {
                settings.loop_enabled = v;
            }
            if let Some(v) = loop_interval_ms {
                settings.loop_interval_ms = v;
            }
            if let Some(v) = cooldown_ms {
                settings.cooldown_ms = v;
            }
            let saved = store.save(settings).await.context("settings not saved")?;
            println!("{}", serde_json::to_string_pretty(&saved)?);
        }
        Cmd::Toggle => {
            let disabled = store.toggle_notifications().await?;
            println!(
                "order notifications {}",
                if disabled { "disabled" } else { "enabled" }
            );
        }
    }
    Ok(())
}

async fn show(store: &SettingsStore) -> Result<()> {
    let settings = store.load().await;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    println!(
        "notifications: {}",
        if store.notifications_disabled().await {
            "disabled"
        } else {
            "enabled"
        }
    );
    match store.last_notification().await {
        Some(at) => println!("last alert: {}", at.to_rfc3339()),
        None => println!("last alert: never"),
    }
    println!(
        "push token: {}",
        if store.push_token().await.is_some() {
            "stored"
        } else {
            "none"
        }
    );
    Ok(())
}
