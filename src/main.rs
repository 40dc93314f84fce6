use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use collab_notifications::config::{
    AppConfig, CliConfig, FileConfig, DEFAULT_DISPATCH_CHANNEL_CAPACITY,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT_SEC, DEFAULT_RETRY_DELAY_MS,
};
use collab_notifications::{ConnectionState, NotificationCenter, NotificationRecord};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser, Debug)]
#[clap(version = VERSION, about = "Collaboration platform notifications client")]
struct CliArgs {
    /// Path to a TOML config file. Its values override the flags below.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the platform API, e.g. https://collab.example.com/api
    #[clap(long, global = true)]
    pub api_base_url: Option<String>,

    /// Push stream URL. Defaults to <api-base-url>/notifications/stream.
    #[clap(long, global = true)]
    pub stream_url: Option<String>,

    /// Session cookie sent with every request, e.g. "session_id=abc123".
    #[clap(long, global = true)]
    pub session_cookie: Option<String>,

    /// Timeout in seconds for API requests and stream connection setup.
    #[clap(long, global = true, default_value_t = DEFAULT_REQUEST_TIMEOUT_SEC)]
    pub request_timeout_sec: u64,

    /// Consecutive stream failures after which reconnecting stops.
    #[clap(long, global = true, default_value_t = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub max_reconnect_attempts: u32,

    /// Delay in milliseconds between stream reconnect attempts.
    #[clap(long, global = true, default_value_t = DEFAULT_RETRY_DELAY_MS)]
    pub retry_delay_ms: u64,

    /// Pushed notifications buffered between the stream and the store.
    #[clap(long, global = true, default_value_t = DEFAULT_DISPATCH_CHANNEL_CAPACITY)]
    pub dispatch_channel_capacity: usize,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load notifications, then follow the push stream until Ctrl-C.
    Watch,
    /// Print all notifications.
    List,
    /// Print the backend's unread counter.
    Unread,
    /// Mark one notification as read.
    MarkRead { id: String },
    /// Mark every notification as read.
    MarkAllRead,
    /// Delete one notification.
    Delete { id: String },
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            api_base_url: self.api_base_url.clone(),
            stream_url: self.stream_url.clone(),
            session_cookie: self.session_cookie.clone(),
            request_timeout_sec: self.request_timeout_sec,
            max_reconnect_attempts: self.max_reconnect_attempts,
            retry_delay_ms: self.retry_delay_ms,
            dispatch_channel_capacity: self.dispatch_channel_capacity,
        }
    }
}

fn format_record(record: &NotificationRecord) -> String {
    let marker = if record.is_read { " " } else { "*" };
    let mut line = format!(
        "{} {}  {}  [{}] {}: {}",
        marker, record.id, record.created_at, record.notification_type, record.title, record.message
    );
    if !record.data.is_empty() {
        let data: Vec<String> = record
            .data
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        line.push_str(&format!("  ({})", data.join(", ")));
    }
    line
}

fn print_records(records: &[NotificationRecord]) {
    if records.is_empty() {
        println!("No notifications.");
        return;
    }
    for record in records {
        println!("{}", format_record(record));
    }
}

/// Follow the stream, printing every store change, until Ctrl-C or the
/// stream gives up.
async fn watch(center: &NotificationCenter) -> Result<()> {
    let mut changes = center.subscribe();
    let mut states = center.subscribe_connection_state();

    center.start().await;
    let snapshot = center.store().snapshot();
    print_records(&snapshot.notifications);
    println!("{} unread", snapshot.unread_count);
    changes.mark_unchanged();

    let mut seen: std::collections::HashSet<String> = snapshot
        .notifications
        .iter()
        .map(|n| n.id.clone())
        .collect();

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break Ok(());
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = changes.borrow_and_update().clone();
                for record in snapshot.notifications.iter().rev() {
                    if seen.insert(record.id.clone()) {
                        println!("{}", format_record(record));
                    }
                }
                println!("{} unread", snapshot.unread_count);
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = *states.borrow_and_update();
                info!("Notification stream state: {:?}", state);
                if state == ConnectionState::Exhausted {
                    break Err(anyhow::anyhow!("Notification stream gave up reconnecting"));
                }
            }
        }
    };

    center.shutdown().await;
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;
    if config.session_cookie.is_none() {
        warn!("No session cookie configured, requests will be anonymous");
    }

    let center = NotificationCenter::from_config(&config)?;
    let store = center.store();

    match cli_args.command {
        Command::Watch => {
            info!("Watching notifications at {}", config.stream_url);
            watch(&center).await?;
        }
        Command::List => {
            store.hydrate().await?;
            print_records(&store.notifications());
        }
        Command::Unread => {
            let count = store.server_unread_count().await?;
            println!("{}", count);
        }
        Command::MarkRead { id } => {
            store.hydrate().await?;
            if store.get(&id).is_none() {
                bail!("Notification {} not found", id);
            }
            store.mark_read(&id).await?;
            println!("Marked {} as read", id);
        }
        Command::MarkAllRead => {
            store.hydrate().await?;
            store.mark_all_read().await?;
            println!("Marked all notifications as read");
        }
        Command::Delete { id } => {
            store.hydrate().await?;
            store.delete(&id).await?;
            println!("Deleted {}", id);
        }
    }

    Ok(())
}
