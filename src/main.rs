use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use repairdesk_notifier::config::{AppConfig, CliConfig, FileConfig};
use repairdesk_notifier::metrics;
use repairdesk_notifier::{
    BrokerSettings, HttpBackend, Identity, NotificationId, NotificationPipeline, Session,
    StatusUpdateDispatcher, WebSocketTransport,
};

#[derive(Parser, Debug)]
#[command(about = "Watch and manage ticket-status notifications")]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Base URL of the backend REST API.
    #[clap(long)]
    pub api_url: Option<String>,

    /// WebSocket URL of the message broker. Derived from the API URL if omitted.
    #[clap(long)]
    pub broker_url: Option<String>,

    /// Identity (e.g. email) whose notifications to work on.
    #[clap(long)]
    pub identity: Option<String>,

    /// Bearer token for REST and broker calls.
    #[clap(long, env = "NOTIFY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Timeout in seconds for REST requests.
    #[clap(long, default_value_t = 30)]
    pub request_timeout_sec: u64,

    /// Timeout in seconds for establishing the broker connection.
    #[clap(long, default_value_t = 10)]
    pub connect_timeout_sec: u64,

    /// Seconds between broker heartbeats. Set to 0 to disable.
    #[clap(long, default_value_t = 30)]
    pub heartbeat_interval_sec: u64,

    /// Print the client metrics in Prometheus text format once the command
    /// finishes (for `watch`, on shutdown).
    #[clap(long)]
    pub print_metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow notifications live until Ctrl-C.
    Watch,
    /// Print the current notification list.
    List,
    /// Mark one notification as read.
    MarkRead { id: String },
    /// Mark every notification of the identity as read.
    MarkAllRead,
    /// Delete one notification.
    Delete { id: String },
    /// Delete every notification of the identity.
    DeleteAll,
    /// Submit a ticket status change.
    UpdateStatus { ticket_id: String, status: String },
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            api_url: self.api_url.clone(),
            broker_url: self.broker_url.clone(),
            identity: self.identity.clone(),
            request_timeout_sec: self.request_timeout_sec,
            connect_timeout_sec: self.connect_timeout_sec,
            heartbeat_interval_sec: self.heartbeat_interval_sec,
            ..CliConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    metrics::init_metrics();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    let identity = match &config.identity {
        Some(identity) => Identity::parse(identity.as_str())?,
        None => bail!("identity must be specified via --identity or in config file"),
    };
    let session = match &cli_args.token {
        Some(token) => Session::authenticated(identity, token.as_str()),
        None => Session::new(identity, None),
    };
    if !session.has_credential() {
        bail!("a token is required: pass --token or set NOTIFY_TOKEN");
    }

    let backend = Arc::new(HttpBackend::new(&config.api_url, config.request_timeout())?);
    info!("Using backend at {}", backend.base_url());

    let result = match cli_args.command {
        Command::Watch => watch(&config, backend, session).await,
        Command::UpdateStatus { ticket_id, status } => {
            let dispatcher = StatusUpdateDispatcher::new(backend);
            dispatcher
                .update_status(&session, &ticket_id, &status)
                .await
                .map(|()| println!("Ticket {} updated to {}", ticket_id.trim(), status.trim()))
                .map_err(Into::into)
        }
        command => run_one_shot(&config, backend, session, command).await,
    };

    if cli_args.print_metrics {
        print!("{}", metrics::gather_metrics());
    }
    result
}

/// Runs a single notification operation against a pipeline whose store is
/// bound but not subscribed.
async fn run_one_shot(
    config: &AppConfig,
    backend: Arc<HttpBackend>,
    session: Session,
    command: Command,
) -> Result<()> {
    let pipeline = NotificationPipeline::new(
        Arc::new(WebSocketTransport::new()),
        backend,
        BrokerSettings::from_config(config),
        config.event_channel_capacity,
    );
    let store = pipeline.store();
    let inbox = pipeline.inbox();
    let identity = session.identity().clone();
    store.bind(session);

    let list = match command {
        Command::List => store.refetch(&identity).await?,
        Command::MarkRead { id } => inbox.mark_read(&NotificationId::new(id)).await?,
        Command::MarkAllRead => inbox.mark_all_read(&identity).await?,
        Command::Delete { id } => inbox.delete(&NotificationId::new(id)).await?,
        Command::DeleteAll => inbox.delete_all(&identity).await?,
        Command::Watch | Command::UpdateStatus { .. } => {
            bail!("not a one-shot notification command")
        }
    };

    for notification in &list {
        let marker = if notification.is_read { " " } else { "*" };
        let ticket = notification
            .ticket_status_path()
            .map(|path| format!(" [{}]", path))
            .unwrap_or_default();
        println!(
            "{} {} {} {}{}",
            marker,
            notification.id,
            notification.created_at.format("%Y-%m-%d %H:%M"),
            notification.message,
            ticket
        );
    }
    println!(
        "{} notifications, {} unread",
        list.len(),
        inbox.unread_count()
    );
    Ok(())
}

async fn watch(config: &AppConfig, backend: Arc<HttpBackend>, session: Session) -> Result<()> {
    let pipeline = NotificationPipeline::new(
        Arc::new(WebSocketTransport::new()),
        backend,
        BrokerSettings::from_config(config),
        config.event_channel_capacity,
    );
    let mut states = pipeline.watch_state();
    let mut snapshots = pipeline.watch_snapshot();

    info!("Watching notifications for {} via {}", session.identity(), config.broker_url);
    pipeline.start(session).await?;

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                info!("Broker connection: {}", state);
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.refreshed_at.is_some() {
                    info!(
                        "{} notifications, {} unread",
                        snapshot.notifications.len(),
                        snapshot.unread_count()
                    );
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutting down...");
                break;
            }
        }
    }

    pipeline.stop().await;
    Ok(())
}
