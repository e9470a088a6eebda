mod commands;
mod daemon;

use clap::{Parser, Subcommand};
use cloudplane_config::Settings;
use daemon::Daemon;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cloudplaned")]
#[command(about = "Reconciles integrated services on Cloudplane clusters", long_about = None)]
struct Cli {
    /// Settings file (otherwise discovered from the current directory)
    #[arg(short, long, global = true, env = "CLOUDPLANE_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// User the API calls are authorized as
    #[arg(short, long, global = true, env = "CLOUDPLANE_USER", default_value = "admin")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show integrated services
    Status {
        /// Only this cluster
        #[arg(long)]
        cluster: Option<u64>,
    },
    /// Request a service version on a cluster
    Enable {
        cluster: u64,
        service: String,
        version: String,
        /// Service configuration as JSON
        #[arg(long)]
        values: Option<String>,
    },
    /// Request removal of a service
    Disable { cluster: u64, service: String },
    /// Retry a failed or invalid service
    Retry { cluster: u64, service: String },
    /// Disable every service on a cluster
    Detach { cluster: u64 },
    /// Reconcile one service in the foreground
    Reconcile { cluster: u64, service: String },
    /// Reconcile every service until interrupted
    Run,
}

fn load_settings(path: Option<PathBuf>) -> anyhow::Result<Settings> {
    let (path, settings) = match path {
        Some(path) => {
            let settings = Settings::load(&path)?;
            (path, settings)
        }
        None => cloudplane_config::load_settings()?,
    };
    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings(cli.config)?;
    let daemon = Daemon::from_settings(&settings)?;
    let user = cli.user.as_str();

    match cli.command {
        Commands::Status { cluster } => commands::status::handle(&daemon, user, cluster).await,
        Commands::Enable {
            cluster,
            service,
            version,
            values,
        } => {
            commands::service::enable(
                &daemon,
                user,
                cluster,
                &service,
                &version,
                values.as_deref(),
            )
            .await
        }
        Commands::Disable { cluster, service } => {
            commands::service::disable(&daemon, user, cluster, &service).await
        }
        Commands::Retry { cluster, service } => {
            commands::service::retry(&daemon, user, cluster, &service).await
        }
        Commands::Detach { cluster } => commands::service::detach(&daemon, user, cluster).await,
        Commands::Reconcile { cluster, service } => {
            commands::reconcile::once(&daemon, cluster, &service).await
        }
        Commands::Run => commands::reconcile::run(Arc::new(daemon)).await,
    }
}
