use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::EnvFilter;

use geosync::cli::{
    AdminCommands, NodeCommands, run_init, run_node_add, run_node_list, run_node_remove,
    run_status,
};
use geosync::config::{GeoConfig, ServerConfig};
use geosync::geo::{
    EventLogProcessor, FsShardHealth, GitMirror, JobQueue, ProjectSyncService, Queues,
    REPOSITORY_SYNC_QUEUE, RepositorySyncScheduler, StoreLease,
};
use geosync::server::{AppState, create_router};
use geosync::store::{SqliteStore, Store};
use geosync::types::NodeRole;

#[derive(Parser)]
#[command(name = "geosync")]
#[command(about = "Geo replication for self-hosted git installations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(long, short, default_value = "8080")]
        port: u16,

        /// Data directory for database and repositories
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// External URL of this installation (e.g., "https://geo-2.example.com/").
        /// Identifies the current Geo node. Defaults to the bind address.
        #[arg(long)]
        node_url: Option<String>,

        /// Geo settings file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the replication status of a running installation
    Status {
        /// Base URL of the installation
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,

        /// Keep polling, backing off while nothing is watching
        #[arg(long)]
        watch: bool,
    },
}

async fn run_serve(config: ServerConfig, geo: GeoConfig) -> anyhow::Result<()> {
    let db_path = config.db_path();
    if !db_path.exists() {
        bail!("Database not found. Run 'geosync admin init' first to create it.");
    }

    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;
    let store: Arc<dyn Store> = Arc::new(store);

    if geo.storages.is_empty() {
        fs::create_dir_all(config.data_dir.join("repositories"))?;
    }
    let storages = geo.storage_paths(&config.data_dir);
    let geo = Arc::new(geo);
    let node_url = config.current_node_url();

    let queue = Arc::new(JobQueue::new(REPOSITORY_SYNC_QUEUE));
    let mut queues = Queues::new();
    queues.register(queue.clone());

    match store.find_node_by_url(&node_url)? {
        Some(node) if node.role == NodeRole::Secondary => {
            info!("Running as secondary node {} ({})", node.id, node.url());

            let mirror = Arc::new(GitMirror::new(storages.clone(), geo.mirror_timeout()));
            let service = Arc::new(ProjectSyncService::new(
                store.clone(),
                mirror,
                geo.features.clone(),
            ));
            tokio::spawn(
                queue
                    .clone()
                    .run(service, node.repos_max_capacity as usize),
            );

            let scheduler = RepositorySyncScheduler::new(
                store.clone(),
                Arc::new(StoreLease::new(store.clone())),
                Arc::new(FsShardHealth::new(storages)),
                queue.clone(),
                geo.clone(),
            );
            let events = EventLogProcessor::new(store.clone(), geo.event_batch_size);
            tokio::spawn(secondary_loop(
                store.clone(),
                scheduler,
                events,
                node_url.clone(),
                geo.clone(),
            ));
        }
        Some(node) => {
            info!("Running as primary node {} ({})", node.id, node.url());
            tokio::spawn(heartbeat_loop(store.clone(), geo.clone()));
        }
        None => {
            tracing::warn!(
                "{node_url} is not registered as a Geo node; replication is inactive"
            );
        }
    }

    let state = Arc::new(AppState::new(store, geo, node_url).with_queues(queues));
    let app = create_router(state);
    let addr = config.socket_addr()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn secondary_loop(
    store: Arc<dyn Store>,
    scheduler: RepositorySyncScheduler,
    events: EventLogProcessor,
    node_url: String,
    geo: Arc<GeoConfig>,
) {
    let mut ticker = tokio::time::interval(geo.scheduler_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        // Reload each tick so admin changes to the node take effect.
        let node = match store.find_node_by_url(&node_url) {
            Ok(Some(node)) => node,
            Ok(None) => {
                tracing::warn!("Current node {node_url} is no longer registered");
                continue;
            }
            Err(e) => {
                tracing::warn!("Could not load current node: {e}");
                continue;
            }
        };

        if let Err(e) = events.run_once(&node) {
            tracing::warn!("Event log processing failed: {e}");
        }
        if let Err(e) = scheduler.tick(&node).await {
            tracing::warn!("Sync tick failed: {e}");
        }
    }
}

async fn heartbeat_loop(store: Arc<dyn Store>, geo: Arc<GeoConfig>) {
    let mut ticker = tokio::time::interval(geo.scheduler_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(e) = store.write_heartbeat(Utc::now()) {
            tracing::warn!("Could not write replication heartbeat: {e}");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("geosync=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init {
                data_dir,
                node_url,
                role,
                non_interactive,
            } => {
                run_init(data_dir, node_url, role, non_interactive)?;
            }
            AdminCommands::Node { command } => match command {
                NodeCommands::Add {
                    data_dir,
                    url,
                    role,
                    namespaces,
                    repos_max_capacity,
                    files_max_capacity,
                    disabled,
                } => {
                    run_node_add(
                        data_dir,
                        url,
                        role,
                        namespaces,
                        repos_max_capacity,
                        files_max_capacity,
                        disabled,
                    )?;
                }
                NodeCommands::List { data_dir, json } => {
                    run_node_list(data_dir, json)?;
                }
                NodeCommands::Remove {
                    data_dir,
                    id,
                    non_interactive,
                    yes,
                } => {
                    run_node_remove(data_dir, id, non_interactive, yes)?;
                }
            },
        },
        Commands::Serve {
            host,
            port,
            data_dir,
            node_url,
            config,
        } => {
            let server = ServerConfig {
                host,
                port,
                data_dir: data_dir.into(),
                node_url,
            };
            let geo = match config {
                Some(path) => GeoConfig::load(&path)?,
                None => GeoConfig::default(),
            };
            run_serve(server, geo).await?;
        }
        Commands::Status { url, watch } => {
            run_status(url, watch).await?;
        }
    }

    Ok(())
}
