use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::http::HeaderValue;
use clap::{Parser, Subcommand};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use custody_node::api::{self, AppState};
use custody_node::chain::EvmConnector;
use custody_node::config::{AppConfig, ResolvedConfig};
use custody_node::poller;
use custody_node::store::Store;

#[derive(Parser, Debug)]
#[command(name = "custody-node", version, about = "Custodial deposit watcher and balance sweeper")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "custody.toml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API (default)
    Serve,

    /// Check deposits once for an address or for every address of a user
    Check {
        #[arg(long, conflicts_with = "user_id", required_unless_present = "user_id")]
        address_id: Option<String>,

        #[arg(long)]
        user_id: Option<String>,
    },

    /// Sweep the given custodial addresses to their master wallets
    Sweep {
        #[arg(required = true)]
        address_ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    // init tracing from env CUSTODY_LOG or RUST_LOG
    let filter = std::env::var("CUSTODY_LOG")
        .unwrap_or_else(|_| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(err = %format!("{:#}", e), "custody node failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut raw = AppConfig::load_from(&cli.config)?;
    raw.apply_env_overrides();
    let config = Arc::new(
        raw.resolved()
            .with_context(|| format!("invalid config {}", cli.config.display()))?,
    );

    let store = Store::open(&config.server.data_dir)
        .with_context(|| format!("opening data dir {}", config.server.data_dir))?;
    let connector = Arc::new(EvmConnector::new(config.watcher.rpc_timeout_ms));
    let state = AppState::new(store.clone(), config.clone(), connector);

    let result = match cli.cmd.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(state, config).await,
        Commands::Check {
            address_id,
            user_id,
        } => {
            let outcomes = match (address_id, user_id) {
                (Some(id), _) => state.watcher.check_many(&[id]).await,
                (None, Some(user)) => state.watcher.check_user(&user).await?,
                (None, None) => return Err(anyhow!("--address-id or --user-id is required")),
            };
            state.watcher.notifier().drain().await;
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
            Ok(())
        }
        Commands::Sweep { address_ids } => {
            let outcomes = state.sweeper.sweep_addresses(&address_ids).await;
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
            Ok(())
        }
    };

    store.flush()?;
    result
}

async fn serve(state: AppState, config: Arc<ResolvedConfig>) -> Result<()> {
    let admin_token_mask = match config.server.admin_token.as_deref() {
        Some(t) if !t.is_empty() => format!("set (len={})", t.len()),
        _ => "unset".to_string(),
    };
    info!(admin_token = %admin_token_mask, "custody node starting up");

    if config.registry.is_empty() {
        tracing::warn!("no currencies configured; deposit addresses cannot be issued");
    }

    if config.watcher.poll_enabled {
        poller::spawn_poller(state.watcher.clone());
    }

    let store = state.store.clone();
    let app = api::router(state).layer(cors_layer());

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| format!("bad listen address {}:{}", config.server.bind, config.server.port))?;
    info!(listen = %addr, "custody node listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            let _ = store.flush();
        })
        .await?;
    Ok(())
}

// CUSTODY_CORS_ORIGINS: comma-separated allow list; unset means no cross-origin access
fn cors_layer() -> CorsLayer {
    let Ok(raw) = std::env::var("CUSTODY_CORS_ORIGINS") else {
        return CorsLayer::new().allow_methods(Any);
    };
    if raw.trim() == "*" {
        return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    }
    let list: Vec<HeaderValue> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|p| HeaderValue::from_str(p).ok())
        .collect();
    if list.is_empty() {
        CorsLayer::new().allow_methods(Any)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(list))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
