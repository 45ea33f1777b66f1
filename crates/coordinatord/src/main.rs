//! `coordinatord` — the fleet execution coordinator.
//!
//! CLI flags layered over `CoordinatorConfig::load`, startup wiring of
//! the db pool, transport fabric, and janitor background task, then an
//! axum server with graceful shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use coordinator_core::{Janitor, JanitorConfig};
use coordinator_db::{create_pool, ensure_schema, DbConfig, IdentityStore, JobStore, MessageStore, WorkerStore};
use coordinator_logging::{init_logging, LogConfig};
use coordinator_security::{AesGcmProvider, CipherRegistry};

use coordinatord::identity::bootstrap_localadmin;
use coordinatord::{routes, transports, AppState, CoordinatorConfig};

#[derive(Parser, Debug)]
#[command(name = "coordinatord", about = "Fleet execution coordinator")]
struct Args {
    /// Path to a `coordinator.toml` config file (defaults to
    /// `./coordinator.toml` if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Override the configured database URL.
    #[arg(long)]
    db_url: Option<String>,

    /// Emit info-level logs to the console as well as the log file.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(LogConfig {
        app_name: "coordinatord",
        verbose: args.verbose,
        quiet_console: false,
    })?;

    let mut config = CoordinatorConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(db_url) = args.db_url {
        config.database_url = db_url;
    }
    let config = Arc::new(config);

    tracing::info!(bind = %config.bind_addr, database = %config.database_url, "starting coordinatord");

    let pool = create_pool(DbConfig::from_url(config.database_url.clone())?).await?;
    ensure_schema(&pool).await?;

    let job_store = JobStore::new(pool.clone());
    let worker_store = WorkerStore::new(pool.clone());
    let message_store = MessageStore::new(pool.clone());
    let identity_store = IdentityStore::new(pool.clone());

    let cipher_registry = Arc::new(build_cipher_registry(&config)?);
    let fabric = transports::build(&config).await?;
    let trusted_proxies = Arc::new(config.trusted_proxy_nets());

    let state = AppState {
        job_store: job_store.clone(),
        worker_store: worker_store.clone(),
        message_store: message_store.clone(),
        identity_store,
        cipher_registry,
        transport_registry: fabric.registry.clone(),
        long_poll: fabric.long_poll,
        config: config.clone(),
        trusted_proxies,
    };

    bootstrap_localadmin(&state).await?;

    let janitor = Janitor::new(
        job_store,
        worker_store,
        message_store,
        fabric.registry.clone(),
        JanitorConfig::from(config.janitor.clone()),
    );
    let janitor_handle = tokio::spawn(async move { janitor.run().await });

    let app = routes::router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "coordinatord listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    janitor_handle.abort();
    for task in fabric.background_tasks {
        task.abort();
    }

    Ok(())
}

/// Registers the configured key-wrap provider, if any. No
/// `key_wrap_provider` means every identity is stored as plaintext hex.
fn build_cipher_registry(config: &CoordinatorConfig) -> anyhow::Result<CipherRegistry> {
    let mut registry = CipherRegistry::new();
    if let Some(provider_name) = config.key_wrap_provider.as_deref() {
        let key_hex = config
            .key_wrap_master_key_hex
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("`key_wrap_provider` is set but `key_wrap_master_key_hex` is not"))?;
        let key_bytes = hex::decode(key_hex)?;
        let key: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("`key_wrap_master_key_hex` must decode to exactly 32 bytes"))?;
        // CipherProvider::name returns &'static str; the provider name is
        // only known at runtime (from config), so it's leaked once here for
        // the life of the process rather than plumbing a lifetime through
        // the registry.
        let leaked_name: &'static str = Box::leak(provider_name.to_string().into_boxed_str());
        registry.register(Box::new(AesGcmProvider::new(leaked_name, key)));
    }
    Ok(registry)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
