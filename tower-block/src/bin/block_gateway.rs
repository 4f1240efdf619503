use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::routing::get;
use block_limit::CountingStore;
use block_limit::Decider;
use block_limit::MemoryStore;
use block_limit::Quotas;
use block_limit_redis::RedisStore;
use block_limit_redis::redis_url;
use clap::Parser;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_block::ServiceBuilderExt;
use tower_block::handle_block_error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Quotas are read from the environment:
/// IP_REQUESTS_PER_SECOND, IP_BLOCK_DURATION_MINUTES and TOKEN_LIMIT_<token>=<limit>,<duration>.
#[derive(Parser, Debug)]
#[command(name = "block-gateway")]
#[command(about = "HTTP gateway enforcing per-address and per-token request quotas")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "SERVER_PORT", default_value_t = 8080)]
    port: u16,

    /// Redis address (host:port)
    #[arg(long, env = "REDIS_ADDR", default_value = "127.0.0.1:6379")]
    redis_addr: String,

    /// Redis password
    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    redis_password: Option<String>,

    /// Redis database index
    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    redis_db: i64,

    /// Deadline for each store command; slower commands deny the request
    #[arg(long, env = "STORE_TIMEOUT", default_value = "250ms", value_parser = humantime::parse_duration)]
    store_timeout: Duration,

    /// Keep counters in process memory instead of Redis
    #[arg(long)]
    memory: bool,
}

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Loaded into the environment at startup; variables already set take precedence.
const ENV_FILE: &str = ".env";

async fn open_store(args: &Args) -> Result<Arc<dyn CountingStore>, BoxError> {
    if args.memory {
        let store = Arc::new(MemoryStore::new());
        let purged = Arc::clone(&store);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            loop {
                interval.tick().await;
                let removed = purged.purge_expired();
                tracing::debug!(removed, "purged expired entries");
            }
        });
        tracing::info!("using in-memory store");
        return Ok(store);
    }

    let url = redis_url(&args.redis_addr, args.redis_password.as_deref(), args.redis_db);
    let store = RedisStore::connect(&url)
        .await?
        .with_timeout(args.store_timeout);
    tracing::info!(addr = %args.redis_addr, db = args.redis_db, "connected to redis");
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Read before the subscriber starts so RUST_LOG may come from the file.
    let env_file = dotenvy::from_path(ENV_FILE);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    if let Err(error) = env_file {
        tracing::warn!(%error, file = ENV_FILE, "no environment file loaded");
    }

    let args = Args::parse();

    let quotas = Quotas::from_env()?;
    tracing::info!(
        limit = quotas.default_quota().limit(),
        block = ?quotas.default_quota().block(),
        tokens = quotas.overrides().len(),
        "loaded quotas"
    );

    let decider = Decider::new(quotas, open_store(&args).await?);

    let app = Router::new()
        .route("/", get(|| async { "Welcome! Request allowed.\n" }))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_block_error))
                .block_limit(decider)
                .map_err(BoxError::from),
        );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await?;
    tracing::info!(port = args.port, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
