use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use couponbot_core::allocation::AllocationEngine;
use couponbot_core::catalog::CouponCatalog;
use couponbot_core::config::{
    AllocationPolicy, CouponConfig, DEFAULT_MAX_CLAIM_ATTEMPTS,
};
use couponbot_core::db::DEFAULT_MAX_CONNECTIONS;
use couponbot_core::eventbus::EventBus;
use couponbot_core::ledger::SharedClaimLedger;
use couponbot_core::repositories::{
    InMemoryClaimRepository, InMemoryCouponPool, KeyValueCursor, MemoryStore,
    PostgresClaimRepository, PostgresCouponRepository, PostgresRotationCursor,
};
use couponbot_core::services::ip_resolver::DEFAULT_IP_LOOKUP_URL;
use couponbot_core::services::CouponService;
use couponbot_core::Database;

mod local;
mod server;

use local::{LocalAction, LocalOptions};
use server::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// HTTP API over a shared store.
    Server,
    /// One-shot command against a local state file.
    Local,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "couponbot")]
#[command(author, version, about = "Coupon distribution with a per-visitor cooldown")]
struct Args {
    #[arg(long, value_enum, default_value = "server")]
    mode: Mode,

    /// What to do in local mode.
    #[arg(long, value_enum, default_value = "claim")]
    action: LocalAction,

    /// Address to which the server will bind
    #[arg(long, env = "COUPONBOT_ADDR", default_value = "0.0.0.0:8080")]
    server_addr: SocketAddr,

    /// Postgres connection URL. Without one the server keeps everything in memory.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "COUPONBOT_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: u32,

    /// round-robin or any-unclaimed. Defaults to any-unclaimed for the server.
    #[arg(long, env = "COUPONBOT_POLICY")]
    policy: Option<AllocationPolicy>,

    #[arg(long, env = "COUPONBOT_COOLDOWN_SECS", default_value_t = 3600)]
    cooldown_secs: u64,

    /// Upper bound on each store call while serving a request.
    #[arg(long, env = "COUPONBOT_REQUEST_TIMEOUT_MS", default_value_t = 5000)]
    request_timeout_ms: u64,

    #[arg(long, env = "COUPONBOT_MAX_CLAIM_ATTEMPTS", default_value_t = DEFAULT_MAX_CLAIM_ATTEMPTS)]
    max_claim_attempts: u32,

    /// JSON list of `{ code, description, discount }` replacing the built-in offers.
    #[arg(long, env = "COUPONBOT_CATALOG")]
    catalog: Option<PathBuf>,

    /// Local mode state file. Defaults to the platform data directory.
    #[arg(long, env = "COUPONBOT_STATE_FILE")]
    state_file: Option<PathBuf>,

    #[arg(long, env = "COUPONBOT_IP_LOOKUP_URL", default_value = DEFAULT_IP_LOOKUP_URL)]
    ip_lookup_url: String,

    /// Skip the public address lookup in local mode.
    #[arg(long, default_value = "false")]
    no_ip_lookup: bool,
}

impl Args {
    fn coupon_config(&self) -> CouponConfig {
        CouponConfig {
            cooldown: Duration::from_secs(self.cooldown_secs),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_claim_attempts: self.max_claim_attempts,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("couponbot=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(sub) {
        eprintln!("Failed to set global subscriber: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    info!("couponbot starting. mode={:?}", args.mode);

    let catalog = Arc::new(load_catalog(args.catalog.as_deref()).await?);

    match args.mode {
        Mode::Server => run_server(&args, catalog).await?,
        Mode::Local => {
            if args.policy == Some(AllocationPolicy::AnyUnclaimed) {
                warn!("Local mode has no shared pool; using round-robin");
            }
            let state_file = match args.state_file.clone() {
                Some(path) => path,
                None => local::default_state_file()?,
            };
            let opts = LocalOptions {
                state_file,
                catalog,
                config: args.coupon_config(),
                ip_lookup_url: (!args.no_ip_lookup).then(|| args.ip_lookup_url.clone()),
            };
            local::run_local(args.action, opts).await?;
        }
    }
    Ok(())
}

async fn load_catalog(path: Option<&std::path::Path>) -> anyhow::Result<CouponCatalog> {
    let Some(path) = path else {
        return Ok(CouponCatalog::default());
    };
    let catalog = CouponCatalog::from_json_file(path)
        .await
        .with_context(|| format!("loading catalog from {}", path.display()))?;
    info!("Loaded {} coupons from {}", catalog.len(), path.display());
    Ok(catalog)
}

async fn run_server(args: &Args, catalog: Arc<CouponCatalog>) -> anyhow::Result<()> {
    let config = args.coupon_config();
    let policy = args.policy.unwrap_or(AllocationPolicy::AnyUnclaimed);
    let event_bus = Arc::new(EventBus::new());

    let (engine, ledger) = match &args.database_url {
        Some(url) => {
            let db = Database::with_max_connections(url, args.max_connections)
                .await
                .context("connecting to Postgres")?;
            db.migrate().await.context("running migrations")?;

            let engine = match policy {
                AllocationPolicy::AnyUnclaimed => AllocationEngine::any_unclaimed(
                    catalog,
                    Arc::new(PostgresCouponRepository::new(db.pool().clone())),
                    config.max_claim_attempts,
                    Some(event_bus.clone()),
                ),
                AllocationPolicy::RoundRobin => AllocationEngine::round_robin(
                    catalog,
                    Arc::new(PostgresRotationCursor::new(db.pool().clone())),
                ),
            };
            let ledger = SharedClaimLedger::new(Arc::new(PostgresClaimRepository::new(db.pool().clone())));
            (engine, ledger)
        }
        None => {
            warn!("No database URL given; claims live in memory and vanish on exit");
            let engine = match policy {
                AllocationPolicy::AnyUnclaimed => AllocationEngine::any_unclaimed(
                    catalog,
                    Arc::new(InMemoryCouponPool::new()),
                    config.max_claim_attempts,
                    Some(event_bus.clone()),
                ),
                AllocationPolicy::RoundRobin => AllocationEngine::round_robin(
                    catalog,
                    Arc::new(KeyValueCursor::new(Arc::new(MemoryStore::new()))),
                ),
            };
            let ledger = SharedClaimLedger::new(Arc::new(InMemoryClaimRepository::new()));
            (engine, ledger)
        }
    };

    engine.seed_pool().await.context("seeding coupon pool")?;
    info!("Allocation policy: {}", engine.policy());

    let ledger = ledger.with_event_bus(event_bus.clone());
    let service = CouponService::new(Arc::new(engine), Arc::new(ledger), config);
    let state = AppState {
        service: Arc::new(service),
        event_bus,
    };

    if let Err(e) = server::serve(args.server_addr, state).await {
        error!("Server error: {:?}", e);
        return Err(e.into());
    }
    info!("Main finished. Goodbye!");
    Ok(())
}
