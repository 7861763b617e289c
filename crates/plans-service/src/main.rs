//! Plans worker - runs the expiry and automatic renewal batch jobs.
//!
//! Flags: `--once` runs a single pass, `--dry-run` only logs the accounts that would be
//! renewed.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plans_service::{AutorenewOptions, PlansEngine, ServiceConfig, TedbClient, ViesClient};
use plans_store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,plans=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let once = args.iter().any(|a| a == "--once");
    let dry_run = args.iter().any(|a| a == "--dry-run");

    tracing::info!(once, dry_run, "Starting plans worker");

    let config = ServiceConfig::from_env();

    tracing::info!(
        data_dir = %config.data_dir,
        currency = %config.plans.currency,
        taxation = ?config.plans.taxation_policy,
        tedb_configured = %config.tedb_url.is_some(),
        interval_seconds = config.worker_interval_seconds,
        "Service configuration loaded"
    );

    let store = open_store(&config)?;

    let mut builder = PlansEngine::builder(config.plans.clone(), store)
        .vies(Arc::new(ViesClient::new(&config.vies_url, config.http_timeout())?));
    if let Some(url) = &config.tedb_url {
        builder = builder.rates(Arc::new(TedbClient::new(url, config.http_timeout())?));
    }
    let engine = builder.build()?;

    let options = AutorenewOptions {
        providers: (!config.autorenew_providers.is_empty())
            .then(|| config.autorenew_providers.clone()),
        throttle: Duration::from_secs(config.autorenew_throttle_seconds),
        catch_exceptions: true,
        dry_run,
        now: None,
    };

    let mut interval =
        tokio::time::interval(Duration::from_secs(config.worker_interval_seconds.max(1)));
    loop {
        interval.tick().await;
        run_pass(&engine, &options).await;
        if once {
            break;
        }
    }

    tracing::info!("Plans worker finished");
    Ok(())
}

async fn run_pass(engine: &PlansEngine, options: &AutorenewOptions) {
    if !options.dry_run {
        let today = engine.clock().today();
        if let Err(e) = engine.expire_accounts(today) {
            tracing::warn!(error = %e, "Expiry run failed");
        }
    }
    match engine.autorenew_accounts(options).await {
        Ok(renewed) => tracing::info!(count = renewed.len(), "Renewal run finished"),
        Err(e) => tracing::warn!(error = %e, "Renewal run failed"),
    }
}

#[cfg(feature = "rocksdb-backend")]
fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    Ok(Arc::new(plans_store::RocksStore::open(&config.data_dir)?))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    tracing::warn!(
        path = %config.data_dir,
        "Built without rocksdb-backend, using a memory store"
    );
    Ok(Arc::new(plans_store::MemoryStore::new()))
}
