use futures::future::join_all;
use mimalloc::MiMalloc;
use moka::sync::Cache;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use magpie::config::{Config, CrawlStrategy};
use magpie::credentials;
use magpie::partition::{self, default_seeds};
use magpie::queue::{self, QueueSettings};
use magpie::remote::{CatalogClient, LiveEstimator};
use magpie::store::{CounterAggregator, ShardRouter};
use magpie::worker::CrawlWorker;
use magpie::MagpieError;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::from_toml();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        data_dir = %cfg.basic.data_dir.display(),
        api_url = %cfg.crawl.api_url,
        proxy = %cfg.crawl.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        shard_count = cfg.crawl.shard_count,
        workers = cfg.crawl.workers,
        strategy = ?cfg.crawl.strategy,
        credentials = cfg.credentials.tokens.len(),
        "Starting catalog crawl"
    );

    std::fs::create_dir_all(&cfg.basic.data_dir)?;

    let router = Arc::new(ShardRouter::open(&cfg.basic.data_dir, cfg.crawl.shard_count).await?);
    let aggregator = CounterAggregator::new(router.clone());

    let queue_url = format!(
        "sqlite://{}",
        cfg.basic.data_dir.join("queue.sqlite").display()
    );
    let queue = queue::spawn(
        &queue_url,
        QueueSettings {
            lease_secs: cfg.crawl.lease_secs,
            max_attempts: cfg.crawl.max_attempts,
            ..QueueSettings::default()
        },
    )
    .await;

    let credentials = credentials::spawn(cfg.credentials.clone()).await;
    let client = Arc::new(CatalogClient::new(&cfg.crawl)?);

    // Planning is deterministic and enqueueing is keyed on the unit spec,
    // so re-running after a crash re-registers nothing.
    let units = match cfg.crawl.strategy {
        CrawlStrategy::IdRanges => {
            let [lo, hi] = cfg
                .crawl
                .id_range
                .ok_or_else(|| MagpieError::UnexpectedError(
                    "crawl.id_range is required for the id_ranges strategy".to_string(),
                ))?;
            partition::plan_id_ranges(lo, hi, cfg.crawl.unit_size)?
        }
        CrawlStrategy::Queries => {
            let estimator = LiveEstimator::new(client.clone(), credentials.clone());
            partition::plan_queries(
                default_seeds(&cfg.crawl.languages),
                &estimator,
                cfg.crawl.search_result_cap,
                &cfg.crawl.languages,
            )
            .await?
        }
    };

    let registered = queue.enqueue(units).await?;
    let depth = queue.depth().await?;
    info!(
        registered,
        outstanding = depth.outstanding(),
        "Crawl plan enqueued"
    );

    let seen_repos: Cache<String, ()> = Cache::new(100_000);
    let mut workers = Vec::with_capacity(cfg.crawl.workers);
    for worker_id in 0..cfg.crawl.workers {
        let worker = CrawlWorker::new(
            worker_id,
            queue.clone(),
            credentials.clone(),
            client.clone(),
            router.clone(),
            aggregator.clone(),
            seen_repos.clone(),
            cfg.crawl.retry_max_times,
        );
        workers.push(tokio::spawn(worker.run()));
    }

    let monitor_queue = queue.clone();
    let monitor = tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            tick.tick().await;
            if let Ok(depth) = monitor_queue.depth().await {
                info!(
                    pending = depth.pending,
                    leased = depth.leased,
                    done = depth.done,
                    dead_letter = depth.dead_letter,
                    "Queue depth"
                );
            }
        }
    });

    let crawl = async {
        for outcome in join_all(workers).await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Worker exited with error"),
                Err(e) => error!(error = %e, "Worker task panicked"),
            }
        }
    };

    tokio::select! {
        () = crawl => {
            let depth = queue.depth().await?;
            let dead = queue.dead_letters().await?;
            for unit in &dead {
                warn!(unit_id = unit.id, unit = %unit.spec, attempts = unit.attempt_count, "Dead-lettered unit");
            }
            info!(
                done = depth.done,
                dead_letter = depth.dead_letter,
                "Crawl finished"
            );
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received, stopping");
        }
    }

    monitor.abort();
    queue.stop();
    credentials.stop();
    info!("Crawler has shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { /* ... */ },
        _ = terminate => { /* ... */ },
    }
}
