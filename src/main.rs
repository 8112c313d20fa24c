// Session-recording ingestion consumer -- binary entry point.
//
// The fetch loop, broker connection, and consumer-group rebalance
// callbacks are out of scope for this crate (spec §1, see
// `collaborators::LogClient`'s doc comment): a real deployment's own
// binary owns the broker client, and calls `Ingester::handle_batch` /
// `assign` / `revoke` from its poll loop and rebalance callbacks. What
// this binary does is the rest of the lifecycle: load configuration,
// wire the collaborators, and run the periodic maintenance pass that
// flushes, sweeps overflow, and commits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use session_ingester::collaborators::{BlobSink, KvStore, LogClient, MetricsSink, TeamResolver};
use session_ingester::config::Config;
use session_ingester::fakes::InMemoryTeamResolver;
use session_ingester::metrics::IngesterMetrics;
use session_ingester::{Ingester, Result, Subsystems, VERSION};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    print_banner();

    let install_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config_file = install_dir.join("session-ingester.toml");
    let config = Config::load(Some(&config_file))?;

    print_startup_info(&config, &config_file);

    let log_client = build_log_client(&config)?;
    let blob_sink = build_blob_sink(&config).await?;
    let kv = build_kv_store(&config).await?;
    let team_resolver = build_team_resolver();
    let metrics: Arc<dyn MetricsSink> = if config.metrics_enabled {
        Arc::new(IngesterMetrics::new())
    } else {
        Arc::new(session_ingester::collaborators::NullMetricsSink)
    };

    let ingester = Arc::new(Ingester::new(
        config.clone(),
        log_client,
        blob_sink,
        kv,
        team_resolver,
        metrics,
        Subsystems::default(),
    ));

    info!(topic = config.topic(), group = %config.consumer_group, "ingester ready, starting maintenance loop");

    run_maintenance_loop(ingester, config.commit_interval()).await;
    Ok(())
}

/// Ticks `Ingester::run_maintenance` on `interval`, forever, until
/// ctrl-c. The broker-driven `handle_batch`/`assign`/`revoke` calls live
/// in whatever process embeds this library against a real `LogClient`.
async fn run_maintenance_loop(ingester: Arc<Ingester>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                if let Err(e) = ingester.run_maintenance(now_ms).await {
                    error!(error = %e, "maintenance pass failed, will retry next tick");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, exiting maintenance loop");
                break;
            }
        }
    }
}

#[cfg(feature = "kafka")]
fn build_log_client(config: &Config) -> Result<Arc<dyn LogClient>> {
    let client = session_ingester::adapters::kafka::KafkaLogClient::new(
        &config.kafka_bootstrap_servers,
        &config.consumer_group,
    )?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "kafka"))]
fn build_log_client(_config: &Config) -> Result<Arc<dyn LogClient>> {
    warn!("built without the `kafka` feature; falling back to an in-memory log client (commits go nowhere)");
    Ok(Arc::new(session_ingester::fakes::InMemoryLogClient::default()))
}

#[cfg(feature = "s3")]
async fn build_blob_sink(config: &Config) -> Result<Arc<dyn BlobSink>> {
    let sink = session_ingester::adapters::s3::S3BlobSink::new(config.blob_bucket.clone()).await;
    Ok(Arc::new(sink))
}

#[cfg(not(feature = "s3"))]
async fn build_blob_sink(_config: &Config) -> Result<Arc<dyn BlobSink>> {
    warn!("built without the `s3` feature; falling back to an in-memory blob sink (nothing is durably stored)");
    Ok(Arc::new(session_ingester::fakes::InMemoryBlobSink::default()))
}

#[cfg(feature = "redis")]
async fn build_kv_store(config: &Config) -> Result<Arc<dyn KvStore>> {
    let store = session_ingester::adapters::redis_kv::RedisKvStore::new(&config.redis_url).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn build_kv_store(_config: &Config) -> Result<Arc<dyn KvStore>> {
    warn!("built without the `redis` feature; falling back to an in-memory kv store (watermarks don't survive a restart)");
    Ok(Arc::new(session_ingester::fakes::InMemoryKvStore::default()))
}

/// Team/auth lookup has no bundled adapter (spec treats it as an
/// external authorization service, out of scope); a real deployment
/// supplies its own `TeamResolver` when embedding this library directly.
fn build_team_resolver() -> Arc<dyn TeamResolver> {
    warn!("no TeamResolver wired in; every message will be treated as an unknown team and dropped");
    Arc::new(InMemoryTeamResolver::default())
}

fn print_banner() {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║      Session Recording Ingestion Consumer v{:<10}║", VERSION);
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
}

fn print_startup_info(config: &Config, config_file: &PathBuf) {
    println!("Configuration file:    {}", config_file.display());
    println!("Topic:                 {}", config.topic());
    println!("Consumer group:        {}", config.consumer_group);
    println!("Local spill directory: {}", config.local_spill_directory);
    println!("Max buffer age:        {}s", config.max_buffer_age_seconds);
    println!("Max buffer size:       {} bytes", config.max_buffer_size_bytes);
    println!("Partition idle:        {}s", config.partition_idle_seconds);
    println!("Commit interval:       {}s", config.commit_interval_seconds);
    println!("Revocation deadline:   {}s", config.revocation_deadline_seconds);
    println!("Overflow detection:    {}", if config.overflow_enabled { "enabled" } else { "disabled" });
    println!("Consume-overflow mode: {}", config.consume_overflow);
    println!("Metrics:               {}", if config.metrics_enabled { "enabled" } else { "disabled" });
    println!();
}
