//! Render worker binary.
//!
//! `rmix-worker` runs the worker pool until interrupted.
//! `rmix-worker <batch.json>` admits the batch, renders it in-process and
//! prints the final job records.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rmix_media::check_binary;
use rmix_models::BatchRequest;
use rmix_queue::{connect_store, RedisStoreConfig};
use rmix_worker::metrics::init_metrics;
use rmix_worker::{wait_for_terminal, BatchSubmitter, FsClipCatalog, JobExecutor, WorkerConfig};

const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for rediss:// URLs)
    let provider_installed = rustls::crypto::ring::default_provider().install_default().is_ok();

    dotenvy::dotenv().ok();
    init_tracing()?;

    if !provider_installed {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting rmix-worker");

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr.parse().context("invalid METRICS_ADDR")?;
        init_metrics(addr).context("failed to start metrics exporter")?;
        info!("Serving metrics on {}", addr);
    }

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    for program in [&config.ffmpeg_bin, &config.ffprobe_bin] {
        let path = check_binary(program)?;
        info!("Using {}", path.display());
    }

    let store = connect_store(RedisStoreConfig::from_env())
        .await
        .context("failed to connect job store")?;
    let executor = Arc::new(JobExecutor::with_ffmpeg(config.clone(), Arc::clone(&store)));
    info!("Registered as consumer '{}'", executor.consumer_name());

    match std::env::args().nth(1) {
        Some(batch_path) => {
            let body = tokio::fs::read_to_string(&batch_path)
                .await
                .with_context(|| format!("failed to read {batch_path}"))?;
            let request: BatchRequest =
                serde_json::from_str(&body).with_context(|| format!("invalid batch in {batch_path}"))?;

            let submitter = BatchSubmitter::new(
                Arc::clone(&store),
                Arc::new(FsClipCatalog::new(&config.upload_dir)),
                config.output_layout(),
            );
            let submission = submitter.submit(request).await?;
            for skipped in &submission.skipped {
                info!("Combination {} skipped: {}", skipped.index, skipped.reason);
            }

            let runner = Arc::clone(&executor);
            let run_handle = tokio::spawn(async move { runner.run().await });

            let snapshots = wait_for_terminal(store.as_ref(), &submission.job_ids(), RESULT_POLL_INTERVAL).await;
            executor.shutdown();
            run_handle.await.context("executor task panicked")??;

            println!("{}", serde_json::to_string_pretty(&snapshots?)?);
        }
        None => {
            let signal_executor = Arc::clone(&executor);
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Received shutdown signal");
                signal_executor.shutdown();
            });

            executor.run().await?;
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("rmix=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}
