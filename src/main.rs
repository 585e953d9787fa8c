//! power-model: train and serve power estimation models.
//!
//! Subcommands:
//!   train          fit every pipeline/model pair and write the artifacts
//!   run            predict on an interval and export Prometheus gauges
//!   compute-error  score the trained models over a past time range
//!   serve          answer JSON estimation requests on a Unix socket

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use power_model::config::{load_pipeline, resolve_range, Cli, Command, PipelineConfig};
use power_model::datasource::prometheus::PrometheusClient;
use power_model::server::estimator::EstimatorServer;
use power_model::server::metrics::{build_router, run_polling, AppState, PredictionMetrics};
use power_model::server::shutdown_signal;
use power_model::trainer::report::range_table;
use power_model::trainer::{self, Predictor};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!("power-model v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = dispatch(cli.command).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    let level = cli.log_level.as_directive();
    let filter = format!("power_model={level},tower_http={level}");
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn dispatch(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Train { file } => {
            let config = load(&file)?;
            let source = PrometheusClient::new(&config.prometheus.url)?;
            trainer::train(&config, &source)
                .await
                .context("training failed")?;
            println!("Training completed successfully.");
        }

        Command::Run {
            file,
            interval,
            metrics_listen,
        } => {
            let config = load(&file)?;
            let predictor = Arc::new(load_predictor(&config)?);
            let metrics = Arc::new(PredictionMetrics::new()?);

            let state = Arc::new(AppState {
                metrics: metrics.clone(),
                start_time: Instant::now(),
            });
            let listener = TcpListener::bind(metrics_listen)
                .await
                .with_context(|| format!("failed to bind {metrics_listen}"))?;
            info!("Metrics listening on {metrics_listen}");

            let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
            let http = tokio::spawn(async move {
                axum::serve(listener, build_router(state))
                    .with_graceful_shutdown(async {
                        let _ = stop_rx.await;
                    })
                    .await
            });

            run_polling(
                predictor,
                metrics,
                Duration::from_secs(interval.max(1)),
                shutdown_signal(),
            )
            .await;

            let _ = stop_tx.send(());
            http.await??;
        }

        Command::ComputeError {
            file,
            start,
            end,
            duration,
        } => {
            let config = load(&file)?;
            let (start, end) = resolve_range(start, end, duration, Utc::now())?;
            let predictor = load_predictor(&config)?;

            println!("Predicting from {start} to {end}");
            let scores = predictor
                .predict_range(start, end, None)
                .await
                .context("failed to compute errors")?;
            println!("{}", range_table(&scores));
        }

        Command::Serve { file, socket } => {
            let config = load(&file)?;
            let predictor = Arc::new(load_predictor(&config)?);
            let server = EstimatorServer::bind(&socket, predictor)
                .with_context(|| format!("failed to bind {}", socket.display()))?;
            server.serve(shutdown_signal()).await?;
        }
    }
    Ok(())
}

fn load(file: &std::path::Path) -> anyhow::Result<PipelineConfig> {
    let config = load_pipeline(file)?;
    info!(
        file = %file.display(),
        prometheus = %config.prometheus.url,
        pipelines = config.train.pipelines.len(),
        models = config.train.models.len(),
        "Configuration loaded"
    );
    Ok(config)
}

fn load_predictor(config: &PipelineConfig) -> anyhow::Result<Predictor> {
    let source = Arc::new(PrometheusClient::new(&config.prometheus.url)?);
    let predictor = Predictor::load(config, source).context("failed to load trained models")?;
    Ok(predictor)
}
