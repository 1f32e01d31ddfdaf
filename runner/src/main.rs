// Runner binary entry point.
//
// Two modes:
//   runner serve   (default) long-running trigger controller + HTTP surface
//   runner once    execute a single manual Run and exit with a status the
//                  surrounding automation platform can act on:
//                  0 = published, 3 = no-op (nothing to persist), 1 = failure

mod http;

use anyhow::{Context, Result};
use common::config::Settings;
use common::controller::{ControllerConfig, TriggerController};
use common::executor::http::{HttpEnricher, HttpSourceClient};
use common::executor::{Enricher, EtlExecutor};
use common::lock::LocalRunLock;
use common::models::{RunOutcome, TriggerReason};
use common::publisher::{ChangeGatedPublisher, SyncDriver};
use common::retry::ExponentialBackoff;
use common::store::{FsSnapshotStore, SnapshotStore};
use std::sync::Arc;
use tracing::{error, info};

const EXIT_PUBLISHED: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_NOOP: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    let mode = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());

    // Configuration is loaded and validated before anything else; a
    // malformed schedule stops the process here.
    let settings = Settings::load().context("Failed to load configuration")?;

    common::telemetry::init_logging(&settings.observability.log_level)
        .context("Failed to initialize logging")?;

    info!(
        job = %settings.job.name,
        schedule = %settings.job.schedule,
        timezone = %settings.job.timezone,
        mode = %mode,
        "Starting changegate runner"
    );

    let store: Arc<dyn SnapshotStore> = Arc::new(
        FsSnapshotStore::new(&settings.store.data_dir)
            .context("Failed to open snapshot store")?,
    );
    let controller = Arc::new(build_controller(&settings, store.clone())?);

    match mode.as_str() {
        "once" => {
            let code = run_once(&controller).await;
            std::process::exit(code);
        }
        "serve" => serve(controller, store, &settings).await,
        other => anyhow::bail!("unknown mode '{}', expected 'serve' or 'once'", other),
    }
}

fn build_controller(
    settings: &Settings,
    store: Arc<dyn SnapshotStore>,
) -> Result<TriggerController> {
    let source = HttpSourceClient::new(&settings.source)
        .map_err(|e| anyhow::anyhow!("Failed to build source client: {}", e))?;

    let enricher: Option<Arc<dyn Enricher>> = if settings.enricher.enabled {
        let enricher = HttpEnricher::new(&settings.enricher)
            .map_err(|e| anyhow::anyhow!("Failed to build enricher client: {}", e))?;
        Some(Arc::new(enricher))
    } else {
        None
    };

    let executor = EtlExecutor::new(
        Arc::new(source),
        enricher,
        settings.job.partial_failure,
        settings.source.fetch_concurrency,
        Arc::new(ExponentialBackoff::from_settings(&settings.retry)),
    );
    let publisher = ChangeGatedPublisher::new(store);
    let driver = Arc::new(SyncDriver::new(executor, publisher));

    let schedule = settings.job_schedule()?;
    Ok(TriggerController::new(
        ControllerConfig::from_settings(settings),
        schedule,
        Arc::new(LocalRunLock::new()),
        driver,
    ))
}

/// Execute a single manual Run and map its outcome to an exit code
async fn run_once(controller: &TriggerController) -> i32 {
    match controller.run_now(TriggerReason::Manual).await {
        Some(outcome) => {
            match serde_json::to_string(&outcome) {
                Ok(line) => println!("{}", line),
                Err(e) => error!(error = %e, "Failed to serialize run outcome"),
            }
            match outcome {
                RunOutcome::Published { .. } => EXIT_PUBLISHED,
                RunOutcome::NoOp => EXIT_NOOP,
                RunOutcome::Failed { .. } => EXIT_FAILURE,
            }
        }
        None => {
            error!("Run skipped: another run holds the lock");
            EXIT_FAILURE
        }
    }
}

async fn serve(
    controller: Arc<TriggerController>,
    store: Arc<dyn SnapshotStore>,
    settings: &Settings,
) -> Result<()> {
    let state = http::AppState {
        handle: controller.handle(),
        store,
        push_secret_env: settings.triggers.push_secret_env.clone(),
    };
    let app = http::router(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "Trigger HTTP surface listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP server error");
        }
    });

    let controller_for_shutdown = controller.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        controller_for_shutdown.shutdown();
    });

    controller.start().await?;
    server.abort();

    info!("Runner stopped");
    Ok(())
}
