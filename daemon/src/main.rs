// Process entry point. Parses config, bootstraps the capability record,
// spawns one Worker Runtime per background job type plus the
// reconciliation scheduler, and serves the HTTP API until a shutdown
// signal arrives — the same `HttpServer::new(...).run()` plus
// `ServerHandle` shape as `tos_daemon`'s rpc bootstrap, scaled down to
// this process's simpler surface.

mod auth;
mod config;
mod idempotent;
mod routes;
mod signal_sink;
mod state;
mod webhook_auth;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use chrono::Duration as ChronoDuration;
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use money_common::model::RunType;
use money_reconciliation::{ReconciliationService, UserAccountLink};
use money_worker::handler::{BridgePollJob, DepositPollJob, OnboardingSignalJob, WalletProvisioningJob};
use money_worker::{WorkerConfig, WorkerRuntime};
use signal_sink::LogSignalSink;
use state::AppState;
use std::sync::Arc;
use std::time::Duration as StdDuration;

fn job_config(job_type: &str, poll_interval: StdDuration, batch_size: u32, worker_pool_size: usize) -> WorkerConfig {
    WorkerConfig {
        job_type: job_type.to_string(),
        poll_interval,
        batch_size,
        worker_pool_size,
        max_attempts: 5,
        base_backoff: ChronoDuration::seconds(2),
        max_backoff: ChronoDuration::minutes(10),
        jitter_factor: 0.2,
    }
}

/// Spawns `runtime.run(cancel)` as its own task and logs the final metrics
/// snapshot once `cancel` fires, so an operator watching logs can see each
/// job type's tally at shutdown.
fn spawn_worker(name: &'static str, runtime: Arc<WorkerRuntime>, cancel: tokio::sync::watch::Receiver<bool>) {
    tokio::spawn(async move {
        let metrics = runtime.run(cancel).await;
        log::info!(
            "{name} worker stopped: processed={} succeeded={} failed={} retried={}",
            metrics.processed,
            metrics.succeeded,
            metrics.failed,
            metrics.retried
        );
    });
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = config::Config::parse();
    let state = AppState::bootstrap(&config).await.context("failed to bootstrap application state")?;

    if config.bind_address.starts_with("0.0.0.0") {
        log::warn!("MONEY_BIND_ADDRESS is 0.0.0.0 — this exposes the HTTP API to every interface");
        log::warn!("use 127.0.0.1 unless this process sits behind a reverse proxy / firewall");
    }

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);

    let wallet_provisioning = Arc::new(WorkerRuntime::new(
        state.store.clone(),
        state.clock.clone(),
        job_config(
            "wallet_provisioning",
            StdDuration::from_secs(config.wallet_provisioning_poll_interval_secs),
            20,
            8,
        ),
        Arc::new(WalletProvisioningJob::new(state.custodian.clone())),
    ));
    spawn_worker("wallet_provisioning", wallet_provisioning, cancel_rx.clone());

    let onboarding_signal = Arc::new(WorkerRuntime::new(
        state.store.clone(),
        state.clock.clone(),
        job_config(
            "onboarding_signal",
            StdDuration::from_secs(config.onboarding_signal_poll_interval_secs),
            20,
            8,
        ),
        Arc::new(OnboardingSignalJob::new(vec![Arc::new(LogSignalSink)])),
    ));
    spawn_worker("onboarding_signal", onboarding_signal, cancel_rx.clone());

    let deposit_poll = Arc::new(WorkerRuntime::new(
        state.store.clone(),
        state.clock.clone(),
        job_config("deposit_poll", StdDuration::from_secs(config.deposit_poll_interval_secs), 1, 1),
        Arc::new(DepositPollJob::new(state.deposit.clone())),
    ));
    spawn_worker("deposit_poll", deposit_poll.clone(), cancel_rx.clone());

    let bridge_poll = Arc::new(WorkerRuntime::new(
        state.store.clone(),
        state.clock.clone(),
        job_config("bridge_poll", StdDuration::from_secs(config.bridge_poll_interval_secs), 1, 1),
        Arc::new(BridgePollJob::new(state.bridge.clone())),
    ));
    spawn_worker("bridge_poll", bridge_poll.clone(), cancel_rx.clone());

    // The sweep ticks for deposit_poll/bridge_poll are self-triggering
    // (their handler ignores the claimed job's payload and walks the whole
    // table) so each tick also needs a job queued to claim; enqueue one
    // seed job per type up front and let the handler's own idempotent
    // sweep behavior make re-delivery harmless.
    deposit_poll.enqueue("sweep".to_string(), serde_json::json!({})).await.context("failed to seed deposit_poll")?;
    bridge_poll.enqueue("sweep".to_string(), serde_json::json!({})).await.context("failed to seed bridge_poll")?;

    let reconciliation = ReconciliationService::new(
        state.store.clone(),
        state.ledger_port.clone(),
        state.custodian.clone(),
        state.brokerage.clone(),
        state.reconciliation_config.clone(),
    );
    {
        let mut cancel = cancel_rx.clone();
        let interval = StdDuration::from_secs(config.reconciliation_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            return;
                        }
                    }
                }
                // No persisted user/brokerage-account directory exists in
                // this workspace (see money_reconciliation::UserAccountLink
                // doc comment) so only the system-wide checks run here;
                // per-user checks activate once that directory is wired in.
                let links: Vec<UserAccountLink> = Vec::new();
                match reconciliation.run(RunType::Hourly, &links).await {
                    Ok(report) => log::info!(
                        "reconciliation run {} complete: passed={} failed={} exceptions={}",
                        report.id,
                        report.checks_passed,
                        report.checks_failed,
                        report.exceptions_count
                    ),
                    Err(e) => log::error!("reconciliation run failed: {e}"),
                }
            }
        });
    }

    let prometheus_handle = if config.prometheus_enabled {
        let (recorder, _) = PrometheusBuilder::new().build().context("failed to build prometheus recorder")?;
        let handle = recorder.handle();
        metrics::set_global_recorder(Box::new(recorder)).context("failed to set global prometheus recorder")?;
        Some(handle)
    } else {
        None
    };

    let bind_address = config.bind_address.clone();
    let threads = config.threads;
    let prometheus_route = config.prometheus_route.clone();

    let http_state = state.clone();
    let server = HttpServer::new(move || {
        let mut app = App::new()
            .app_data(web::Data::new(http_state.clone()))
            .app_data(web::Data::new(prometheus_handle.clone()))
            .configure(routes::configure);

        if let Some(route) = prometheus_route.strip_prefix('/').map(|_| prometheus_route.clone()) {
            app = app.route(&route, web::get().to(prometheus_metrics));
        }
        app
    })
    .workers(threads)
    .bind(&bind_address)
    .with_context(|| format!("failed to bind {bind_address}"))?
    .run();

    let handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl_c")?;
    log::info!("shutdown signal received, draining in-flight requests");
    cancel_tx.send(true).ok();
    handle.stop(true).await;
    server_task.await.context("http server task panicked")??;

    Ok(())
}

async fn prometheus_metrics(handle: web::Data<Option<PrometheusHandle>>) -> actix_web::HttpResponse {
    match handle.as_ref() {
        Some(handle) => actix_web::HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(handle.render()),
        None => actix_web::HttpResponse::NotFound().body("Prometheus metrics are not enabled"),
    }
}
