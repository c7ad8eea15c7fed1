use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aibrush_coordinator::api::{CoordinatorApi, HttpTimeouts};
use aibrush_coordinator::notifications::NotificationChannel;
use aibrush_sandbox::launcher::SandboxLauncher;
use aibrush_sandbox::registry::ProcessRegistry;
use aibrush_worker::config::WorkerConfig;
use aibrush_worker::killswitch::KillSwitch;
use aibrush_worker::supervisor::Supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        api_url = %config.api_url,
        pool_size = config.pool_size,
        queue_capacity = config.queue_capacity,
        model = %config.initial_model,
        ranking = config.enable_ranking,
        work_dir = %config.work_dir.display(),
        "Loaded worker configuration",
    );

    // --- Coordinator ---
    let timeouts = HttpTimeouts {
        request: config.http_timeout,
        connect: config.http_connect_timeout,
    };
    let coordinator = Arc::new(
        CoordinatorApi::new(config.api_url.clone(), config.token.clone(), timeouts)
            .context("Cannot build coordinator HTTP client")?,
    );
    let notifications = NotificationChannel::new(&config.api_url, config.token.clone())
        .context("Cannot derive notification URL")?;

    // --- Sandboxes ---
    let registry = ProcessRegistry::new();
    let launcher = SandboxLauncher::new(
        config.python_bin.clone(),
        config.model_scripts_dir.clone(),
        config.work_dir.clone(),
        registry.clone(),
    );

    // --- Kill switch ---
    let kill_switch = Arc::new(KillSwitch::from_config(&config));
    kill_switch.register_shutdown_hook("sandboxes", move || {
        let killed = registry.kill_all();
        tracing::info!(killed, "Sandbox processes killed");
    });

    // --- Pipeline ---
    Supervisor::new(config, coordinator, Arc::new(launcher), kill_switch)
        .with_notifications(notifications)
        .run(shutdown_signal())
        .await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Install the global subscriber. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "aibrush_worker=info,aibrush_sandbox=info,aibrush_coordinator=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
