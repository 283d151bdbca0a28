use kube_image_tracker::config::load_config;
use kube_image_tracker::registry::DeploymentRegistry;
use kube_image_tracker::state::AppState;
use kube_image_tracker::{controller, init_tracing, webserver};
use std::env;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");
    info!("Starting kube-image-tracker {}", env!("CARGO_PKG_VERSION"));

    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
    let config = load_config(&config_path)?;
    let registry = DeploymentRegistry::new();

    let subscription =
        controller::maybe_start(&config, registry.clone(), controller::create_client()).await;

    let mut scheduler = JobScheduler::new().await?;
    if let Some(subscription) = &subscription {
        let resync_schedule = config.watcher.resync_schedule.clone();
        if resync_schedule.is_empty() {
            info!("Periodic pod resync disabled");
        } else {
            info!("Executing pod resync at cron schedule {}", resync_schedule);
            let resync = subscription.resync_handle();
            let job = Job::new_async(resync_schedule, move |_uuid, _l| {
                let resync = resync.clone();
                Box::pin(async move {
                    if let Err(e) = resync.request() {
                        error!("Error requesting pod resync: {:?}", e);
                    }
                })
            })?;
            scheduler.add(job).await?;
        }
    }
    scheduler.start().await?;

    let app = webserver::create_app(AppState { registry });
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.webserver.port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    if let Some(subscription) = subscription {
        subscription.shutdown().await;
    }
    scheduler.shutdown().await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
