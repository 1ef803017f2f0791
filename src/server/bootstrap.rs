use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::ControllerConfig;
use crate::metrics::Metrics;
use crate::orchestrator::docker::DockerOrchestrator;
use crate::proxy::ProxyDriver;
use crate::reactor::Reactor;
use crate::server;
use crate::tls::acme::{DomainVerifier, SslManager};
use crate::tls::SslProcessor;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
}

/// Controller lifecycle: init → bring up proxy → learn topology → reload →
/// serve admin + renewal → run the event reactor → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let config = ControllerConfig::load(&args.config_path)?;
    let metrics = Metrics::install();

    let orchestrator: Arc<DockerOrchestrator> =
        Arc::new(DockerOrchestrator::connect(config.docker_host.as_deref().unwrap_or(""))?);

    let driver = Arc::new(ProxyDriver::new(
        "nginx",
        format!("{}/nginx.conf", config.nginx_config_dir),
        config.challenge_dir.clone(),
    )?);

    let ssl_manager = Arc::new(
        SslManager::new(
            config.ssl_dir.clone(),
            config.challenge_dir.clone(),
            config.acme_directory_url.clone(),
            config.acme_contact_email.clone(),
        )
        .with_verifier(driver.clone() as Arc<dyn DomainVerifier>),
    );

    let ssl_processor = Arc::new(SslProcessor::new(
        ssl_manager,
        config.renewal_min_remaining_days,
        config.renewal_max_sleep_days,
    ));

    let mut reactor = Reactor::bootstrap(config.clone(), orchestrator, driver, ssl_processor.clone())
        .await
        .map_err(|e| anyhow::anyhow!("reactor bootstrap failed: {e}"))?;

    let state = server::ControllerState::new(config.clone(), metrics, reactor.snapshot_handle());

    let shutdown = Arc::new(Notify::new());

    let renewal_handle = tokio::spawn({
        let ssl_processor = ssl_processor.clone();
        let shutdown = shutdown.clone();
        async move { ssl_processor.run_renewal_loop(shutdown).await }
    });

    let admin_handle = tokio::spawn({
        let listen = config.admin_listen.clone();
        let state = state.clone();
        async move { server::run_admin_server(&listen, state).await }
    });

    let reactor_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { reactor.run(shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    if let Err(e) = reactor_handle.await {
        tracing::error!("server: reactor task error: {}", e);
    }
    admin_handle.abort();
    if let Err(e) = renewal_handle.await {
        if !e.is_cancelled() {
            tracing::error!("server: renewal task error: {}", e);
        }
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}
