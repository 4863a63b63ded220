use {
    clap::Parser,
    std::sync::Arc,
    tracing::{info, warn},
    tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter},
    wa_relay::{
        server,
        session::{SessionController, TokioScheduler},
        store::FileStore,
        transport::loopback::LoopbackConnector,
        Config,
    },
};

fn init_telemetry(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "could not listen for SIGTERM");
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
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_telemetry(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "wa-relay starting");

    let store = Arc::new(FileStore::new(&config.auth_dir, &config.session_id));
    info!(path = %store.path().display(), "credential store");

    let connector = match config.loopback_link_after() {
        Some(delay) => LoopbackConnector::with_link_after(delay),
        None => LoopbackConnector::new(),
    };

    let session = SessionController::new(
        store,
        Arc::new(connector),
        Arc::new(TokioScheduler),
        config.reconnect_policy(),
    );
    session.start().await;

    let options = config.router_options();
    let app = server::build_router(session.clone(), &options);

    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    server::log_banner(addr, &options);

    server::serve(listener, app, shutdown_signal()).await?;

    session.shutdown(config.logout_on_shutdown).await;
    info!("wa-relay stopped");
    Ok(())
}
