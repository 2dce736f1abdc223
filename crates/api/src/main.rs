use flowra_api::app;
use flowra_api::config::Config;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    flowra_observability::init_with(&config.log_level, config.log_format);

    let running = match app::build_app(&config).await {
        Ok(running) => running,
        Err(err) => {
            tracing::error!(error = %err, "startup failed");
            std::process::exit(1);
        }
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, addr = %addr, "bind failed");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or(addr), "listening");

    let serve = axum::serve(listener, running.router())
        .with_graceful_shutdown(shutdown_signal());
    if let Err(err) = serve.await {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }

    // Stop accepting work first (axum already drained), then wind down the
    // pipeline in order: workers, hub, subscribers, pools.
    match tokio::time::timeout(config.shutdown_timeout, running.shutdown()).await {
        Ok(()) => tracing::info!("bye"),
        Err(_) => tracing::warn!("shutdown timed out; exiting anyway"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
