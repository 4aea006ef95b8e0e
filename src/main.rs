// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use jwks_auth::{
    api::router,
    auth::JwksManager,
    config::{LogFormat, ServerConfig, Settings, DEFAULT_LOG_FILTER},
    error::StartupError,
    state::AppState,
};

/// How long in-flight HTTPS connections may drain after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing(LogFormat::from_lookup(|name| std::env::var(name).ok()));

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "Server failed to start");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn run() -> Result<(), StartupError> {
    let config = ServerConfig::from_env()?;
    let settings = Settings::load(&config.settings_path)?;

    let jwks = JwksManager::with_timeout(config.fetch_timeout)?.with_cache_ttl(config.cache_ttl);
    let auth = settings.authenticator(config.environment.as_deref(), jwks)?;
    tracing::info!(
        environment = config.environment.as_deref().unwrap_or("default"),
        jwks_uri = %auth.trust().jwks_uri(),
        audience = auth.trust().audience(),
        cache_ttl_secs = config.cache_ttl.as_secs(),
        "Loaded authentication settings"
    );

    let app = router(AppState::new(auth));

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    match &config.tls {
        Some(paths) => {
            // rustls needs a process-wide provider before any TLS config is built
            if rustls::crypto::ring::default_provider()
                .install_default()
                .is_err()
            {
                tracing::debug!("rustls crypto provider already installed");
            }
            let tls = RustlsConfig::from_pem_file(&paths.cert, &paths.key)
                .await
                .map_err(StartupError::Tls)?;

            let handle = Handle::<SocketAddr>::new();
            tokio::spawn({
                let handle = handle.clone();
                let shutdown = shutdown.clone();
                async move {
                    shutdown.cancelled().await;
                    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                }
            });

            tracing::info!(addr = %config.addr, "Listening on https (docs at /docs)");
            axum_server::bind_rustls(config.addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(StartupError::Serve)?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(config.addr)
                .await
                .map_err(|source| StartupError::Bind {
                    addr: config.addr,
                    source,
                })?;

            tracing::info!(addr = %config.addr, "Listening on http (docs at /docs)");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.clone().cancelled_owned())
                .await
                .map_err(StartupError::Serve)?;
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %error, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(error = %error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
    token.cancel();
}
