//! sumdrop server binary.
//!
//! Accepts multipart uploads on any path, stores each file in the output
//! directory under `<time> <md5> <original name>`, and serves the upload page
//! when a request carries no files.

mod checksum;
mod config;
mod error;
mod form;
mod frontend;
mod http;
mod ingest;
mod logging;
mod naming;
mod spool;
mod upload;

use axum::extract::Extension;
use axum::http::Request;
use axum::routing::any;
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::io::{Error as IoError, ErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::config::{Args, Config, SHUTDOWN_GRACE_SECS};
use crate::ingest::Ingestor;
use crate::naming::SystemClock;

shadow!(build);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), IoError> {
    let args = Args::parse();
    let cwd = std::env::current_dir()?;
    let config = Arc::new(args.into_config(&cwd));
    logging::init_logging(config.log_file.as_deref())?;

    tokio::fs::create_dir_all(&config.output_dir).await?;
    let ingestor = Arc::new(Ingestor::new(
        config.output_dir.clone(),
        Arc::new(SystemClock),
    ));

    let app = build_app(config.clone(), ingestor).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                info_span!(
                    env!("CARGO_CRATE_NAME"),
                    client_ip = http::client_ip(request),
                    method = ?request.method(),
                    path = ?request.uri().path(),
                )
            })
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
    );

    let addr = tokio::net::lookup_host(config.listen_addr.as_str())
        .await?
        .next()
        .ok_or_else(|| {
            IoError::new(
                ErrorKind::InvalidInput,
                format!("listen address {} did not resolve", config.listen_addr),
            )
        })?;
    let handle = Handle::new();

    info!(
        output_dir = %config.output_dir.display(),
        "🚀 Starting HTTP server at {}", addr
    );

    tokio::spawn(shutdown_signal(handle.clone()));
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    info!("Stopped");
    Ok(())
}

/// Routes every method and path to the upload handler.
fn build_app(config: Arc<Config>, ingestor: Arc<Ingestor>) -> Router {
    let body_limit = http::body_limit(config.max_body_size);
    Router::new()
        .route("/", any(upload::handle_upload))
        .fallback(upload::handle_upload)
        .layer(body_limit)
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(Extension(config))
        .layer(Extension(ingestor))
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal, stopping");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
