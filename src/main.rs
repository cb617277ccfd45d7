use std::{future::IntoFuture, process};

use presswork::{
    application::{
        convert::{
            Converter,
            discovery::{self, Capability},
        },
        error::{AppError, ErrorDetail, ErrorKind},
    },
    config::{self, Settings},
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, error_kind = error.kind().as_str(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, error_kind = error.kind().as_str(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Probe(_) => run_probe(settings).await,
    }
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let converter = Converter::initialize(&settings)
        .await
        .map_err(|err| AppError::initialization(err.to_string()))?;

    if !converter.is_ready() {
        ErrorDetail::new(
            ErrorKind::InitializationError,
            "main",
            "serve::startup",
            "No working renderer found; conversions will fail until one is installed",
        )
        .emit(None);
    }

    let router = http::build_router(HttpState::new(converter), &settings.cors)?;
    serve_http(&settings, router).await
}

async fn serve_http(settings: &Settings, router: axum::Router) -> Result<(), AppError> {
    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "presswork::server",
        op = "serve::listen",
        addr = %settings.server.addr,
        "HTTP server listening"
    );

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stop_tx.send(true);
        })
        .into_future();
    tokio::pin!(server);

    let grace = settings.server.graceful_shutdown;
    let grace_expired = async {
        if stop_rx.wait_for(|stopping| *stopping).await.is_err() {
            std::future::pending::<()>().await;
        }
        info!(
            target = "presswork::server",
            op = "serve::shutdown",
            grace_secs = grace.as_secs(),
            "Shutdown requested; draining in-flight requests"
        );
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| AppError::shutdown(format!("server error: {err}")))?;
            info!(target = "presswork::server", op = "serve::shutdown", "HTTP server stopped");
        }
        _ = grace_expired => {
            ErrorDetail::new(
                ErrorKind::ShutdownError,
                "main",
                "serve::shutdown",
                format!(
                    "In-flight requests still running after {}s; aborting them",
                    grace.as_secs()
                ),
            )
            .emit(None);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "presswork::server", error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target = "presswork::server", error = %err, "failed to listen for SIGTERM");
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

#[derive(Debug, Serialize)]
struct ProbeReport<'a> {
    renderer_ready: bool,
    ebook_converter_ready: bool,
    renderer: Option<&'a Capability>,
    ebook_converter: Option<&'a Capability>,
}

async fn run_probe(settings: Settings) -> Result<(), AppError> {
    let renderer = discovery::discover_renderer(&settings.renderer).await;
    let ebook_converter = discovery::discover_ebook_converter(&settings.renderer).await;

    let report = ProbeReport {
        renderer_ready: renderer.is_some(),
        ebook_converter_ready: ebook_converter.is_some(),
        renderer: renderer.as_ref(),
        ebook_converter: ebook_converter.as_ref(),
    };
    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|err| AppError::initialization(format!("failed to encode probe report: {err}")))?;
    println!("{rendered}");

    if renderer.is_none() {
        return Err(AppError::initialization("no working renderer found"));
    }
    Ok(())
}
