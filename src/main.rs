use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use ocr_relay::config::RelayConfig;
use ocr_relay::models::UploadEvent;
use ocr_relay::services::broadcast::SessionRegistry;
use ocr_relay::services::correlator::RequestCorrelator;
use ocr_relay::services::relay::{self, Relay};
use ocr_relay::services::upload_store::UploadStore;
use ocr_relay::services::worker_channel::{ZmqTransport, spawn_request_channel};
use ocr_relay::{AppState, create_app};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file for the standalone mode (overrides the configured default)
    input_filename: Option<String>,

    /// Read settings from a config.json shared with the OCR worker
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for the HTTP/WS server
    #[arg(short, long)]
    port: Option<u16>,

    /// Send the input file to the worker once, print the result and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ocr_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => RelayConfig::from_json_file(path)?,
        None => RelayConfig::from_env(),
    };
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(name) = args.input_filename {
        config.default_input_filename = name;
    }

    info!("🚀 Starting OCR relay (pid {})...", std::process::id());
    info!(
        "⚙️  Max Size={}MB, Body limit={} bytes",
        config.max_file_size / 1024 / 1024,
        config.body_limit()
    );

    if args.once {
        return run_standalone(&config).await;
    }

    // Relay wiring: uploads -> relay -> worker channel -> relay -> sessions
    let (upload_tx, upload_rx) = mpsc::unbounded_channel();
    let sessions = SessionRegistry::new();
    let transport = ZmqTransport::new(config.worker_address());
    info!("🔌 Worker channel -> {}", transport.address());
    let channel = spawn_request_channel(transport);
    let relay = Relay::new(
        RequestCorrelator::for_current_process(),
        channel.outbound,
        sessions.clone(),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (relay_done_tx, relay_done_rx) = oneshot::channel::<()>();
    let relay_task = tokio::spawn(async move {
        let res = relay.run(upload_rx, channel.replies, shutdown_rx).await;
        let _ = relay_done_tx.send(());
        res
    });

    let state = AppState::new(upload_tx, sessions, config.clone());
    info!("📂 Upload dir: {}", state.store.dir().display());

    let app = create_app(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            })
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            ),
    );

    let addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.http_host, config.http_port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    // Either a signal or a relay that stopped on its own drains the server
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = relay_done_rx => {
                    warn!("🛑 Relay stopped, draining the server...");
                }
            }
            let _ = shutdown_tx.send(true);
        })
        .await?;
    info!("🛑 Server shut down gracefully.");

    relay_task.await.context("Relay task panicked")??;
    info!("🛑 Relay stopped.");

    Ok(())
}

async fn run_standalone(config: &RelayConfig) -> anyhow::Result<()> {
    let store = UploadStore::new(config.upload_dir.clone());
    let file_name = config.default_input_filename.clone();
    let event = UploadEvent {
        file_path: store.path_for(&file_name),
        file_size_bytes: store.size_of(&file_name).await?,
        file_name,
        session_id: "standalone".to_string(),
    };

    let mut transport = ZmqTransport::new(config.worker_address());
    info!(
        "🔎 Sending {} to {}",
        event.file_path.display(),
        transport.address()
    );
    let result = relay::run_once(&mut transport, RequestCorrelator::for_current_process(), event)
        .await?;

    println!("{}", result.message);
    for (i, line) in result.output_lines().iter().enumerate() {
        println!("{:>3}. {}", i + 1, line);
    }

    Ok(())
}

async fn shutdown_signal() {
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
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
