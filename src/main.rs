use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use message_intake::config::{DatabaseConfig, ServiceConfig};
use message_intake::llm::create_provider;
use message_intake::pipeline::analysis::AnalysisEngine;
use message_intake::pipeline::dispatcher::RoutingDispatcher;
use message_intake::pipeline::ids::ClockCounterIds;
use message_intake::pipeline::processor::WebhookProcessor;
use message_intake::pipeline::rules::{AgentRegistry, EscalationRules};
use message_intake::server::webhook_routes;
use message_intake::store::{Database, LibSqlBackend};

/// Rolling log file name inside the log directory.
const LOG_FILE: &str = "webhook_system.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export OPENAI_API_KEY=sk-...");
        std::process::exit(1);
    });

    // Initialize tracing: stderr plus a daily log file
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("creating log directory {}", config.log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE);
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    eprintln!("📨 Message Intake v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook", config.port);
    eprintln!("   Health: http://0.0.0.0:{}/health", config.port);
    eprintln!("   Stats: http://0.0.0.0:{}/stats\n", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    match &config.database {
        DatabaseConfig::Local { path } => info!(path = %path.display(), "Opening local database"),
        DatabaseConfig::Remote { url, .. } => info!(url = %url, "Connecting to remote database"),
    }
    let store: Arc<dyn Database> = Arc::new(
        LibSqlBackend::open(&config.database)
            .await
            .context("opening database")?,
    );

    // ── Pipeline ─────────────────────────────────────────────────────────
    let llm = create_provider(&config.llm).context("creating LLM provider")?;
    let analyzer = AnalysisEngine::new(llm, Arc::clone(&store), EscalationRules::default_rules());
    let agents = AgentRegistry::default_agents();
    info!(agents = agents.len(), "Agent registry loaded");
    let processor = Arc::new(WebhookProcessor::new(
        Arc::clone(&store),
        analyzer,
        RoutingDispatcher::new(agents),
        Arc::new(ClockCounterIds::new()),
    ));

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = webhook_routes(processor, store);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "Webhook server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, draining connections...");
}
