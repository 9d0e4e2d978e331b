use std::sync::Arc;

use tower_http::cors::CorsLayer;

use mailspool::config::{DispatchConfig, HttpConfig, SmtpConfig, StoreConfig, TemplateConfig};
use mailspool::dispatch::Dispatcher;
use mailspool::mailer::{MailTransport, SmtpMailer};
use mailspool::outbox::{LibSqlOutbox, OutboxStore};
use mailspool::queue::DispatchQueue;
use mailspool::routes::{AppState, mail_routes};
use mailspool::templates::TemplateCatalog;
use mailspool::validate::RequestValidator;

/// Upper bound on the startup recovery scan.
const RECOVERY_SCAN_LIMIT: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing. The appender guard must outlive the server so
    // buffered log lines are flushed at shutdown.
    let _log_guard = init_logging();

    let smtp_config = SmtpConfig::from_env()?;
    let template_config = TemplateConfig::from_env()?;
    let store_config = StoreConfig::from_env();
    let dispatch_config = DispatchConfig::from_env();
    let http_config = HttpConfig::from_env();

    eprintln!("📬 Mailspool v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   SMTP relay: {}:{}", smtp_config.host, smtp_config.port);
    eprintln!("   Templates: {}", template_config.root.display());
    eprintln!("   Database: {}", store_config.db_path.display());
    eprintln!(
        "   Dispatch: {} workers, {} attempts max",
        dispatch_config.workers, dispatch_config.max_attempts
    );
    eprintln!("   API: http://0.0.0.0:{}/mail\n", http_config.port);

    // ── Pipeline ─────────────────────────────────────────────────────────
    let store: Arc<dyn OutboxStore> = Arc::new(LibSqlOutbox::open(&store_config).await?);
    let catalog = Arc::new(TemplateCatalog::new(&template_config));
    let validator = Arc::new(RequestValidator::new(Arc::clone(&catalog)));
    let transport: Arc<dyn MailTransport> = Arc::new(SmtpMailer::new(smtp_config));

    let queue = DispatchQueue::new();
    let dispatcher = Dispatcher::new(
        Arc::clone(&queue),
        Arc::clone(&store),
        transport,
        dispatch_config,
    );
    let worker_handles = dispatcher.spawn_workers();

    // ── Startup recovery: re-enqueue entries whose tasks were lost ───────
    dispatcher.recover(RECOVERY_SCAN_LIMIT).await?;

    // ── HTTP server ──────────────────────────────────────────────────────
    let state = AppState {
        validator,
        catalog,
        store,
        queue: Arc::clone(&queue),
    };
    let app = mail_routes(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_config.port)).await?;
    tracing::info!(port = http_config.port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── Drain ────────────────────────────────────────────────────────────
    tracing::info!("Shutting down, draining dispatch workers");
    dispatcher.shutdown();
    futures::future::join_all(worker_handles).await;

    if dispatcher.dead_letter_count() > 0 {
        tracing::warn!(
            count = dispatcher.dead_letter_count(),
            "Dead-lettered entries remain unprocessed in the outbox"
        );
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Initialize the tracing subscriber.
///
/// With `MAILSPOOL_LOG_DIR` set, log lines also go to a daily-rolling file
/// through a non-blocking writer; the returned guard flushes it on drop.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    match std::env::var("MAILSPOOL_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mailspool.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Received shutdown signal");
}
