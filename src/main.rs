use std::sync::Arc;

use anyhow::Context;

use lead_orchestrator::api::{self, ApiAuth};
use lead_orchestrator::clock::SystemClock;
use lead_orchestrator::config::{OrchestratorConfig, ServerConfig};
use lead_orchestrator::notify::{LogNotifier, Notifier, SmtpConfig, SmtpNotifier, WebhookNotifier};
use lead_orchestrator::orchestrator::{Orchestrator, OrchestratorDeps};
use lead_orchestrator::sequences::SequenceCatalog;
use lead_orchestrator::store::LibSqlLeadStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let server_config = ServerConfig::from_env().context("invalid server configuration")?;

    // Initialize tracing. With a log dir, write daily files instead of stderr.
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let _log_guard = match &server_config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "lead-orchestrator.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    };

    let orchestrator_config =
        OrchestratorConfig::from_env().context("invalid orchestrator configuration")?;

    let catalog = match &server_config.catalog_path {
        Some(path) => SequenceCatalog::load(path)
            .with_context(|| format!("failed to load sequence catalog {}", path.display()))?,
        None => SequenceCatalog::builtin(),
    };

    let store = LibSqlLeadStore::new_local(&server_config.db_path)
        .await
        .with_context(|| format!("failed to open database at {}", server_config.db_path.display()))?;

    let smtp = SmtpConfig::from_env().context("invalid SMTP configuration")?;
    let outreach: Arc<dyn Notifier> = match &smtp {
        Some(cfg) => Arc::new(SmtpNotifier::new("email", cfg.clone())),
        None => {
            tracing::warn!("SMTP_HOST not set, lead messages will only be logged");
            Arc::new(LogNotifier::new("email-log"))
        }
    };
    let alerts: Arc<dyn Notifier> = match (&server_config.alert_webhook_url, &smtp) {
        (Some(url), _) => Arc::new(WebhookNotifier::new(
            "alert-webhook",
            url.clone(),
            orchestrator_config.dispatch_timeout,
        )),
        (None, Some(cfg)) => {
            orchestrator_config
                .alerts
                .require_email_recipients()
                .context("SLA alerts are sent by email")?;
            Arc::new(SmtpNotifier::new("alert-email", cfg.clone()))
        }
        (None, None) => Arc::new(LogNotifier::new("alert-log")),
    };

    if server_config.cron_secret.is_none() {
        tracing::warn!("LEAD_ORCH_CRON_SECRET not set, trigger routes will reject every request");
    }
    if server_config.webhook_secret.is_none() {
        tracing::warn!("LEAD_ORCH_WEBHOOK_SECRET not set, webhook routes will reject every request");
    }

    eprintln!("📋 Lead Orchestrator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", server_config.db_path.display());
    eprintln!("   Outreach: {}", outreach.name());
    eprintln!("   Alerts: {}", alerts.name());
    eprintln!("   API: http://0.0.0.0:{}/api", server_config.port);

    let deps = OrchestratorDeps {
        store: Arc::new(store),
        outreach,
        alerts,
        clock: Arc::new(SystemClock),
    };
    let orchestrator = Arc::new(Orchestrator::new(deps, catalog, orchestrator_config));
    let app = api::router(orchestrator, ApiAuth::from_config(&server_config));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", server_config.port))
        .await
        .with_context(|| format!("failed to bind port {}", server_config.port))?;
    tracing::info!(port = server_config.port, "HTTP server started");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
