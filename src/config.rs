//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Where staff-facing alerts go and what they link to.
#[derive(Debug, Clone, Default)]
pub struct AlertConfig {
    /// Escalation recipients.
    pub escalation_to: Vec<String>,
    /// Escalation cc recipients.
    pub escalation_cc: Vec<String>,
    /// Recipients of side-action staff tasks. Falls back to `escalation_to`.
    pub staff_to: Vec<String>,
    /// Base URL of the lead dashboard, linked from alerts.
    pub dashboard_url: Option<String>,
}

impl AlertConfig {
    /// Alerts sent by email need somewhere to go.
    pub fn require_email_recipients(&self) -> Result<(), ConfigError> {
        if self.escalation_to.is_empty() {
            return Err(ConfigError::MissingEnvVar("LEAD_ORCH_ALERT_TO".into()));
        }
        Ok(())
    }

    pub fn staff_recipients(&self) -> &[String] {
        if self.staff_to.is_empty() {
            &self.escalation_to
        } else {
            &self.staff_to
        }
    }
}

/// Tunables for orchestration passes.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Overall budget for one pass. Checked between leads.
    pub pass_timeout: Duration,
    /// Budget for a single send.
    pub dispatch_timeout: Duration,
    /// How long a dispatch lease is honored before another worker may take it.
    pub claim_ttl: Duration,
    /// Only leads created within this window are stepped through sequences.
    pub sequence_window: Duration,
    pub alerts: AlertConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pass_timeout: Duration::from_secs(55),
            dispatch_timeout: Duration::from_secs(20),
            claim_ttl: Duration::from_secs(300),
            sequence_window: Duration::from_secs(30 * 24 * 3600), // 30 days
            alerts: AlertConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            pass_timeout: Duration::from_secs(env_parse(
                "LEAD_ORCH_PASS_TIMEOUT_SECS",
                defaults.pass_timeout.as_secs(),
            )?),
            dispatch_timeout: Duration::from_secs(env_parse(
                "LEAD_ORCH_DISPATCH_TIMEOUT_SECS",
                defaults.dispatch_timeout.as_secs(),
            )?),
            claim_ttl: Duration::from_secs(env_parse(
                "LEAD_ORCH_CLAIM_TTL_SECS",
                defaults.claim_ttl.as_secs(),
            )?),
            sequence_window: Duration::from_secs(
                env_parse::<u64>("LEAD_ORCH_SEQUENCE_WINDOW_DAYS", 30)? * 24 * 3600,
            ),
            alerts: AlertConfig {
                escalation_to: env_list("LEAD_ORCH_ALERT_TO"),
                escalation_cc: env_list("LEAD_ORCH_ALERT_CC"),
                staff_to: env_list("LEAD_ORCH_STAFF_TO"),
                dashboard_url: std::env::var("LEAD_ORCH_DASHBOARD_URL").ok(),
            },
        })
    }
}

/// HTTP server and process-level settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Shared secret for the periodic trigger routes. `None` denies them all.
    pub cron_secret: Option<SecretString>,
    /// Shared secret for inbound webhooks. `None` denies them all.
    pub webhook_secret: Option<SecretString>,
    pub cron_header: String,
    pub webhook_header: String,
    /// Optional JSON sequence catalog replacing the built-in one.
    pub catalog_path: Option<PathBuf>,
    /// Directory for daily-rolling log files.
    pub log_dir: Option<PathBuf>,
    /// Alerts are posted here when set.
    pub alert_webhook_url: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: env_parse("LEAD_ORCH_PORT", 8080)?,
            db_path: std::env::var("LEAD_ORCH_DB_PATH")
                .unwrap_or_else(|_| "./data/leads.db".to_string())
                .into(),
            cron_secret: env_secret("LEAD_ORCH_CRON_SECRET"),
            webhook_secret: env_secret("LEAD_ORCH_WEBHOOK_SECRET"),
            cron_header: std::env::var("LEAD_ORCH_CRON_HEADER")
                .unwrap_or_else(|_| "x-cron-secret".to_string()),
            webhook_header: std::env::var("LEAD_ORCH_WEBHOOK_HEADER")
                .unwrap_or_else(|_| "x-webhook-secret".to_string()),
            catalog_path: std::env::var("LEAD_ORCH_CATALOG_PATH").ok().map(PathBuf::from),
            log_dir: std::env::var("LEAD_ORCH_LOG_DIR").ok().map(PathBuf::from),
            alert_webhook_url: std::env::var("LEAD_ORCH_ALERT_WEBHOOK_URL").ok(),
        })
    }
}

/// Parse an env var, falling back to `default` when unset.
/// A set but unparsable value is an error rather than a silent default.
pub(crate) fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_or_default(key, std::env::var(key).ok().as_deref(), default)
}

fn parse_or_default<T>(key: &str, raw: Option<&str>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        _ => Ok(default),
    }
}

/// Comma-separated list, blanks dropped.
fn env_list(key: &str) -> Vec<String> {
    parse_list(&std::env::var(key).unwrap_or_default())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_secret(key: &str) -> Option<SecretString> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .map(SecretString::from)
}
