//! SMTP transport built on lettre.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use super::{Notifier, OutboundMessage};
use crate::config::env_parse;
use crate::error::{ConfigError, DispatchError};

/// SMTP configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `Ok(None)` if `SMTP_HOST` is not set (SMTP disabled).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Ok(host) = std::env::var("SMTP_HOST") else {
            return Ok(None);
        };
        let port: u16 = env_parse("SMTP_PORT", 587)?;

        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("SMTP_FROM").unwrap_or_else(|_| username.clone());

        Ok(Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        }))
    }
}

/// Sends messages over SMTP.
pub struct SmtpNotifier {
    name: String,
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(name: impl Into<String>, config: SmtpConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    fn send_failed(&self, reason: String) -> DispatchError {
        DispatchError::SendFailed {
            channel: self.name.clone(),
            reason,
        }
    }

    fn build(&self, message: &OutboundMessage) -> Result<Message, DispatchError> {
        let from: Mailbox = self
            .config
            .from_address
            .parse()
            .map_err(|e| self.send_failed(format!("Invalid from address: {e}")))?;

        let mut builder = Message::builder().from(from).subject(message.subject.as_str());
        for to in &message.to {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|e| DispatchError::InvalidAddress(format!("{to}: {e}")))?;
            builder = builder.to(mailbox);
        }
        for cc in &message.cc {
            let mailbox: Mailbox = cc
                .parse()
                .map_err(|e| DispatchError::InvalidAddress(format!("{cc}: {e}")))?;
            builder = builder.cc(mailbox);
        }

        builder
            .body(message.body.clone())
            .map_err(|e| self.send_failed(format!("Failed to build email: {e}")))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), DispatchError> {
        let email = self.build(message)?;

        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );
        let transport = SmtpTransport::relay(&self.config.host)
            .map_err(|e| self.send_failed(format!("SMTP relay error: {e}")))?
            .port(self.config.port)
            .credentials(creds)
            .build();

        let channel = self.name.clone();
        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| self.send_failed(format!("SMTP task failed: {e}")))?
            .map_err(|e| DispatchError::SendFailed {
                channel,
                reason: format!("SMTP send failed: {e}"),
            })?;

        tracing::info!(
            lead_id = %message.lead_id,
            kind = ?message.kind,
            to = ?message.to,
            "Email sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MessageKind;
    use uuid::Uuid;

    fn notifier() -> SmtpNotifier {
        SmtpNotifier::new(
            "email",
            SmtpConfig {
                host: "smtp.example.org".into(),
                port: 587,
                username: "intake@example.org".into(),
                password: SecretString::from("secret".to_string()),
                from_address: "Intake <intake@example.org>".into(),
            },
        )
    }

    #[test]
    fn builds_message_with_cc() {
        let msg = OutboundMessage::new(
            MessageKind::Escalation,
            Uuid::new_v4(),
            "team@example.org",
            "SLA missed",
            "body",
        )
        .with_cc(vec!["alerts@example.org".into()]);

        let email = notifier().build(&msg).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("To: team@example.org"));
        assert!(raw.contains("Cc: alerts@example.org"));
        assert!(raw.contains("Subject: SLA missed"));
    }

    #[test]
    fn rejects_bad_recipient() {
        let msg = OutboundMessage::new(
            MessageKind::Sequence,
            Uuid::new_v4(),
            "not an address",
            "s",
            "b",
        );
        let err = notifier().build(&msg).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidAddress(_)));
    }

    #[test]
    fn escalation_to_configured_team_builds() {
        use crate::config::AlertConfig;
        use crate::escalation::escalation_message;
        use crate::leads::{Lead, Program};

        let t = chrono::Utc::now();
        let lead = Lead::new("Ana", "ana@example.org", Program::Veterans, 90, t);
        let alerts = AlertConfig {
            escalation_to: vec!["team@example.org".into()],
            ..Default::default()
        };
        alerts.require_email_recipients().unwrap();

        let msg = escalation_message(&lead, t + chrono::Duration::minutes(16), &alerts);
        let raw = String::from_utf8(notifier().build(&msg).unwrap().formatted()).unwrap();
        assert!(raw.contains("To: team@example.org"));
    }
}
