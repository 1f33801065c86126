//! Error types for the lead orchestrator.

use std::time::Duration;

use uuid::Uuid;

use crate::leads::Program;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Outbound notification errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to send on channel {channel}: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Invalid recipient address: {0}")]
    InvalidAddress(String),

    #[error("Rate limited on channel {channel}")]
    RateLimited { channel: String },

    #[error("Send on channel {channel} timed out after {timeout:?}")]
    Timeout { channel: String, timeout: Duration },
}

impl DispatchError {
    /// Whether the channel asked us to stop sending for now.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DispatchError::RateLimited { .. })
    }
}

/// Errors that reject an inbound request as a whole.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Template rendering errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("Unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),

    #[error("Lead has no value for {{{0}}}")]
    MissingField(String),
}

/// Failure while processing a single lead. Never aborts a pass.
#[derive(Debug, thiserror::Error)]
pub enum LeadError {
    #[error("Render failed for lead {lead_id}: {source}")]
    Render {
        lead_id: Uuid,
        #[source]
        source: RenderError,
    },

    #[error("Dispatch failed for lead {lead_id}: {source}")]
    Dispatch {
        lead_id: Uuid,
        #[source]
        source: DispatchError,
    },

    #[error("Store failed for lead {lead_id}: {source}")]
    Database {
        lead_id: Uuid,
        #[source]
        source: DatabaseError,
    },

    #[error("No sequence configured for program {program}")]
    MissingCatalog { program: Program },

    #[error("Lead {lead_id} was claimed by another worker")]
    ClaimLost { lead_id: Uuid },
}

impl LeadError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LeadError::Dispatch { source, .. } if source.is_rate_limited())
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
