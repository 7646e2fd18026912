//! Error types for the grafprov core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`ProvisionError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Grafana(#[from] GrafanaError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// YAML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing {
        var: String,
        field: String,
    },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// SSO mapping errors
// ---------------------------------------------------------------------------

/// Errors from the SSO group-mapping compiler.
///
/// The compiler has no partial-success mode: on any of these errors no
/// output is produced, so callers can never apply a half-computed mapping.
#[derive(Debug, Error)]
pub enum MappingError {
    /// A non-wildcard org reference has no entry in the organization table.
    ///
    /// Fatal rather than skipped: a silently dropped role assignment would
    /// leave users without access that the manifest promised them.
    #[error("group '{group}' maps role '{role}' to unknown organization '{org}'")]
    UnknownOrganization {
        group: String,
        org: String,
        role: String,
    },

    /// A group name contains a single quote, which would break the quoting
    /// of the generated role-attribute expression.
    #[error("group name {0:?} contains a single quote and cannot appear in a role expression")]
    InvalidGroupName(String),
}

// ---------------------------------------------------------------------------
// Vault errors
// ---------------------------------------------------------------------------

/// Errors from the Vault KV secret source.
#[derive(Debug, Error)]
pub enum VaultError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("Vault HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Vault returned a non-success status code.
    #[error("Vault API error (HTTP {status}) reading '{path}': {body}")]
    ApiError {
        status: u16,
        path: String,
        body: String,
    },

    /// A key the configuration references is missing from the secret.
    #[error("secret '{path}' has no key '{key}'")]
    MissingKey {
        path: String,
        key: String,
    },

    /// JSON deserialization failure.
    #[error("Vault response parse error: {0}")]
    ParseError(String),
}

// ---------------------------------------------------------------------------
// Grafana API errors
// ---------------------------------------------------------------------------

/// Errors from Grafana HTTP API interactions.
#[derive(Debug, Error)]
pub enum GrafanaError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("Grafana HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("Grafana API error (HTTP {status}): {body}")]
    ApiError {
        status: u16,
        body: String,
    },

    /// Authentication credentials are missing or invalid.
    #[error("Grafana authentication failed: {0}")]
    AuthenticationFailed(String),

    /// JSON deserialization failure.
    #[error("Grafana response parse error: {0}")]
    ParseError(String),
}

// ---------------------------------------------------------------------------
// Dashboard discovery errors
// ---------------------------------------------------------------------------

/// Errors from dashboard file discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The configured dashboard directory does not exist.
    #[error("dashboard directory not found: {0}")]
    DirNotFound(String),

    /// A dashboard file is not valid JSON or lacks required fields.
    #[error("invalid dashboard file '{path}': {detail}")]
    InvalidDashboard {
        path: String,
        detail: String,
    },

    /// Generic I/O error while walking a directory.
    #[error("discovery I/O error at '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
