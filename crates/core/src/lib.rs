//! grafprov core library.
//!
//! This crate provides the foundational components for declarative Grafana
//! provisioning: manifest configuration, the SSO group-mapping compiler,
//! Vault secret access, the Grafana API client, dashboard discovery, and the
//! provisioning orchestrator.

pub mod config;
pub mod dashboards;
pub mod errors;
pub mod grafana;
pub mod provisioner;
pub mod sso;
pub mod vault;

// Re-exports for convenience.
pub use config::AppConfig;
pub use grafana::GrafanaClient;
pub use provisioner::{ProvisionReport, Provisioner};
pub use sso::{compile, CompiledSso};
pub use vault::VaultClient;
