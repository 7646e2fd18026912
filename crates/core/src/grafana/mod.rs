//! Grafana HTTP API access.

pub mod client;

pub use client::{
    Folder, GrafanaAuth, GrafanaClient, Org, ServiceAccount, SsoSettings,
};
