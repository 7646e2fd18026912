//! Vault KV v2 secret source.
//!
//! The provisioner treats Vault as a plain key-value lookup: one pre-issued
//! token, `GET /v1/{mount}/data/{path}`, no auth methods, no lease renewal.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::VaultError;

#[derive(Debug, Deserialize)]
struct KvReadResponse {
    data: KvReadData,
}

#[derive(Debug, Deserialize)]
struct KvReadData {
    data: HashMap<String, serde_json::Value>,
}

/// Minimal Vault KV v2 read client.
#[derive(Clone)]
pub struct VaultClient {
    http: reqwest::Client,
    addr: String,
    token: String,
}

impl VaultClient {
    /// Create a client for the Vault server at `addr` using a pre-issued
    /// token.
    pub fn new(addr: impl Into<String>, token: impl Into<String>) -> Self {
        let addr = addr.into().trim_end_matches('/').to_string();
        info!(addr = %addr, "initializing Vault client");
        Self {
            http: reqwest::Client::new(),
            addr,
            token: token.into(),
        }
    }

    /// Read the secret at `mount`/`path` and return its key-value pairs.
    ///
    /// Non-string values are rendered as compact JSON, since the consuming
    /// configuration fields are all strings.
    pub async fn read_kv(
        &self,
        mount: &str,
        path: &str,
    ) -> Result<HashMap<String, String>, VaultError> {
        let url = format!("{}/v1/{}/data/{}", self.addr, mount, path);
        debug!(%url, "reading Vault secret");

        let resp = self
            .http
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(VaultError::ApiError {
                status: status.as_u16(),
                path: format!("{mount}/{path}"),
                body,
            });
        }

        let parsed: KvReadResponse = resp
            .json()
            .await
            .map_err(|e| VaultError::ParseError(e.to_string()))?;

        let mut out = HashMap::with_capacity(parsed.data.data.len());
        for (key, value) in parsed.data.data {
            let rendered = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            out.insert(key, rendered);
        }

        debug!(path = %format!("{mount}/{path}"), keys = out.len(), "secret read");
        Ok(out)
    }
}

/// Pull a required key out of a secret map, with an error naming both the
/// secret path and the missing key.
pub fn require_key(
    secret: &HashMap<String, String>,
    path: &str,
    key: &str,
) -> Result<String, VaultError> {
    secret
        .get(key)
        .cloned()
        .ok_or_else(|| VaultError::MissingKey {
            path: path.to_string(),
            key: key.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = VaultClient::new("https://vault.example.com/", "tok");
        assert_eq!(client.addr, "https://vault.example.com");
    }

    #[test]
    fn test_require_key() {
        let mut secret = HashMap::new();
        secret.insert("client_id".to_string(), "abc".to_string());

        assert_eq!(
            require_key(&secret, "grafana/oauth", "client_id").unwrap(),
            "abc"
        );
        let err = require_key(&secret, "grafana/oauth", "client_secret").unwrap_err();
        assert!(matches!(
            err,
            VaultError::MissingKey { ref key, .. } if key == "client_secret"
        ));
    }

    #[test]
    fn test_kv_response_shape() {
        let body = r#"{
            "data": {
                "data": { "client_id": "abc", "port": 3000 },
                "metadata": { "version": 4 }
            }
        }"#;
        let parsed: KvReadResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.data.data.get("client_id"),
            Some(&serde_json::Value::String("abc".into()))
        );
        assert_eq!(parsed.data.data.get("port"), Some(&serde_json::json!(3000)));
    }
}
