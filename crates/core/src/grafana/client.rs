//! Grafana REST API client.
//!
//! Covers the small slice of the HTTP API the provisioner needs:
//! organizations, SSO settings, folders, dashboard import, and service
//! accounts. Organization-scoped endpoints (folders, dashboards, service
//! accounts) are addressed with the `X-Grafana-Org-Id` header rather than by
//! switching the authenticated user's active org.

use base64::prelude::{Engine as _, BASE64_STANDARD};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::errors::GrafanaError;

const ORG_ID_HEADER: &str = "X-Grafana-Org-Id";

// ---------------------------------------------------------------------------
// Response / request models
// ---------------------------------------------------------------------------

/// An organization as returned by `/api/orgs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Org {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct CreateOrgResponse {
    #[serde(rename = "orgId")]
    org_id: i64,
}

/// A dashboard folder as returned by `/api/folders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub uid: String,
    pub title: String,
}

/// A service account as returned by `/api/serviceaccounts/search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    pub id: i64,
    pub name: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceAccountSearch {
    service_accounts: Vec<ServiceAccount>,
}

#[derive(Debug, Deserialize)]
struct DashboardImportResponse {
    uid: String,
    status: String,
}

/// OAuth settings body for `PUT /api/v1/sso-settings/{provider}`.
///
/// Only the fields this provisioner manages are modelled; `None` fields are
/// omitted from the payload so Grafana keeps its configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SsoSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_attribute_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_mapping: Option<String>,

    /// Must be set for a `role_attribute_path` electing GrafanaAdmin to take
    /// effect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_assign_grafana_admin: Option<bool>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// How the client authenticates against Grafana.
#[derive(Debug, Clone)]
pub enum GrafanaAuth {
    /// Service-account / API token (`Authorization: Bearer ...`).
    Token(String),
    /// Server admin basic auth; required for org and SSO-settings endpoints.
    Basic { username: String, password: String },
}

impl GrafanaAuth {
    fn header_value(&self) -> Result<HeaderValue, GrafanaError> {
        let raw = match self {
            Self::Token(token) => format!("Bearer {token}"),
            Self::Basic { username, password } => {
                let encoded = BASE64_STANDARD.encode(format!("{username}:{password}"));
                format!("Basic {encoded}")
            }
        };
        let mut value = HeaderValue::from_str(&raw).map_err(|_| {
            GrafanaError::AuthenticationFailed("credentials contain invalid header bytes".into())
        })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// Asynchronous Grafana REST API client.
#[derive(Clone)]
pub struct GrafanaClient {
    http: reqwest::Client,
    base_url: String,
}

impl GrafanaClient {
    pub fn new(base_url: impl Into<String>, auth: &GrafanaAuth) -> Result<Self, GrafanaError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth.header_value()?);
        headers.insert(USER_AGENT, HeaderValue::from_static("grafprov/0.1"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        info!(base_url = %base_url, "created GrafanaClient");
        Ok(Self { http, base_url })
    }

    // -- Organizations --------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn list_orgs(&self) -> Result<Vec<Org>, GrafanaError> {
        let url = format!("{}/api/orgs", self.base_url);
        let resp = self.http.get(&url).send().await?;
        self.check_response(&resp)?;
        let orgs: Vec<Org> = resp.json().await?;
        debug!(count = orgs.len(), "fetched organizations");
        Ok(orgs)
    }

    /// Look up an organization by name. Returns `None` on 404.
    #[instrument(skip(self))]
    pub async fn lookup_org(&self, name: &str) -> Result<Option<Org>, GrafanaError> {
        let url = format!("{}/api/orgs/name/{}", self.base_url, name);
        let resp = self.http.get(&url).send().await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        self.check_response(&resp)?;
        let org: Org = resp.json().await?;
        Ok(Some(org))
    }

    /// Create an organization and return its assigned numeric ID.
    #[instrument(skip(self))]
    pub async fn create_org(&self, name: &str) -> Result<i64, GrafanaError> {
        let url = format!("{}/api/orgs", self.base_url);
        let payload = serde_json::json!({ "name": name });
        let resp = self.http.post(&url).json(&payload).send().await?;
        self.check_response(&resp)?;
        let created: CreateOrgResponse = resp.json().await?;
        info!(name, org_id = created.org_id, "created organization");
        Ok(created.org_id)
    }

    // -- SSO settings ---------------------------------------------------------

    /// Replace the SSO settings for `provider` (e.g. `azuread`).
    #[instrument(skip(self, settings))]
    pub async fn put_sso_settings(
        &self,
        provider: &str,
        settings: &SsoSettings,
    ) -> Result<(), GrafanaError> {
        let url = format!("{}/api/v1/sso-settings/{}", self.base_url, provider);
        let payload = serde_json::json!({ "settings": settings });
        let resp = self.http.put(&url).json(&payload).send().await?;
        self.check_response(&resp)?;
        info!(provider, "applied SSO settings");
        Ok(())
    }

    // -- Folders --------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn list_folders(&self, org_id: i64) -> Result<Vec<Folder>, GrafanaError> {
        let url = format!("{}/api/folders", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header(ORG_ID_HEADER, org_id)
            .send()
            .await?;
        self.check_response(&resp)?;
        let folders: Vec<Folder> = resp.json().await?;
        debug!(org_id, count = folders.len(), "fetched folders");
        Ok(folders)
    }

    #[instrument(skip(self))]
    pub async fn create_folder(&self, org_id: i64, title: &str) -> Result<Folder, GrafanaError> {
        let url = format!("{}/api/folders", self.base_url);
        let payload = serde_json::json!({ "title": title });
        let resp = self
            .http
            .post(&url)
            .header(ORG_ID_HEADER, org_id)
            .json(&payload)
            .send()
            .await?;
        self.check_response(&resp)?;
        let folder: Folder = resp.json().await?;
        info!(org_id, title, uid = %folder.uid, "created folder");
        Ok(folder)
    }

    // -- Dashboards -----------------------------------------------------------

    /// Import (create or overwrite) a dashboard from its JSON model.
    ///
    /// `overwrite: true` makes the call idempotent: re-importing an unchanged
    /// dashboard is a no-op from the user's perspective.
    #[instrument(skip(self, dashboard))]
    pub async fn import_dashboard(
        &self,
        org_id: i64,
        dashboard: &serde_json::Value,
        folder_uid: Option<&str>,
    ) -> Result<String, GrafanaError> {
        let url = format!("{}/api/dashboards/db", self.base_url);
        let mut payload = serde_json::json!({
            "dashboard": dashboard,
            "overwrite": true,
        });
        if let Some(uid) = folder_uid {
            payload["folderUid"] = serde_json::Value::String(uid.to_string());
        }
        let resp = self
            .http
            .post(&url)
            .header(ORG_ID_HEADER, org_id)
            .json(&payload)
            .send()
            .await?;
        self.check_response(&resp)?;
        let imported: DashboardImportResponse = resp.json().await?;
        debug!(org_id, uid = %imported.uid, status = %imported.status, "imported dashboard");
        Ok(imported.uid)
    }

    // -- Service accounts -----------------------------------------------------

    #[instrument(skip(self))]
    pub async fn list_service_accounts(
        &self,
        org_id: i64,
    ) -> Result<Vec<ServiceAccount>, GrafanaError> {
        let url = format!("{}/api/serviceaccounts/search", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header(ORG_ID_HEADER, org_id)
            .send()
            .await?;
        self.check_response(&resp)?;
        let search: ServiceAccountSearch = resp.json().await?;
        debug!(
            org_id,
            count = search.service_accounts.len(),
            "fetched service accounts"
        );
        Ok(search.service_accounts)
    }

    #[instrument(skip(self))]
    pub async fn create_service_account(
        &self,
        org_id: i64,
        name: &str,
        role: &str,
    ) -> Result<ServiceAccount, GrafanaError> {
        let url = format!("{}/api/serviceaccounts", self.base_url);
        let payload = serde_json::json!({ "name": name, "role": role });
        let resp = self
            .http
            .post(&url)
            .header(ORG_ID_HEADER, org_id)
            .json(&payload)
            .send()
            .await?;
        self.check_response(&resp)?;
        let account: ServiceAccount = resp.json().await?;
        info!(org_id, name, role, "created service account");
        Ok(account)
    }

    fn check_response(&self, resp: &reqwest::Response) -> Result<(), GrafanaError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(GrafanaError::AuthenticationFailed(format!(
                "HTTP {}",
                status
            )));
        }
        Err(GrafanaError::ApiError {
            status: status.as_u16(),
            body: format!("HTTP {}", status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let auth = GrafanaAuth::Token("glsa_test".into());
        let client = GrafanaClient::new("https://grafana.example.com/", &auth).unwrap();
        assert_eq!(client.base_url, "https://grafana.example.com");
    }

    #[test]
    fn test_basic_auth_header_encoding() {
        let auth = GrafanaAuth::Basic {
            username: "admin".into(),
            password: "s3cret".into(),
        };
        let value = auth.header_value().unwrap();
        // "admin:s3cret" base64-encoded.
        assert_eq!(value.to_str().unwrap(), "Basic YWRtaW46czNjcmV0");
    }

    #[test]
    fn test_sso_settings_serialization_skips_unset_fields() {
        let settings = SsoSettings {
            enabled: Some(true),
            role_attribute_path: Some("'Viewer'".into()),
            org_mapping: Some("sre:*:Editor".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["enabled"], serde_json::json!(true));
        assert_eq!(json["roleAttributePath"], serde_json::json!("'Viewer'"));
        assert_eq!(json["orgMapping"], serde_json::json!("sre:*:Editor"));
        assert!(json.get("clientSecret").is_none());
        assert!(json.get("allowAssignGrafanaAdmin").is_none());
    }

    #[test]
    fn test_service_account_search_shape() {
        let body = r#"{
            "totalCount": 1,
            "serviceAccounts": [
                { "id": 7, "name": "ci-publisher", "role": "Editor" }
            ]
        }"#;
        let search: ServiceAccountSearch = serde_json::from_str(body).unwrap();
        assert_eq!(search.service_accounts.len(), 1);
        assert_eq!(search.service_accounts[0].name, "ci-publisher");
    }
}
