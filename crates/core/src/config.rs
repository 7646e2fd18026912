//! YAML-based configuration system for grafprov.
//!
//! The manifest describes everything the provisioner applies: the target
//! Grafana instance, the organizations to ensure, SSO group mappings,
//! dashboard sources, and service accounts. All sensitive values (tokens,
//! passwords) are stored as `_env` fields that reference environment variable
//! names, or as key names inside a Vault secret. The actual secrets are
//! resolved at runtime via [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::sso::Group;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level provisioning manifest loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Target Grafana instance settings.
    pub grafana: GrafanaConfig,

    /// Vault secret source (optional; env vars are used when absent).
    #[serde(default)]
    pub vault: Option<VaultConfig>,

    /// Organizations to ensure, in order. Names must be unique.
    #[serde(default)]
    pub organizations: Vec<String>,

    /// SSO / OAuth settings including group-to-role mappings.
    #[serde(default)]
    pub sso: Option<SsoConfig>,

    /// Dashboard sources to discover and import.
    #[serde(default)]
    pub dashboards: Vec<DashboardSource>,

    /// Service accounts to ensure.
    #[serde(default)]
    pub service_accounts: Vec<ServiceAccountSpec>,
}

// ---------------------------------------------------------------------------
// Grafana
// ---------------------------------------------------------------------------

/// Target Grafana instance connection settings.
///
/// Authentication is either a service-account / API token (`token_env`) or
/// basic auth with the server admin user (`admin_user` + `admin_password_env`).
/// Organization and SSO-settings endpoints require the latter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrafanaConfig {
    /// Grafana base URL (e.g. `https://grafana.example.com`).
    pub url: String,

    /// Environment variable holding a service-account token.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Server admin username for basic auth.
    #[serde(default)]
    pub admin_user: Option<String>,

    /// Environment variable holding the server admin password.
    #[serde(default)]
    pub admin_password_env: Option<String>,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,

    /// Resolved admin password.
    #[serde(skip)]
    pub admin_password: Option<String>,
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// Vault KV v2 secret source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Vault server address (e.g. `https://vault.example.com`).
    pub addr: String,

    /// Environment variable holding the Vault token.
    #[serde(default = "default_vault_token_env")]
    pub token_env: String,

    /// KV v2 mount point (default `secret`).
    #[serde(default = "default_vault_mount")]
    pub mount: String,

    /// Path of the secret holding the OAuth client credentials.
    pub oauth_secret_path: String,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_vault_token_env() -> String {
    "VAULT_TOKEN".into()
}
fn default_vault_mount() -> String {
    "secret".into()
}

// ---------------------------------------------------------------------------
// SSO
// ---------------------------------------------------------------------------

/// SSO / OAuth provider settings.
///
/// `groups` feeds the group-mapping compiler; `role_attribute_path` and
/// `org_mapping` are static fallbacks used when no dynamic group data
/// produces the corresponding output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsoConfig {
    /// Provider slug as used by the Grafana SSO settings API
    /// (e.g. `azuread`, `okta`, `generic_oauth`).
    #[serde(default = "default_sso_provider")]
    pub provider: String,

    /// OAuth client ID, inline.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Key inside the Vault OAuth secret holding the client ID.
    #[serde(default = "default_client_id_key")]
    pub client_id_key: String,

    /// Key inside the Vault OAuth secret holding the client secret.
    #[serde(default = "default_client_secret_key")]
    pub client_secret_key: String,

    /// Environment variable holding the client secret (used when no Vault
    /// source is configured).
    #[serde(default)]
    pub client_secret_env: Option<String>,

    /// Authorization endpoint URL.
    #[serde(default)]
    pub auth_url: Option<String>,

    /// Token endpoint URL.
    #[serde(default)]
    pub token_url: Option<String>,

    /// OAuth scopes requested at login.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Identity-provider groups with per-organization role assignments.
    #[serde(default)]
    pub groups: Vec<Group>,

    /// Static `role_attribute_path` used when no group maps to GrafanaAdmin.
    #[serde(default)]
    pub role_attribute_path: Option<String>,

    /// Static `org_mapping` used when the dynamic mapping list is empty.
    #[serde(default)]
    pub org_mapping: Option<String>,

    /// Resolved client secret.
    #[serde(skip)]
    pub client_secret: Option<String>,
}

fn default_sso_provider() -> String {
    "generic_oauth".into()
}
fn default_client_id_key() -> String {
    "client_id".into()
}
fn default_client_secret_key() -> String {
    "client_secret".into()
}

// ---------------------------------------------------------------------------
// Dashboards
// ---------------------------------------------------------------------------

/// One directory of dashboard JSON files to import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSource {
    /// Directory to walk.
    pub dir: PathBuf,

    /// Glob matched against paths relative to `dir` (forward-slash
    /// separated). Default `**/*.json`.
    #[serde(default = "default_dashboard_pattern")]
    pub pattern: String,

    /// Folder title the dashboards are imported into. `None` imports into
    /// the General folder.
    #[serde(default)]
    pub folder: Option<String>,

    /// Organization name the dashboards belong to. `None` uses the default
    /// organization.
    #[serde(default)]
    pub org: Option<String>,
}

fn default_dashboard_pattern() -> String {
    "**/*.json".into()
}

// ---------------------------------------------------------------------------
// Service accounts
// ---------------------------------------------------------------------------

/// A service account to ensure within an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountSpec {
    /// Service account name.
    pub name: String,

    /// Basic role granted within the organization: `Viewer`, `Editor`, or
    /// `Admin`.
    #[serde(default = "default_sa_role")]
    pub role: String,

    /// Organization name. `None` uses the default organization.
    #[serde(default)]
    pub org: Option<String>,
}

fn default_sa_role() -> String {
    "Viewer".into()
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a YAML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading manifest");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("manifest parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables and populate the
    /// corresponding resolved fields.
    ///
    /// Fields that reference a missing variable will log a warning but will
    /// **not** fail -- callers can check the `Option` fields and decide what
    /// is required for their execution mode.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in manifest");

        if let Some(ref env_name) = self.grafana.token_env {
            self.grafana.token = resolve_optional_env(env_name, "grafana.token_env");
        }
        if let Some(ref env_name) = self.grafana.admin_password_env {
            self.grafana.admin_password =
                resolve_optional_env(env_name, "grafana.admin_password_env");
        }

        if let Some(ref mut vault) = self.vault {
            vault.token = resolve_optional_env(&vault.token_env, "vault.token_env");
        }

        if let Some(ref mut sso) = self.sso {
            if let Some(ref env_name) = sso.client_secret_env {
                sso.client_secret = resolve_optional_env(env_name, "sso.client_secret_env");
            }
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grafana.url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "grafana.url".into(),
                detail: "Grafana URL must not be empty".into(),
            });
        }
        let has_token = self.grafana.token_env.is_some();
        let has_basic =
            self.grafana.admin_user.is_some() && self.grafana.admin_password_env.is_some();
        if !has_token && !has_basic {
            return Err(ConfigError::InvalidValue {
                field: "grafana".into(),
                detail: "either token_env or admin_user + admin_password_env must be set".into(),
            });
        }

        for (i, name) in self.organizations.iter().enumerate() {
            if name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("organizations[{i}]"),
                    detail: "organization name must not be empty".into(),
                });
            }
            if self.organizations[..i].contains(name) {
                return Err(ConfigError::InvalidValue {
                    field: format!("organizations[{i}]"),
                    detail: format!("duplicate organization name '{name}'"),
                });
            }
        }

        if let Some(ref sso) = self.sso {
            if sso.provider.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "sso.provider".into(),
                    detail: "provider slug must not be empty".into(),
                });
            }
            for group in &sso.groups {
                if group.name.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "sso.groups".into(),
                        detail: "group name must not be empty".into(),
                    });
                }
                // Org existence is checked at compile time against the live
                // org table; here we only flag names missing from the
                // manifest, since the org may pre-exist in Grafana.
                for mapping in &group.org_mappings {
                    if let Some(org) = mapping.org.name() {
                        if !self.organizations.iter().any(|o| o == org) {
                            warn!(
                                group = %group.name,
                                org,
                                "group maps to an organization not listed in the manifest"
                            );
                        }
                    }
                }
            }
        }

        for (i, sa) in self.service_accounts.iter().enumerate() {
            if sa.name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("service_accounts[{i}].name"),
                    detail: "service account name must not be empty".into(),
                });
            }
            if !matches!(sa.role.as_str(), "Viewer" | "Editor" | "Admin") {
                return Err(ConfigError::InvalidValue {
                    field: format!("service_accounts[{i}].role"),
                    detail: format!("'{}' is not a valid basic role", sa.role),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_yaml() -> &'static str {
        r#"
grafana:
  url: https://grafana.example.com
  admin_user: admin
  admin_password_env: GRAFANA_ADMIN_PASSWORD

vault:
  addr: https://vault.example.com
  token_env: VAULT_TOKEN
  mount: secret
  oauth_secret_path: grafana/oauth

organizations:
  - teamA
  - teamB

sso:
  provider: azuread
  client_id: abc-123
  auth_url: https://login.example.com/authorize
  token_url: https://login.example.com/token
  scopes: [openid, email, profile]
  groups:
    - name: platform
      org_mappings:
        - org: "*"
          role: GrafanaAdmin
    - name: sre
      org_mappings:
        - org: teamA
          role: Editor
        - org: teamB
          role: Viewer
  org_mapping: "*:1:Viewer"

dashboards:
  - dir: dashboards/teamA
    pattern: "**/*.json"
    folder: Team A
    org: teamA

service_accounts:
  - name: ci-publisher
    role: Editor
    org: teamA
"#
    }

    #[test]
    fn test_parse_full_manifest() {
        let config: AppConfig = serde_yaml::from_str(sample_yaml()).expect("failed to parse yaml");
        assert_eq!(config.grafana.url, "https://grafana.example.com");
        assert_eq!(config.organizations, vec!["teamA", "teamB"]);

        let sso = config.sso.as_ref().unwrap();
        assert_eq!(sso.provider, "azuread");
        assert_eq!(sso.groups.len(), 2);
        assert_eq!(sso.groups[0].name, "platform");
        assert_eq!(sso.org_mapping.as_deref(), Some("*:1:Viewer"));

        assert_eq!(config.dashboards.len(), 1);
        assert_eq!(config.dashboards[0].folder.as_deref(), Some("Team A"));
        assert_eq!(config.service_accounts[0].role, "Editor");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grafprov.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_yaml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.vault.unwrap().mount, "secret");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/grafprov.yaml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let mut config: AppConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        config.grafana.url = String::new();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "grafana.url"
        ));
    }

    #[test]
    fn test_validate_rejects_missing_auth() {
        let mut config: AppConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        config.grafana.admin_user = None;
        config.grafana.admin_password_env = None;
        config.grafana.token_env = None;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "grafana"
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_org() {
        let mut config: AppConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        config.organizations.push("teamA".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_sa_role() {
        let mut config: AppConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        config.service_accounts[0].role = "SuperUser".into();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. })
                if field == "service_accounts[0].role"
        ));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("TEST_GRAFANA_ADMIN_PW", "s3cret");

        let yaml = r#"
grafana:
  url: https://grafana.example.com
  admin_user: admin
  admin_password_env: TEST_GRAFANA_ADMIN_PW
"#;
        let mut config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        config.resolve_env_vars().unwrap();
        assert_eq!(config.grafana.admin_password.as_deref(), Some("s3cret"));

        std::env::remove_var("TEST_GRAFANA_ADMIN_PW");
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
grafana:
  url: https://grafana.example.com
  token_env: GRAFANA_TOKEN
sso:
  provider: azuread
dashboards:
  - dir: dashboards
"#;
        let config: AppConfig = serde_yaml::from_str(minimal).unwrap();
        assert!(config.organizations.is_empty());
        assert_eq!(config.sso.as_ref().unwrap().client_id_key, "client_id");
        assert_eq!(
            config.sso.as_ref().unwrap().client_secret_key,
            "client_secret"
        );
        assert_eq!(config.dashboards[0].pattern, "**/*.json");
        assert!(config.dashboards[0].folder.is_none());
        assert!(config.service_accounts.is_empty());
    }
}
