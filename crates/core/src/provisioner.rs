//! Run-to-completion provisioning orchestrator.
//!
//! [`Provisioner::apply`] walks the manifest in phases:
//!
//! 1. Ensure all configured organizations exist, building the name -> ID
//!    table the SSO compiler resolves against.
//! 2. Fetch OAuth client credentials (Vault or env), compile the SSO group
//!    mapping, and apply the SSO settings.
//! 3. Discover dashboard files and import them into their folders.
//! 4. Ensure service accounts.
//!
//! There is no plan/diff step and no state file: every call re-applies the
//! manifest through idempotent Grafana API operations.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, SsoConfig};
use crate::dashboards;
use crate::errors::{ConfigError, ProvisionError};
use crate::grafana::{GrafanaClient, SsoSettings};
use crate::sso::{self, OrgIdTable};
use crate::vault::{self, VaultClient};

/// Grafana's built-in default organization.
const DEFAULT_ORG_ID: i64 = 1;

/// Statistics from a single apply run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub orgs_existing: usize,
    pub orgs_created: usize,
    pub sso_applied: bool,
    pub folders_created: usize,
    pub dashboards_imported: usize,
    pub service_accounts_existing: usize,
    pub service_accounts_created: usize,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// The provisioning engine.
pub struct Provisioner {
    config: AppConfig,
    grafana: GrafanaClient,
    vault: Option<VaultClient>,
}

impl Provisioner {
    /// Create a provisioner from a resolved manifest and its clients.
    pub fn new(config: AppConfig, grafana: GrafanaClient, vault: Option<VaultClient>) -> Self {
        info!("initializing provisioner");
        Self {
            config,
            grafana,
            vault,
        }
    }

    /// Apply the whole manifest. Fails on the first error; everything
    /// already applied stays applied (all operations are idempotent, so a
    /// re-run converges).
    pub async fn apply(&self) -> Result<ProvisionReport, ProvisionError> {
        let mut report = ProvisionReport {
            started_at: Utc::now().to_rfc3339(),
            ..Default::default()
        };

        let org_ids = self.ensure_orgs(&mut report).await?;
        info!(orgs = org_ids.len(), "organization table ready");

        if let Some(sso_config) = self.config.sso.clone() {
            self.apply_sso(&sso_config, &org_ids).await?;
            report.sso_applied = true;
        } else {
            debug!("no sso section in manifest, skipping");
        }

        self.import_dashboards(&org_ids, &mut report).await?;
        self.ensure_service_accounts(&org_ids, &mut report).await?;

        report.completed_at = Some(Utc::now().to_rfc3339());
        info!(
            orgs_created = report.orgs_created,
            dashboards_imported = report.dashboards_imported,
            service_accounts_created = report.service_accounts_created,
            "apply complete"
        );
        Ok(report)
    }

    // -- Phase 1: organizations -----------------------------------------------

    /// Ensure every configured organization exists and build the name -> ID
    /// table. Organizations referenced elsewhere in the manifest but not
    /// listed are looked up as well, so pre-existing orgs resolve too.
    async fn ensure_orgs(&self, report: &mut ProvisionReport) -> Result<OrgIdTable, ProvisionError> {
        let mut table = OrgIdTable::new();

        for name in &self.config.organizations {
            match self.grafana.lookup_org(name).await? {
                Some(org) => {
                    debug!(name, org_id = org.id, "organization exists");
                    report.orgs_existing += 1;
                    table.insert(name.clone(), org.id);
                }
                None => {
                    let id = self.grafana.create_org(name).await?;
                    report.orgs_created += 1;
                    table.insert(name.clone(), id);
                }
            }
        }

        for name in self.referenced_org_names() {
            if table.contains_key(&name) {
                continue;
            }
            if let Some(org) = self.grafana.lookup_org(&name).await? {
                debug!(name, org_id = org.id, "resolved pre-existing organization");
                table.insert(name, org.id);
            }
            // Unknown orgs surface later with context: the compiler reports
            // the group, the dashboard/service-account phases the manifest
            // field.
        }

        Ok(table)
    }

    /// Organization names referenced outside the `organizations` list.
    fn referenced_org_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut push = |name: &str| {
            if !names.iter().any(|n: &String| n == name) {
                names.push(name.to_string());
            }
        };

        if let Some(ref sso) = self.config.sso {
            for group in &sso.groups {
                for mapping in &group.org_mappings {
                    if let Some(org) = mapping.org.name() {
                        push(org);
                    }
                }
            }
        }
        for source in &self.config.dashboards {
            if let Some(ref org) = source.org {
                push(org);
            }
        }
        for sa in &self.config.service_accounts {
            if let Some(ref org) = sa.org {
                push(org);
            }
        }
        names
    }

    // -- Phase 2: SSO settings ------------------------------------------------

    async fn apply_sso(
        &self,
        sso_config: &SsoConfig,
        org_ids: &OrgIdTable,
    ) -> Result<(), ProvisionError> {
        let compiled = sso::compile(
            &sso_config.groups,
            org_ids,
            sso_config.org_mapping.as_deref(),
            sso_config.role_attribute_path.as_deref(),
        )?;
        debug!(
            has_admin_expression = compiled.role_attribute_path.is_some(),
            has_org_mapping = compiled.org_mapping.is_some(),
            "compiled SSO group mapping"
        );

        let (client_id, client_secret) = self.oauth_credentials(sso_config).await?;
        if client_secret.is_none() {
            warn!("no OAuth client secret available, applying mapping-only SSO update");
        }

        let has_admin_groups = !sso::compiler::collect_admin_groups(&sso_config.groups).is_empty();

        let settings = SsoSettings {
            enabled: Some(true),
            client_id,
            client_secret,
            auth_url: sso_config.auth_url.clone(),
            token_url: sso_config.token_url.clone(),
            scopes: if sso_config.scopes.is_empty() {
                None
            } else {
                Some(sso_config.scopes.join(" "))
            },
            role_attribute_path: compiled.role_attribute_path,
            org_mapping: compiled.org_mapping,
            allow_assign_grafana_admin: has_admin_groups.then_some(true),
        };

        self.grafana
            .put_sso_settings(&sso_config.provider, &settings)
            .await?;
        Ok(())
    }

    /// Resolve the OAuth client credentials: Vault secret when configured,
    /// otherwise the inline / env-resolved manifest values.
    async fn oauth_credentials(
        &self,
        sso_config: &SsoConfig,
    ) -> Result<(Option<String>, Option<String>), ProvisionError> {
        if let (Some(vault), Some(vault_config)) = (&self.vault, &self.config.vault) {
            let secret = vault
                .read_kv(&vault_config.mount, &vault_config.oauth_secret_path)
                .await?;

            let client_id = match sso_config.client_id.clone() {
                Some(inline) => Some(inline),
                None => Some(vault::require_key(
                    &secret,
                    &vault_config.oauth_secret_path,
                    &sso_config.client_id_key,
                )?),
            };
            let client_secret = vault::require_key(
                &secret,
                &vault_config.oauth_secret_path,
                &sso_config.client_secret_key,
            )?;
            return Ok((client_id, Some(client_secret)));
        }

        Ok((
            sso_config.client_id.clone(),
            sso_config.client_secret.clone(),
        ))
    }

    // -- Phase 3: dashboards --------------------------------------------------

    async fn import_dashboards(
        &self,
        org_ids: &OrgIdTable,
        report: &mut ProvisionReport,
    ) -> Result<(), ProvisionError> {
        for (i, source) in self.config.dashboards.iter().enumerate() {
            let org_id = self.resolve_org(source.org.as_deref(), &format!("dashboards[{i}].org"), org_ids)?;

            let folder_uid = match source.folder.as_deref() {
                Some(title) => Some(self.ensure_folder(org_id, title, report).await?),
                None => None,
            };

            let files = dashboards::discover(&source.dir, &source.pattern)?;
            info!(
                dir = %source.dir.display(),
                org_id,
                count = files.len(),
                "importing dashboards"
            );

            for file in files {
                let model = file.load_model()?;
                let uid = self
                    .grafana
                    .import_dashboard(org_id, &model, folder_uid.as_deref())
                    .await?;
                debug!(rel_path = %file.rel_path, uid = %uid, "dashboard imported");
                report.dashboards_imported += 1;
            }
        }
        Ok(())
    }

    /// Find a folder by title within an org, creating it if absent. Returns
    /// the folder uid.
    async fn ensure_folder(
        &self,
        org_id: i64,
        title: &str,
        report: &mut ProvisionReport,
    ) -> Result<String, ProvisionError> {
        let existing = self.grafana.list_folders(org_id).await?;
        if let Some(folder) = existing.into_iter().find(|f| f.title == title) {
            debug!(org_id, title, uid = %folder.uid, "folder exists");
            return Ok(folder.uid);
        }

        let folder = self.grafana.create_folder(org_id, title).await?;
        report.folders_created += 1;
        Ok(folder.uid)
    }

    // -- Phase 4: service accounts --------------------------------------------

    async fn ensure_service_accounts(
        &self,
        org_ids: &OrgIdTable,
        report: &mut ProvisionReport,
    ) -> Result<(), ProvisionError> {
        for (i, spec) in self.config.service_accounts.iter().enumerate() {
            let org_id = self.resolve_org(
                spec.org.as_deref(),
                &format!("service_accounts[{i}].org"),
                org_ids,
            )?;

            let existing = self.grafana.list_service_accounts(org_id).await?;
            match existing.iter().find(|sa| sa.name == spec.name) {
                Some(sa) => {
                    if sa.role != spec.role {
                        // Role changes are lifecycle management, which this
                        // tool deliberately does not do.
                        warn!(
                            name = %spec.name,
                            current = %sa.role,
                            wanted = %spec.role,
                            "service account exists with a different role, leaving as-is"
                        );
                    } else {
                        debug!(name = %spec.name, org_id, "service account exists");
                    }
                    report.service_accounts_existing += 1;
                }
                None => {
                    self.grafana
                        .create_service_account(org_id, &spec.name, &spec.role)
                        .await?;
                    report.service_accounts_created += 1;
                }
            }
        }
        Ok(())
    }

    /// Resolve an optional org name against the table; `None` selects the
    /// default organization.
    fn resolve_org(
        &self,
        org: Option<&str>,
        field: &str,
        org_ids: &OrgIdTable,
    ) -> Result<i64, ProvisionError> {
        match org {
            None => Ok(DEFAULT_ORG_ID),
            Some(name) => org_ids.get(name).copied().ok_or_else(|| {
                ConfigError::InvalidValue {
                    field: field.to_string(),
                    detail: format!("organization '{name}' does not exist"),
                }
                .into()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grafana::GrafanaAuth;

    fn provisioner_with(yaml: &str) -> Provisioner {
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        let auth = GrafanaAuth::Token("glsa_test".into());
        let grafana = GrafanaClient::new("https://grafana.example.com", &auth).unwrap();
        Provisioner::new(config, grafana, None)
    }

    #[test]
    fn test_referenced_org_names_deduplicated() {
        let p = provisioner_with(
            r#"
grafana:
  url: https://grafana.example.com
  token_env: GRAFANA_TOKEN
sso:
  provider: azuread
  groups:
    - name: sre
      org_mappings:
        - org: teamA
          role: Editor
        - org: "*"
          role: Viewer
dashboards:
  - dir: dashboards
    org: teamA
service_accounts:
  - name: ci
    org: teamB
"#,
        );
        assert_eq!(p.referenced_org_names(), vec!["teamA", "teamB"]);
    }

    #[test]
    fn test_resolve_org_default_and_missing() {
        let p = provisioner_with(
            r#"
grafana:
  url: https://grafana.example.com
  token_env: GRAFANA_TOKEN
"#,
        );
        let mut table = OrgIdTable::new();
        table.insert("teamA".into(), 4);

        assert_eq!(p.resolve_org(None, "f", &table).unwrap(), DEFAULT_ORG_ID);
        assert_eq!(p.resolve_org(Some("teamA"), "f", &table).unwrap(), 4);
        assert!(p.resolve_org(Some("ghost"), "f", &table).is_err());
    }
}
