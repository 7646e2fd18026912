//! grafprov command-line provisioning tool.
//!
//! Provides subcommands for generating and validating manifests, compiling
//! the SSO group mapping offline, listing discovered dashboards, and applying
//! the manifest against a live Grafana instance.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use grafprov_core::config::AppConfig;
use grafprov_core::dashboards;
use grafprov_core::grafana::{GrafanaAuth, GrafanaClient};
use grafprov_core::provisioner::Provisioner;
use grafprov_core::sso::{self, OrgIdTable};
use grafprov_core::vault::VaultClient;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// grafprov command-line provisioning tool.
#[derive(Parser, Debug)]
#[command(
    name = "grafprov",
    version,
    about = "Provision Grafana organizations, dashboards, and SSO settings from a YAML manifest"
)]
struct Cli {
    /// Path to the YAML manifest file.
    #[arg(short, long, global = true, default_value = "./grafprov.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default manifest file.
    Init {
        /// Output path for the generated manifest.
        #[arg(short, long, default_value = "./grafprov.yaml")]
        output: PathBuf,
    },

    /// Validate a manifest file.
    Validate,

    /// Compile the SSO group mapping and print the resulting settings.
    Compile {
        /// Organization ID overrides as `name=id` pairs, used to resolve
        /// named org references without contacting Grafana.
        #[arg(long = "org-id", value_name = "NAME=ID")]
        org_ids: Vec<String>,

        /// Resolve organization IDs from the live Grafana instance instead.
        #[arg(long)]
        from_grafana: bool,
    },

    /// List dashboard files discovered by the manifest's sources.
    Discover,

    /// Apply the manifest against the target Grafana instance.
    Apply,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Quiet by default; RUST_LOG=debug surfaces the core library's tracing.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        Commands::Compile {
            org_ids,
            from_grafana,
        } => cmd_compile(&cli.config, &org_ids, from_grafana).await,
        Commands::Discover => cmd_discover(&cli.config),
        Commands::Apply => cmd_apply(&cli.config).await,
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &PathBuf) -> Result<AppConfig> {
    let mut config = AppConfig::load_from_file(path).context("failed to load manifest file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    config.validate().context("manifest validation failed")?;
    Ok(config)
}

fn grafana_client(config: &AppConfig) -> Result<GrafanaClient> {
    let auth = if let Some(token) = config.grafana.token.clone() {
        GrafanaAuth::Token(token)
    } else if let (Some(user), Some(password)) = (
        config.grafana.admin_user.clone(),
        config.grafana.admin_password.clone(),
    ) {
        GrafanaAuth::Basic {
            username: user,
            password,
        }
    } else {
        anyhow::bail!(
            "no Grafana credentials resolved: set the env var referenced by \
             grafana.token_env or grafana.admin_password_env"
        );
    };
    GrafanaClient::new(&config.grafana.url, &auth).context("failed to build Grafana client")
}

fn vault_client(config: &AppConfig) -> Result<Option<VaultClient>> {
    let Some(vault) = config.vault.as_ref() else {
        return Ok(None);
    };
    let token = vault.token.clone().with_context(|| {
        format!(
            "Vault is configured but the env var '{}' is not set",
            vault.token_env
        )
    })?;
    Ok(Some(VaultClient::new(&vault.addr, token)))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &PathBuf) -> Result<()> {
    let default_manifest = r#"# grafprov manifest
# See documentation for all available options.

grafana:
  url: https://grafana.example.com
  # Server admin basic auth (required for org and SSO-settings endpoints):
  admin_user: admin
  admin_password_env: GRAFANA_ADMIN_PASSWORD
  # ... or a service-account token:
  # token_env: GRAFANA_TOKEN

# Optional Vault KV v2 source for the OAuth client credentials.
# vault:
#   addr: https://vault.example.com
#   token_env: VAULT_TOKEN
#   mount: secret
#   oauth_secret_path: grafana/oauth

organizations:
  - teamA
  - teamB

sso:
  provider: azuread
  # client_id: abc-123            # inline, or client_id_key in the Vault secret
  # client_secret_env: OAUTH_CLIENT_SECRET
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
  # Static fallbacks used when no dynamic group data applies:
  # role_attribute_path: "'Viewer'"
  # org_mapping: "*:1:Viewer"

dashboards:
  - dir: dashboards/teamA
    pattern: "**/*.json"
    folder: Team A
    org: teamA

service_accounts:
  - name: ci-publisher
    role: Editor
    org: teamA
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_manifest).context("failed to write manifest file")?;

    println!("Default manifest written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the manifest with your Grafana and identity-provider details");
    println!("  2. Set the referenced environment variables (GRAFANA_ADMIN_PASSWORD, etc.)");
    println!(
        "  3. Validate with: grafprov validate --config {}",
        output.display()
    );
    println!(
        "  4. Apply with: grafprov apply --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &PathBuf) -> Result<()> {
    println!("Validating manifest: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse manifest")?;
    println!("  [OK] YAML structure is valid");

    let _ = config.resolve_env_vars();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => {
            println!("  [OK] All required fields are valid");
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("manifest validation failed");
        }
    }

    println!();
    println!("Manifest summary:");
    println!("  Grafana URL      : {}", config.grafana.url);
    println!(
        "  Credentials      : {}",
        if config.grafana.token.is_some() || config.grafana.admin_password.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!(
        "  Vault            : {}",
        config
            .vault
            .as_ref()
            .map(|v| v.addr.as_str())
            .unwrap_or("not configured")
    );
    println!("  Organizations    : {}", config.organizations.len());
    match config.sso {
        Some(ref sso) => {
            println!("  SSO provider     : {}", sso.provider);
            println!("  SSO groups       : {}", sso.groups.len());
        }
        None => println!("  SSO provider     : not configured"),
    }
    println!("  Dashboard sources: {}", config.dashboards.len());
    println!("  Service accounts : {}", config.service_accounts.len());
    println!();
    println!("Manifest is valid.");

    Ok(())
}

async fn cmd_compile(
    config_path: &PathBuf,
    org_id_args: &[String],
    from_grafana: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let Some(sso_config) = config.sso.as_ref() else {
        anyhow::bail!("manifest has no sso section, nothing to compile");
    };

    let org_ids: OrgIdTable = if from_grafana {
        let grafana = grafana_client(&config)?;
        let orgs = grafana
            .list_orgs()
            .await
            .context("failed to list organizations")?;
        orgs.into_iter().map(|o| (o.name, o.id)).collect()
    } else {
        parse_org_id_args(org_id_args)?
    };

    let compiled = sso::compile(
        &sso_config.groups,
        &org_ids,
        sso_config.org_mapping.as_deref(),
        sso_config.role_attribute_path.as_deref(),
    )
    .context("failed to compile SSO group mapping")?;

    println!("role_attribute_path:");
    match compiled.role_attribute_path {
        Some(ref expr) => println!("  {}", expr),
        None => println!("  (unset)"),
    }
    println!();
    println!("org_mapping:");
    match compiled.org_mapping {
        Some(ref mapping) => {
            for line in mapping.lines() {
                println!("  {}", line);
            }
        }
        None => println!("  (unset)"),
    }

    Ok(())
}

fn parse_org_id_args(args: &[String]) -> Result<OrgIdTable> {
    let mut table = OrgIdTable::new();
    for arg in args {
        let (name, id) = arg
            .split_once('=')
            .with_context(|| format!("invalid --org-id '{}': expected NAME=ID", arg))?;
        let id: i64 = id
            .parse()
            .with_context(|| format!("invalid --org-id '{}': ID must be an integer", arg))?;
        table.insert(name.to_string(), id);
    }
    Ok(table)
}

fn cmd_discover(config_path: &PathBuf) -> Result<()> {
    let config = load_config(config_path)?;

    if config.dashboards.is_empty() {
        println!("No dashboard sources configured.");
        return Ok(());
    }

    let mut total = 0;
    for source in &config.dashboards {
        println!(
            "Source: {} (pattern {}, folder {}, org {})",
            source.dir.display(),
            source.pattern,
            source.folder.as_deref().unwrap_or("General"),
            source.org.as_deref().unwrap_or("default"),
        );

        let files = dashboards::discover(&source.dir, &source.pattern)
            .with_context(|| format!("discovery failed for {}", source.dir.display()))?;

        if files.is_empty() {
            println!("  (no matching files)");
        }
        for file in &files {
            println!(
                "  {:<40} {:<30} {}",
                file.rel_path,
                file.title,
                file.uid.as_deref().unwrap_or("-"),
            );
        }
        total += files.len();
        println!();
    }
    println!("{} dashboard(s) discovered", total);

    Ok(())
}

async fn cmd_apply(config_path: &PathBuf) -> Result<()> {
    let config = load_config(config_path)?;
    let grafana = grafana_client(&config)?;
    let vault = vault_client(&config)?;

    println!("Applying manifest: {}", config_path.display());
    println!("  Grafana URL  : {}", config.grafana.url);
    println!("  Organizations: {}", config.organizations.len());
    println!(
        "  SSO provider : {}",
        config
            .sso
            .as_ref()
            .map(|s| s.provider.as_str())
            .unwrap_or("none")
    );
    println!();

    let provisioner = Provisioner::new(config, grafana, vault);
    let report = provisioner.apply().await.map_err(|e| {
        anyhow::anyhow!("apply failed: {}", e)
    })?;

    println!("Apply completed:");
    println!(
        "  Organizations   : {} existing, {} created",
        report.orgs_existing, report.orgs_created
    );
    println!(
        "  SSO settings    : {}",
        if report.sso_applied {
            "applied"
        } else {
            "skipped"
        }
    );
    println!("  Folders created : {}", report.folders_created);
    println!("  Dashboards      : {} imported", report.dashboards_imported);
    println!(
        "  Service accounts: {} existing, {} created",
        report.service_accounts_existing, report.service_accounts_created
    );
    println!("  Started at      : {}", report.started_at);
    if let Some(ref completed) = report.completed_at {
        println!("  Completed       : {}", completed);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_org_id_args() {
        let table = parse_org_id_args(&["teamA=2".into(), "teamB=3".into()]).unwrap();
        assert_eq!(table.get("teamA"), Some(&2));
        assert_eq!(table.get("teamB"), Some(&3));

        assert!(parse_org_id_args(&["broken".into()]).is_err());
        assert!(parse_org_id_args(&["teamA=abc".into()]).is_err());
    }
}
