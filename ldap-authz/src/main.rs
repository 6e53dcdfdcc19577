use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ldap_authz::config::{ResolverConfig, Settings};
use ldap_authz::crypto::PasswordHasherFactory;
use ldap_authz::directory::LdapConnectionPool;
use ldap_authz::domain::{AuthenticationContext, Identity, RoleMapping, SearchBaseRegistry};
use ldap_authz::{telemetry, RoleResolver};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolve directory roles and check role resolution configuration
#[derive(Parser)]
#[command(name = "ldap-authz")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print Prometheus metrics after the command
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the backend roles of a user
    Resolve {
        /// Username or user DN
        principal: String,
    },

    /// Print the normalized configuration
    CheckConfig,

    /// Validate a role mapping document
    CheckMapping {
        /// JSON file holding the mapping
        path: PathBuf,

        /// Validate with administrator privileges
        #[arg(long)]
        admin: bool,

        /// Backend roles to match the mapping against
        #[arg(short, long = "role")]
        roles: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if cli.metrics {
        settings.telemetry.metrics_enabled = true;
    }
    let prometheus = telemetry::init(&settings.telemetry)?;

    match cli.command {
        Commands::Resolve { principal } => resolve(&settings, principal).await?,
        Commands::CheckConfig => check_config(&settings)?,
        Commands::CheckMapping { path, admin, roles } => check_mapping(&path, admin, roles)?,
    }

    if let Some(handle) = prometheus {
        print!("{}", handle.render());
    }
    Ok(())
}

async fn resolve(settings: &Settings, principal: String) -> Result<()> {
    let config = ResolverConfig::from_settings(settings)?;
    let pool = Arc::new(LdapConnectionPool::new(&settings.connection));
    let resolver = RoleResolver::new(config, pool);

    tracing::info!(principal = %principal, backend = resolver.backend_type(), "Resolving roles");
    let result = resolver
        .resolve_roles(Identity::new(principal), &AuthenticationContext::default())
        .await;
    resolver.shutdown().await;

    let identity = result?;
    println!("{}", serde_json::to_string_pretty(&identity)?);
    Ok(())
}

fn check_config(settings: &Settings) -> Result<()> {
    let config = ResolverConfig::from_settings(settings)?;
    let scheme = PasswordHasherFactory::create(&settings.password_hashing)?;

    let report = json!({
        "hosts": settings.connection.hosts,
        "role_bases": bases(&config.role_bases),
        "user_bases": bases(&config.user_bases),
        "rolesearch_enabled": config.rolesearch_enabled,
        "resolve_nested_roles": config.resolve_nested_roles(),
        "max_nested_depth": config.max_nested_depth,
        "user_role_attributes": config.user_role_attributes,
        "role_name_attribute": config.role_name_attribute,
        "password_hashing": scheme,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn bases(registry: &SearchBaseRegistry) -> Vec<serde_json::Value> {
    registry
        .iter()
        .map(|(_, base)| {
            json!({
                "name": base.name,
                "base": base.base,
                "search": base.filter.as_str(),
            })
        })
        .collect()
}

fn check_mapping(path: &Path, admin: bool, roles: Vec<String>) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let document: serde_json::Value = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let mapping = RoleMapping::from_document(&document, admin)?;
    let report = json!({
        "valid": true,
        "mapping": mapping,
        "matches_roles": (!roles.is_empty()).then(|| mapping.matches_backend_roles(&roles)),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
