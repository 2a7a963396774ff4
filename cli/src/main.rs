// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS CertKeeper CLI
//!
//! The `certkeeper` binary keeps one TLS certificate valid without
//! operator intervention: obtain it from an ACME certificate authority,
//! persist it locally, publish it into the fleet platform's certificate
//! resource, upgrade every load balancer referencing it, and renew on a
//! schedule ahead of expiry.
//!
//! All configuration comes from flags or environment variables (a `.env`
//! file is honored). The process exits non-zero on any fatal condition:
//! invalid configuration, issuance failure, storage write failure, an
//! irreconcilable remote/local mismatch, or a fleet transport failure on
//! the publish path.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use aegis_certkeeper_core::application::CertificateManager;
use aegis_certkeeper_core::domain::challenge::{ProviderCredentials, ProviderKind};
use aegis_certkeeper_core::domain::config::{
    parse_domain_list, AcmeEnvironment, AcmeSettings, FleetSettings, KeyType, RenewalPolicy,
    Settings,
};
use aegis_certkeeper_core::infrastructure::acme::AcmeAuthority;
use aegis_certkeeper_core::infrastructure::challenge::build_solver;
use aegis_certkeeper_core::infrastructure::clock::SystemClock;
use aegis_certkeeper_core::infrastructure::rancher::RancherClient;
use aegis_certkeeper_core::infrastructure::store::CertificateStore;

/// AEGIS CertKeeper - keep a fleet TLS certificate valid without operator intervention
#[derive(Parser)]
#[command(name = "certkeeper")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Fleet platform API endpoint (v2-beta project URL)
    #[arg(long, env = "CATTLE_URL", value_name = "URL")]
    api_url: String,

    /// Fleet platform access key
    #[arg(long, env = "CATTLE_ACCESS_KEY", hide_env_values = true)]
    access_key: String,

    /// Fleet platform secret key
    #[arg(long, env = "CATTLE_SECRET_KEY", hide_env_values = true)]
    secret_key: String,

    /// Contact email for the ACME account
    #[arg(long, env = "ACME_EMAIL")]
    email: String,

    /// Accept the certificate authority's terms of service
    #[arg(long, env = "ACME_AGREE_TOS")]
    agree_tos: bool,

    /// ACME environment (production | staging)
    #[arg(long, env = "ACME_ENVIRONMENT", default_value = "production")]
    environment: String,

    /// Account/CSR key type (ec256 | ec384)
    #[arg(long, env = "ACME_KEY_TYPE", default_value = "ec256")]
    key_type: String,

    /// Name of the managed certificate, also the fleet platform lookup key
    #[arg(long, env = "CERT_NAME")]
    cert_name: String,

    /// Comma separated domains the certificate covers
    #[arg(long, env = "DOMAINS")]
    domains: String,

    /// Challenge provider (cloudflare | digitalocean | http)
    #[arg(long, env = "PROVIDER")]
    provider: String,

    /// Cloudflare API token (dns-01)
    #[arg(long, env = "CLOUDFLARE_API_TOKEN", hide_env_values = true)]
    cloudflare_api_token: Option<String>,

    /// DigitalOcean access token (dns-01)
    #[arg(long, env = "DO_ACCESS_TOKEN", hide_env_values = true)]
    do_access_token: Option<String>,

    /// Listen port for the http-01 responder
    #[arg(long, env = "HTTP_PORT", value_name = "PORT")]
    http_port: Option<u16>,

    /// Directory the certificate artifacts are stored under
    #[arg(long, env = "STORE_DIR", default_value = "/var/lib/certkeeper")]
    store_dir: PathBuf,

    /// Days before expiry at which renewal fires
    #[arg(long, env = "RENEWAL_PERIOD_DAYS", default_value_t = 14)]
    renewal_period_days: i64,

    /// Hour of day (0-23, UTC) at which renewal fires
    #[arg(long, env = "RENEWAL_TIME", default_value_t = 12)]
    renewal_time: u32,

    /// Evaluate once and exit instead of looping
    #[arg(long, env = "RUN_ONCE")]
    run_once: bool,

    /// Renew every 120 seconds regardless of expiry (staging experiments)
    #[arg(long)]
    test_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CERTKEEPER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(err) = init_logging(&cli.log_level) {
        eprintln!("certkeeper: {err:#}");
        std::process::exit(1);
    }

    // The single place that turns a fatal error into an exit code.
    if let Err(err) = run(cli).await {
        error!("fatal: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting AEGIS CertKeeper"
    );

    let settings = Arc::new(build_settings(&cli)?);
    let solver = build_solver(settings.provider, &settings.credentials)
        .context("challenge provider configuration")?;

    // Production and staging artifacts live in separate subtrees.
    let store_root = settings
        .store_dir
        .join(settings.acme.environment.store_scope());
    let store = CertificateStore::new(&store_root);
    let ca = Arc::new(AcmeAuthority::new(
        settings.acme.clone(),
        settings.domains.clone(),
        solver,
        &store_root,
    ));
    let fleet = Arc::new(
        RancherClient::connect(
            &settings.fleet.api_url,
            &settings.fleet.access_key,
            &settings.fleet.secret_key,
        )
        .await
        .context("fleet platform API is not reachable")?,
    );

    let manager = CertificateManager::new(settings, store, ca, fleet, Arc::new(SystemClock));
    manager.run().await?;
    Ok(())
}

fn build_settings(cli: &Cli) -> Result<Settings> {
    let environment: AcmeEnvironment = cli.environment.parse()?;
    let key_type: KeyType = cli.key_type.parse()?;
    let provider: ProviderKind = cli.provider.parse()?;

    let settings = Settings {
        fleet: FleetSettings {
            api_url: cli.api_url.clone(),
            access_key: cli.access_key.clone(),
            secret_key: cli.secret_key.clone(),
        },
        acme: AcmeSettings {
            email: cli.email.clone(),
            environment,
            key_type,
            accept_tos: cli.agree_tos,
        },
        cert_name: cli.cert_name.clone(),
        domains: parse_domain_list(&cli.domains),
        provider,
        credentials: ProviderCredentials {
            cloudflare_api_token: cli.cloudflare_api_token.clone(),
            digitalocean_token: cli.do_access_token.clone(),
            http_listen_port: cli.http_port,
        },
        store_dir: cli.store_dir.clone(),
        policy: RenewalPolicy {
            lead_days: cli.renewal_period_days,
            renewal_hour: cli.renewal_time,
            run_once: cli.run_once,
            test_mode: cli.test_mode,
        },
    };
    settings.validate()?;
    Ok(settings)
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec![
            "certkeeper",
            "--api-url",
            "http://rancher.local/v2-beta/projects/1a5",
            "--access-key",
            "ak",
            "--secret-key",
            "sk",
            "--email",
            "ops@example.com",
            "--agree-tos",
            "--cert-name",
            "web-tls",
            "--domains",
            "Example.com, www.example.com",
            "--provider",
            "http",
        ]
    }

    #[test]
    fn settings_build_from_flags() {
        let cli = Cli::try_parse_from(base_args()).unwrap();
        let settings = build_settings(&cli).unwrap();
        assert_eq!(settings.cert_name, "web-tls");
        assert_eq!(
            settings.domains,
            vec!["example.com".to_string(), "www.example.com".to_string()]
        );
        assert_eq!(settings.provider, ProviderKind::Http);
        assert_eq!(settings.acme.environment, AcmeEnvironment::Production);
        assert_eq!(settings.policy.lead_days, 14);
        assert_eq!(settings.policy.renewal_hour, 12);
        assert!(!settings.policy.run_once);
    }

    #[test]
    fn unknown_provider_fails_at_startup() {
        let mut args = base_args();
        let pos = args.iter().position(|a| *a == "http").unwrap();
        args[pos] = "route53";
        let cli = Cli::try_parse_from(args).unwrap();
        let err = build_settings(&cli).unwrap_err();
        assert!(err.to_string().contains("unsupported challenge provider"));
    }

    #[test]
    fn invalid_renewal_hour_fails_at_startup() {
        let mut args = base_args();
        args.extend(["--renewal-time", "24"]);
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(build_settings(&cli).is_err());
    }

    #[test]
    fn terms_must_be_accepted() {
        let args: Vec<&str> = base_args()
            .into_iter()
            .filter(|a| *a != "--agree-tos")
            .collect();
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(build_settings(&cli).is_err());
    }

    #[test]
    fn staging_environment_parses() {
        let mut args = base_args();
        args.extend(["--environment", "staging", "--key-type", "ec384"]);
        let cli = Cli::try_parse_from(args).unwrap();
        let settings = build_settings(&cli).unwrap();
        assert_eq!(settings.acme.environment, AcmeEnvironment::Staging);
        assert_eq!(settings.acme.key_type, KeyType::EcdsaP384);
    }
}
