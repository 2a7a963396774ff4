// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Runtime configuration
//!
//! Built once by the binary and passed by reference through the manager,
//! reconciler, scheduler, and synchronizer. Read-only after startup; no
//! ambient globals.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use super::challenge::{ProviderCredentials, ProviderKind};

/// Let's Encrypt production directory.
pub const PRODUCTION_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory (rate-limit free, untrusted roots).
pub const STAGING_DIRECTORY: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcmeEnvironment {
    Production,
    Staging,
}

impl AcmeEnvironment {
    pub fn directory_url(&self) -> &'static str {
        match self {
            AcmeEnvironment::Production => PRODUCTION_DIRECTORY,
            AcmeEnvironment::Staging => STAGING_DIRECTORY,
        }
    }

    /// Subdirectory under the store root, so production and staging
    /// artifacts never mix.
    pub fn store_scope(&self) -> &'static str {
        match self {
            AcmeEnvironment::Production => "production",
            AcmeEnvironment::Staging => "staging",
        }
    }
}

impl FromStr for AcmeEnvironment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" => Ok(AcmeEnvironment::Production),
            "staging" | "sandbox" => Ok(AcmeEnvironment::Staging),
            other => Err(ConfigError::InvalidValue {
                setting: "acme environment",
                value: other.to_string(),
                expected: "production | staging",
            }),
        }
    }
}

impl fmt::Display for AcmeEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.store_scope())
    }
}

/// Account/CSR key algorithm. ECDSA only: the CSR generator cannot create
/// RSA keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    EcdsaP256,
    EcdsaP384,
}

impl FromStr for KeyType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ec256" | "ecdsa-256" | "p256" => Ok(KeyType::EcdsaP256),
            "ec384" | "ecdsa-384" | "p384" => Ok(KeyType::EcdsaP384),
            other => Err(ConfigError::InvalidValue {
                setting: "key type",
                value: other.to_string(),
                expected: "ec256 | ec384",
            }),
        }
    }
}

/// When renewal fires relative to certificate expiry.
#[derive(Debug, Clone)]
pub struct RenewalPolicy {
    /// Days before expiry at which renewal should run.
    pub lead_days: i64,
    /// Hour of day (0-23, UTC) at which renewal should fire.
    pub renewal_hour: u32,
    /// Evaluate once and exit instead of looping.
    pub run_once: bool,
    /// Renew every 120 seconds regardless of expiry. For exercising the
    /// pipeline end to end against a staging CA.
    pub test_mode: bool,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            lead_days: 14,
            renewal_hour: 12,
            run_once: false,
            test_mode: false,
        }
    }
}

/// Fleet platform endpoint and credentials.
#[derive(Debug, Clone)]
pub struct FleetSettings {
    pub api_url: String,
    pub access_key: String,
    pub secret_key: String,
}

/// Certificate authority account settings.
#[derive(Debug, Clone)]
pub struct AcmeSettings {
    pub email: String,
    pub environment: AcmeEnvironment,
    pub key_type: KeyType,
    /// The CA's subscriber agreement must be accepted explicitly.
    pub accept_tos: bool,
}

/// Process-wide configuration. One certificate identity per instance.
#[derive(Debug, Clone)]
pub struct Settings {
    pub fleet: FleetSettings,
    pub acme: AcmeSettings,
    pub cert_name: String,
    pub domains: Vec<String>,
    pub provider: ProviderKind,
    pub credentials: ProviderCredentials,
    pub store_dir: PathBuf,
    pub policy: RenewalPolicy,
}

impl Settings {
    /// Startup validation, before any collaborator is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fleet.api_url.is_empty() {
            return Err(ConfigError::Missing("fleet api url"));
        }
        if self.acme.email.is_empty() {
            return Err(ConfigError::Missing("acme contact email"));
        }
        if !self.acme.accept_tos {
            return Err(ConfigError::TermsNotAccepted);
        }
        if self.cert_name.is_empty() {
            return Err(ConfigError::Missing("certificate name"));
        }
        if self.domains.is_empty() || self.domains.iter().any(|d| d.is_empty()) {
            return Err(ConfigError::EmptyDomains);
        }
        if self.policy.renewal_hour > 23 {
            return Err(ConfigError::InvalidValue {
                setting: "renewal hour",
                value: self.policy.renewal_hour.to_string(),
                expected: "0-23",
            });
        }
        if self.policy.lead_days < 1 {
            return Err(ConfigError::InvalidValue {
                setting: "lead days",
                value: self.policy.lead_days.to_string(),
                expected: "a positive number of days",
            });
        }
        Ok(())
    }
}

/// Normalize a comma separated domain list: lowercase, trimmed, empties
/// dropped. Order is preserved; it is part of the domain set identity.
pub fn parse_domain_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required setting is missing: {0}")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {setting} (expected {expected})")]
    InvalidValue {
        setting: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("no domains configured")]
    EmptyDomains,

    #[error("the certificate authority's terms of service were not accepted")]
    TermsNotAccepted,
}
