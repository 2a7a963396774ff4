// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain validation capability
//!
//! A challenge solver proves control of a domain to the certificate
//! authority, either by publishing a DNS TXT record (dns-01) or by serving
//! a token over plain HTTP (http-01). Solvers are selected by a typed
//! registry at startup; an unknown provider name fails there, not at first
//! use.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Supported validation mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Dns01,
    Http01,
}

/// Supported challenge providers. Parsed from configuration; each variant
/// maps to a constructor that validates its own credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Cloudflare,
    DigitalOcean,
    Http,
}

impl ProviderKind {
    pub fn challenge_kind(&self) -> ChallengeKind {
        match self {
            ProviderKind::Cloudflare | ProviderKind::DigitalOcean => ChallengeKind::Dns01,
            ProviderKind::Http => ChallengeKind::Http01,
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ChallengeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cloudflare" => Ok(ProviderKind::Cloudflare),
            "digitalocean" => Ok(ProviderKind::DigitalOcean),
            "http" => Ok(ProviderKind::Http),
            other => Err(ChallengeError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::Cloudflare => "cloudflare",
            ProviderKind::DigitalOcean => "digitalocean",
            ProviderKind::Http => "http",
        };
        f.write_str(name)
    }
}

/// Provider credentials as collected from configuration. Each constructor
/// validates the subset it needs.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub cloudflare_api_token: Option<String>,
    pub digitalocean_token: Option<String>,
    pub http_listen_port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("unsupported challenge provider '{0}' (supported: cloudflare, digitalocean, http)")]
    UnsupportedProvider(String),

    #[error("{provider} credential '{name}' is not set")]
    MissingCredential {
        provider: &'static str,
        name: &'static str,
    },

    #[error("no managed zone found for domain '{0}'")]
    ZoneNotFound(String),

    #[error("challenge provider request failed: {0}")]
    Api(String),
}

/// A configured challenge solver.
///
/// `present` publishes the proof before the authority is told the challenge
/// is ready; `cleanup` removes it afterwards (best effort).
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    fn kind(&self) -> ChallengeKind;

    /// Publish the validation proof for `domain`. For dns-01 `proof` is the
    /// TXT record value; for http-01 it is the key authorization body.
    async fn present(&self, domain: &str, token: &str, proof: &str) -> Result<(), ChallengeError>;

    async fn cleanup(&self, domain: &str, token: &str) -> Result<(), ChallengeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_parse_case_insensitively() {
        assert_eq!(
            "CloudFlare".parse::<ProviderKind>().unwrap(),
            ProviderKind::Cloudflare
        );
        assert_eq!(
            "digitalocean".parse::<ProviderKind>().unwrap(),
            ProviderKind::DigitalOcean
        );
        assert_eq!("HTTP".parse::<ProviderKind>().unwrap(), ProviderKind::Http);
    }

    #[test]
    fn unknown_provider_is_rejected_with_supported_list() {
        let err = "route66".parse::<ProviderKind>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("route66"));
        assert!(msg.contains("cloudflare"));
    }

    #[test]
    fn challenge_kind_per_provider() {
        assert_eq!(ProviderKind::Cloudflare.challenge_kind(), ChallengeKind::Dns01);
        assert_eq!(ProviderKind::Http.challenge_kind(), ChallengeKind::Http01);
    }
}
