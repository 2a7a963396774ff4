// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Challenge provider registry
//!
//! Maps the configured provider name to a constructed solver. Every
//! constructor validates its own credentials here, at startup; a missing
//! token or an unknown provider never surfaces at first renewal.

pub mod cloudflare;
pub mod digitalocean;
pub mod http;

use std::sync::Arc;

use crate::domain::challenge::{
    ChallengeError, ChallengeSolver, ProviderCredentials, ProviderKind,
};

use cloudflare::CloudflareSolver;
use digitalocean::DigitalOceanSolver;
use http::HttpSolver;

/// Default listen port for the http-01 responder.
const DEFAULT_HTTP_PORT: u16 = 80;

pub fn build_solver(
    kind: ProviderKind,
    credentials: &ProviderCredentials,
) -> Result<Arc<dyn ChallengeSolver>, ChallengeError> {
    match kind {
        ProviderKind::Cloudflare => {
            let token = require(
                credentials.cloudflare_api_token.as_deref(),
                "cloudflare",
                "api token",
            )?;
            Ok(Arc::new(CloudflareSolver::new(token)?))
        }
        ProviderKind::DigitalOcean => {
            let token = require(
                credentials.digitalocean_token.as_deref(),
                "digitalocean",
                "access token",
            )?;
            Ok(Arc::new(DigitalOceanSolver::new(token)?))
        }
        ProviderKind::Http => {
            let port = credentials.http_listen_port.unwrap_or(DEFAULT_HTTP_PORT);
            Ok(Arc::new(HttpSolver::new(port)))
        }
    }
}

fn require(
    value: Option<&str>,
    provider: &'static str,
    name: &'static str,
) -> Result<String, ChallengeError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ChallengeError::MissingCredential { provider, name }),
    }
}

/// Candidate zone names for a domain, longest first, down to the
/// registrable two-label suffix.
pub(crate) fn zone_candidates(domain: &str) -> Vec<String> {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return vec![domain.to_string()];
    }
    (0..=labels.len() - 2)
        .map(|i| labels[i..].join("."))
        .collect()
}
