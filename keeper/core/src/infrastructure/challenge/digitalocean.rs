// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! DigitalOcean dns-01 solver
//!
//! TXT record management through the v2 domains API. Record names are
//! relative to the managed zone.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::challenge::{ChallengeError, ChallengeKind, ChallengeSolver};

use super::zone_candidates;

const API_BASE: &str = "https://api.digitalocean.com";
const RECORD_TTL: u32 = 30;

#[derive(Debug, Deserialize)]
struct RecordList {
    #[serde(default = "Vec::new")]
    domain_records: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: u64,
}

pub struct DigitalOceanSolver {
    http: reqwest::Client,
    token: String,
    api_base: String,
}

impl DigitalOceanSolver {
    pub fn new(token: String) -> Result<Self, ChallengeError> {
        Self::with_endpoint(token, API_BASE.to_string())
    }

    fn with_endpoint(token: String, api_base: String) -> Result<Self, ChallengeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| ChallengeError::Api(err.to_string()))?;
        Ok(Self {
            http,
            token,
            api_base,
        })
    }

    async fn find_zone(&self, domain: &str) -> Result<String, ChallengeError> {
        for candidate in zone_candidates(domain) {
            let url = format!("{}/v2/domains/{}", self.api_base, candidate);
            let response = self
                .http
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|err| ChallengeError::Api(err.to_string()))?;
            if response.status().is_success() {
                debug!(zone = %candidate, "resolved digitalocean zone");
                return Ok(candidate);
            }
            if response.status() != reqwest::StatusCode::NOT_FOUND {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(ChallengeError::Api(format!(
                    "digitalocean api {status}: {body}"
                )));
            }
        }
        Err(ChallengeError::ZoneNotFound(domain.to_string()))
    }
}

/// The record name for `fqdn`, relative to `zone`.
fn relative_record_name(fqdn: &str, zone: &str) -> String {
    fqdn.strip_suffix(zone)
        .map(|prefix| prefix.trim_end_matches('.').to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "@".to_string())
}

#[async_trait]
impl ChallengeSolver for DigitalOceanSolver {
    fn kind(&self) -> ChallengeKind {
        ChallengeKind::Dns01
    }

    async fn present(&self, domain: &str, _token: &str, proof: &str) -> Result<(), ChallengeError> {
        let zone = self.find_zone(domain).await?;
        let fqdn = format!("_acme-challenge.{domain}");
        let url = format!("{}/v2/domains/{}/records", self.api_base, zone);
        let body = serde_json::json!({
            "type": "TXT",
            "name": relative_record_name(&fqdn, &zone),
            "data": proof,
            "ttl": RECORD_TTL,
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|err| ChallengeError::Api(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChallengeError::Api(format!(
                "digitalocean api {status}: {body}"
            )));
        }
        debug!(domain = %domain, "published dns-01 record");
        Ok(())
    }

    async fn cleanup(&self, domain: &str, _token: &str) -> Result<(), ChallengeError> {
        let zone = self.find_zone(domain).await?;
        let fqdn = format!("_acme-challenge.{domain}");
        let list_url = format!("{}/v2/domains/{}/records", self.api_base, zone);
        let response = self
            .http
            .get(&list_url)
            .bearer_auth(&self.token)
            .query(&[("type", "TXT"), ("name", fqdn.as_str())])
            .send()
            .await
            .map_err(|err| ChallengeError::Api(err.to_string()))?;
        let records: RecordList = response
            .json()
            .await
            .map_err(|err| ChallengeError::Api(err.to_string()))?;

        for record in records.domain_records {
            let url = format!("{}/v2/domains/{}/records/{}", self.api_base, zone, record.id);
            let result = self.http.delete(&url).bearer_auth(&self.token).send().await;
            if let Err(err) = result {
                warn!(domain = %domain, error = %err, "failed to remove dns-01 record");
            }
        }
        Ok(())
    }
}
