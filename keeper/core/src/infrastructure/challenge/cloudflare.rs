// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cloudflare dns-01 solver
//!
//! Publishes `_acme-challenge` TXT records through the Cloudflare v4 API.
//! The managed zone is found by walking the domain's suffixes from most to
//! least specific.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::challenge::{ChallengeError, ChallengeKind, ChallengeSolver};

use super::zone_candidates;

const API_BASE: &str = "https://api.cloudflare.com/client/v4";
const RECORD_TTL: u32 = 120;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default = "Vec::new")]
    result: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ApiObject {
    id: String,
}

pub struct CloudflareSolver {
    http: reqwest::Client,
    api_token: String,
    api_base: String,
}

impl CloudflareSolver {
    pub fn new(api_token: String) -> Result<Self, ChallengeError> {
        Self::with_endpoint(api_token, API_BASE.to_string())
    }

    fn with_endpoint(api_token: String, api_base: String) -> Result<Self, ChallengeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| ChallengeError::Api(err.to_string()))?;
        Ok(Self {
            http,
            api_token,
            api_base,
        })
    }

    async fn find_zone_id(&self, domain: &str) -> Result<String, ChallengeError> {
        for candidate in zone_candidates(domain) {
            let url = format!("{}/zones", self.api_base);
            let envelope: Envelope<ApiObject> = self
                .get(&url, &[("name", candidate.as_str())])
                .await?;
            if let Some(zone) = envelope.result.into_iter().next() {
                debug!(zone = %candidate, id = %zone.id, "resolved cloudflare zone");
                return Ok(zone.id);
            }
        }
        Err(ChallengeError::ZoneNotFound(domain.to_string()))
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Envelope<T>, ChallengeError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_token)
            .query(query)
            .send()
            .await
            .map_err(|err| ChallengeError::Api(err.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Envelope<T>, ChallengeError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChallengeError::Api(format!("cloudflare api {status}: {body}")));
        }
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|err| ChallengeError::Api(err.to_string()))?;
        if !envelope.success {
            return Err(ChallengeError::Api("cloudflare api reported failure".to_string()));
        }
        Ok(envelope)
    }
}

#[async_trait]
impl ChallengeSolver for CloudflareSolver {
    fn kind(&self) -> ChallengeKind {
        ChallengeKind::Dns01
    }

    async fn present(&self, domain: &str, _token: &str, proof: &str) -> Result<(), ChallengeError> {
        let zone_id = self.find_zone_id(domain).await?;
        let url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);
        let body = serde_json::json!({
            "type": "TXT",
            "name": format!("_acme-challenge.{domain}"),
            "content": proof,
            "ttl": RECORD_TTL,
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|err| ChallengeError::Api(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChallengeError::Api(format!("cloudflare api {status}: {body}")));
        }
        debug!(domain = %domain, "published dns-01 record");
        Ok(())
    }

    async fn cleanup(&self, domain: &str, _token: &str) -> Result<(), ChallengeError> {
        let zone_id = self.find_zone_id(domain).await?;
        let list_url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);
        let fqdn = format!("_acme-challenge.{domain}");
        let records: Envelope<ApiObject> = self
            .get(&list_url, &[("type", "TXT"), ("name", fqdn.as_str())])
            .await?;

        for record in records.result {
            let url = format!("{}/zones/{}/dns_records/{}", self.api_base, zone_id, record.id);
            let result = self
                .http
                .delete(&url)
                .bearer_auth(&self.api_token)
                .send()
                .await;
            if let Err(err) = result {
                warn!(domain = %domain, error = %err, "failed to remove dns-01 record");
            }
        }
        Ok(())
    }
}
