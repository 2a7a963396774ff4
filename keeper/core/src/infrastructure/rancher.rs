// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Rancher fleet platform adapter
//!
//! HTTP client for the v2-beta resource API: certificate resources, load
//! balancer services and their upgrade actions. Credentials are the
//! account access/secret key pair, sent as basic auth.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::fleet::{
    CertificatePayload, FleetApi, FleetError, LoadBalancer, RemoteCertificate,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Initial connect probe: first retry delay and overall budget.
const CONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const CONNECT_BUDGET: Duration = Duration::from_secs(10);

const ACTION_UPGRADE: &str = "upgrade";
const ACTION_FINISH_UPGRADE: &str = "finishupgrade";

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InServiceStrategy<'a> {
    launch_config: Option<&'a serde_json::Value>,
    start_first: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpgradeRequest<'a> {
    in_service_strategy: InServiceStrategy<'a>,
}

pub struct RancherClient {
    http: reqwest::Client,
    base_url: String,
    access_key: String,
    secret_key: String,
}

impl RancherClient {
    pub fn new(api_url: &str, access_key: &str, secret_key: &str) -> Result<Self, FleetError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: api_url.trim_end_matches('/').to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    /// Build a client and verify the API is reachable, retrying with
    /// doubling delays while the platform comes up.
    pub async fn connect(
        api_url: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, FleetError> {
        let client = Self::new(api_url, access_key, secret_key)?;
        let mut delay = CONNECT_BASE_DELAY;
        let mut spent = Duration::ZERO;
        loop {
            match client.probe().await {
                Ok(()) => return Ok(client),
                Err(err) if spent + delay < CONNECT_BUDGET => {
                    warn!(error = %err, "fleet api not reachable yet, retrying");
                    tokio::time::sleep(delay).await;
                    spent += delay;
                    delay *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn probe(&self) -> Result<(), FleetError> {
        let url = format!("{}/certificates", self.base_url);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .query(&[("limit", "1")])
            .send()
            .await?;
        Self::ensure_success(response).await.map(|_| ())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FleetError> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .query(query)
            .send()
            .await?;
        Ok(Self::ensure_success(response).await?.json().await?)
    }

    async fn send_json<T: serde::de::DeserializeOwned, B: Serialize>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: &B,
    ) -> Result<T, FleetError> {
        let response = self
            .http
            .request(method, url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .json(body)
            .send()
            .await?;
        Ok(Self::ensure_success(response).await?.json().await?)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, FleetError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        Err(FleetError::Api {
            status: status.as_u16(),
            url,
            body,
        })
    }

    fn action_url(lb: &LoadBalancer, action: &str) -> Result<String, FleetError> {
        lb.actions
            .get(action)
            .cloned()
            .ok_or_else(|| FleetError::MissingAction {
                name: lb.name.clone(),
                action: action.to_string(),
            })
    }
}

#[async_trait]
impl FleetApi for RancherClient {
    async fn find_certificate_by_name(
        &self,
        name: &str,
    ) -> Result<Option<RemoteCertificate>, FleetError> {
        debug!(name = %name, "looking up fleet certificate by name");
        let collection: Collection<RemoteCertificate> = self
            .get_json(
                &self.url("certificates"),
                &[("name", name), ("removed_null", "true")],
            )
            .await?;
        Ok(collection.data.into_iter().next())
    }

    async fn create_certificate(
        &self,
        payload: &CertificatePayload,
    ) -> Result<RemoteCertificate, FleetError> {
        self.send_json(reqwest::Method::POST, &self.url("certificates"), payload)
            .await
    }

    async fn update_certificate(
        &self,
        id: &str,
        payload: &CertificatePayload,
    ) -> Result<RemoteCertificate, FleetError> {
        let url = self.url(&format!("certificates/{id}"));
        self.send_json(reqwest::Method::PUT, &url, payload).await
    }

    async fn certificate_settled(&self, id: &str) -> Result<bool, FleetError> {
        let url = self.url(&format!("certificates/{id}"));
        let cert: RemoteCertificate = self.get_json(&url, &[]).await?;
        Ok(!cert.is_transitioning())
    }

    async fn list_load_balancers_referencing(
        &self,
        cert_id: &str,
    ) -> Result<Vec<LoadBalancer>, FleetError> {
        debug!(cert_id = %cert_id, "looking up load balancers referencing certificate");
        let collection: Collection<LoadBalancer> = self
            .get_json(
                &self.url("loadbalancerservices"),
                &[("state", "active"), ("removed_null", "true")],
            )
            .await?;
        Ok(collection
            .data
            .into_iter()
            .filter(|lb| lb.references_certificate(cert_id))
            .collect())
    }

    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer, FleetError> {
        let url = self.url(&format!("loadbalancerservices/{id}"));
        self.get_json(&url, &[]).await
    }

    async fn upgrade_load_balancer(&self, lb: &LoadBalancer) -> Result<LoadBalancer, FleetError> {
        let url = Self::action_url(lb, ACTION_UPGRADE)?;
        let body = UpgradeRequest {
            in_service_strategy: InServiceStrategy {
                launch_config: lb.launch_config.as_ref(),
                start_first: false,
            },
        };
        self.send_json(reqwest::Method::POST, &url, &body).await
    }

    async fn finish_upgrade(&self, id: &str) -> Result<LoadBalancer, FleetError> {
        let lb = self.get_load_balancer(id).await?;
        let url = Self::action_url(&lb, ACTION_FINISH_UPGRADE)?;
        self.send_json(reqwest::Method::POST, &url, &serde_json::json!({}))
            .await
    }

    async fn load_balancer_settled(&self, id: &str) -> Result<bool, FleetError> {
        Ok(!self.get_load_balancer(id).await?.is_transitioning())
    }
}
