// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleet platform capability
//!
//! Domain interface for the fleet platform collaborator (certificate
//! resources and the load balancer services that reference them). The
//! platform applies mutations asynchronously: every create/update returns
//! before the change is live, and resources report `transitioning == "yes"`
//! until it is. The settle probes re-fetch and report whether the mutation
//! has completed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Marker value a resource reports while a mutation is still being applied.
pub const TRANSITIONING_YES: &str = "yes";

/// Handle to the platform's certificate resource. The platform owns it;
/// this system only keeps the `id` after adoption or creation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCertificate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub transitioning: String,
}

impl RemoteCertificate {
    pub fn is_transitioning(&self) -> bool {
        self.transitioning == TRANSITIONING_YES
    }
}

/// Handle to a load balancer service that may reference a certificate,
/// either as its default certificate or in its certificate list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub transitioning: String,
    #[serde(default)]
    pub default_certificate_id: Option<String>,
    #[serde(default)]
    pub certificate_ids: Vec<String>,
    /// Opaque launch configuration, echoed back verbatim on upgrade.
    #[serde(default)]
    pub launch_config: Option<serde_json::Value>,
    /// Action name to invocation URL, as published by the platform.
    #[serde(default)]
    pub actions: HashMap<String, String>,
}

impl LoadBalancer {
    pub fn is_transitioning(&self) -> bool {
        self.transitioning == TRANSITIONING_YES
    }

    /// Whether this balancer references `cert_id` at all.
    pub fn references_certificate(&self, cert_id: &str) -> bool {
        self.default_certificate_id.as_deref() == Some(cert_id)
            || self.certificate_ids.iter().any(|id| id == cert_id)
    }
}

/// Content pushed into the platform's certificate resource.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificatePayload {
    pub name: String,
    pub description: String,
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("fleet api request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("fleet api returned {status} for {url}: {body}")]
    Api {
        status: u16,
        url: String,
        body: String,
    },

    #[error("fleet resource '{0}' does not exist")]
    NotFound(String),

    #[error("load balancer '{name}' does not publish a '{action}' action")]
    MissingAction { name: String, action: String },
}

/// The fleet platform collaborator.
#[async_trait]
pub trait FleetApi: Send + Sync {
    async fn find_certificate_by_name(
        &self,
        name: &str,
    ) -> Result<Option<RemoteCertificate>, FleetError>;

    async fn create_certificate(
        &self,
        payload: &CertificatePayload,
    ) -> Result<RemoteCertificate, FleetError>;

    async fn update_certificate(
        &self,
        id: &str,
        payload: &CertificatePayload,
    ) -> Result<RemoteCertificate, FleetError>;

    /// Re-fetch the certificate and report whether its last mutation has
    /// been applied.
    async fn certificate_settled(&self, id: &str) -> Result<bool, FleetError>;

    /// Every active load balancer referencing `cert_id`.
    async fn list_load_balancers_referencing(
        &self,
        cert_id: &str,
    ) -> Result<Vec<LoadBalancer>, FleetError>;

    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer, FleetError>;

    /// Trigger an in-service upgrade so the balancer picks up the renewed
    /// certificate content.
    async fn upgrade_load_balancer(&self, lb: &LoadBalancer) -> Result<LoadBalancer, FleetError>;

    /// Confirm a completed upgrade (platforms that leave the service in an
    /// intermediate `upgraded` state until told to finish).
    async fn finish_upgrade(&self, id: &str) -> Result<LoadBalancer, FleetError>;

    /// Re-fetch the load balancer and report whether its last mutation has
    /// been applied.
    async fn load_balancer_settled(&self, id: &str) -> Result<bool, FleetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_certificate_matches_default_and_list() {
        let lb = LoadBalancer {
            default_certificate_id: Some("1c10".to_string()),
            certificate_ids: vec!["1c11".to_string(), "1c12".to_string()],
            ..Default::default()
        };
        assert!(lb.references_certificate("1c10"));
        assert!(lb.references_certificate("1c12"));
        assert!(!lb.references_certificate("1c99"));
    }

    #[test]
    fn transitioning_only_on_yes() {
        let mut cert = RemoteCertificate {
            transitioning: "yes".to_string(),
            ..Default::default()
        };
        assert!(cert.is_transitioning());
        cert.transitioning = "no".to_string();
        assert!(!cert.is_transitioning());
        cert.transitioning = "error".to_string();
        assert!(!cert.is_transitioning());
    }
}
