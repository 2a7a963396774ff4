// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! ACME certificate authority adapter
//!
//! Implements the CA capability over `instant-acme`. Account credentials
//! are persisted under the store root and re-used across restarts; the
//! first run against a directory registers a fresh account. Issuance is
//! one order covering the whole domain set, with challenges solved
//! through the configured solver. ACME v2 has no distinct renewal
//! exchange, so renewal runs a fresh order for the same domains.

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::domain::acme::{AcmeError, CertificateAuthority, IssueError, IssuedCertificate};
use crate::domain::challenge::{ChallengeKind, ChallengeSolver};
use crate::domain::config::{AcmeSettings, KeyType};

/// How long to wait for the authority to validate the order and hand out
/// the chain.
const ORDER_TIMEOUT: Duration = Duration::from_secs(120);
/// Interval between order status polls.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

const CREDENTIALS_FILE: &str = "account.json";

pub struct AcmeAuthority {
    settings: AcmeSettings,
    domains: Vec<String>,
    solver: Arc<dyn ChallengeSolver>,
    credentials_path: PathBuf,
}

impl AcmeAuthority {
    /// `store_root` is the environment-scoped store directory; the account
    /// credentials live next to the certificate artifacts so production
    /// and staging accounts never mix.
    pub fn new(
        settings: AcmeSettings,
        domains: Vec<String>,
        solver: Arc<dyn ChallengeSolver>,
        store_root: &Path,
    ) -> Self {
        Self {
            settings,
            domains,
            solver,
            credentials_path: store_root.join(CREDENTIALS_FILE),
        }
    }

    /// Restore the account from persisted credentials, or register a new
    /// one and persist its credentials.
    async fn account(&self) -> Result<Account, AcmeError> {
        if self.credentials_path.is_file() {
            debug!(path = %self.credentials_path.display(), "restoring acme account from credentials");
            let json = tokio::fs::read(&self.credentials_path)
                .await
                .map_err(|err| AcmeError::Account(err.to_string()))?;
            let credentials: AccountCredentials = serde_json::from_slice(&json)
                .map_err(|err| AcmeError::Account(format!("stored credentials are invalid: {err}")))?;
            return Account::from_credentials(credentials)
                .await
                .map_err(|err| AcmeError::Account(err.to_string()));
        }

        let directory = self.settings.environment.directory_url();
        info!(directory = %directory, "registering acme account");
        let contact = format!("mailto:{}", self.settings.email);
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[contact.as_str()],
                terms_of_service_agreed: self.settings.accept_tos,
                only_return_existing: false,
            },
            directory,
            None,
        )
        .await
        .map_err(|err| AcmeError::Account(err.to_string()))?;

        self.persist_credentials(&credentials).await?;
        Ok(account)
    }

    async fn persist_credentials(&self, credentials: &AccountCredentials) -> Result<(), AcmeError> {
        if let Some(parent) = self.credentials_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| AcmeError::Account(err.to_string()))?;
        }
        let json = serde_json::to_vec_pretty(credentials)
            .map_err(|err| AcmeError::Account(err.to_string()))?;
        tokio::fs::write(&self.credentials_path, json)
            .await
            .map_err(|err| AcmeError::Account(err.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                &self.credentials_path,
                std::fs::Permissions::from_mode(0o600),
            )
            .map_err(|err| AcmeError::Account(err.to_string()))?;
        }
        info!(path = %self.credentials_path.display(), "persisted acme account credentials");
        Ok(())
    }

    async fn run_order(&self, domains: &[String]) -> Result<IssuedCertificate, IssueError> {
        let account = self.account().await?;
        let identifiers: Vec<Identifier> = domains
            .iter()
            .map(|domain| Identifier::Dns(domain.clone()))
            .collect();
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|err| AcmeError::Order(err.to_string()))?;

        let authorizations = order
            .authorizations()
            .await
            .map_err(|err| AcmeError::Order(err.to_string()))?;

        let mut failures = BTreeMap::new();
        let mut presented: Vec<(String, String)> = Vec::new();
        for authz in &authorizations {
            if authz.status == AuthorizationStatus::Valid {
                continue;
            }
            let Identifier::Dns(domain) = &authz.identifier;
            let wanted = match self.solver.kind() {
                ChallengeKind::Dns01 => ChallengeType::Dns01,
                ChallengeKind::Http01 => ChallengeType::Http01,
            };
            let Some(challenge) = authz.challenges.iter().find(|c| c.r#type == wanted) else {
                failures.insert(
                    domain.clone(),
                    format!("authority offered no {} challenge", challenge_label(self.solver.kind())),
                );
                continue;
            };

            let key_auth = order.key_authorization(challenge);
            let proof = match self.solver.kind() {
                ChallengeKind::Dns01 => key_auth.dns_value(),
                ChallengeKind::Http01 => key_auth.as_str().to_string(),
            };
            debug!(domain = %domain, "presenting validation proof");
            if let Err(err) = self.solver.present(domain, &challenge.token, &proof).await {
                failures.insert(domain.clone(), err.to_string());
                continue;
            }
            presented.push((domain.clone(), challenge.token.clone()));

            if let Err(err) = order.set_challenge_ready(&challenge.url).await {
                failures.insert(domain.clone(), err.to_string());
            }
        }

        if !failures.is_empty() {
            self.cleanup(&presented).await;
            return Err(IssueError::PerDomain { failures });
        }

        let status = match self.poll_order(&mut order).await {
            Ok(status) => status,
            Err(err) => {
                self.cleanup(&presented).await;
                return Err(err.into());
            }
        };
        if status == OrderStatus::Invalid {
            let failures = self.authorization_failures(&mut order).await;
            self.cleanup(&presented).await;
            return Err(IssueError::PerDomain { failures });
        }

        let result = self.finalize(&mut order, domains).await;
        self.cleanup(&presented).await;
        result.map_err(IssueError::Other)
    }

    /// Poll until the order leaves pending/processing.
    async fn poll_order(&self, order: &mut Order) -> Result<OrderStatus, AcmeError> {
        let started = Instant::now();
        loop {
            order
                .refresh()
                .await
                .map_err(|err| AcmeError::Order(err.to_string()))?;
            match order.state().status {
                OrderStatus::Pending | OrderStatus::Processing => {}
                status => return Ok(status),
            }
            if started.elapsed() > ORDER_TIMEOUT {
                return Err(AcmeError::Order(
                    "timed out waiting for the authority to validate the order".to_string(),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Per-domain reasons for an order that went invalid.
    async fn authorization_failures(&self, order: &mut Order) -> BTreeMap<String, String> {
        let mut failures = BTreeMap::new();
        match order.authorizations().await {
            Ok(authorizations) => {
                for authz in authorizations {
                    if authz.status == AuthorizationStatus::Valid {
                        continue;
                    }
                    let Identifier::Dns(domain) = authz.identifier;
                    failures.insert(domain, format!("authorization ended {:?}", authz.status));
                }
            }
            Err(err) => {
                failures.insert("*".to_string(), err.to_string());
            }
        }
        if failures.is_empty() {
            failures.insert("*".to_string(), "order was rejected by the authority".to_string());
        }
        failures
    }

    async fn finalize(
        &self,
        order: &mut Order,
        domains: &[String],
    ) -> Result<IssuedCertificate, AcmeError> {
        let key_pair = generate_key(self.settings.key_type)?;
        let mut params = CertificateParams::new(domains.to_vec())
            .map_err(|err| AcmeError::Order(err.to_string()))?;
        params.distinguished_name = DistinguishedName::new();
        let csr = params
            .serialize_request(&key_pair)
            .map_err(|err| AcmeError::Order(err.to_string()))?;

        order
            .finalize(csr.der())
            .await
            .map_err(|err| AcmeError::Order(err.to_string()))?;

        let started = Instant::now();
        let chain = loop {
            match order
                .certificate()
                .await
                .map_err(|err| AcmeError::Order(err.to_string()))?
            {
                Some(chain) => break chain,
                None if started.elapsed() > ORDER_TIMEOUT => {
                    return Err(AcmeError::Order(
                        "timed out waiting for the certificate chain".to_string(),
                    ));
                }
                None => tokio::time::sleep(POLL_INTERVAL).await,
            }
        };

        Ok(IssuedCertificate {
            private_key: key_pair.serialize_pem().into_bytes(),
            certificate_chain: chain.into_bytes(),
        })
    }

    /// Best effort removal of published validation material.
    async fn cleanup(&self, presented: &[(String, String)]) {
        for (domain, token) in presented {
            if let Err(err) = self.solver.cleanup(domain, token).await {
                warn!(domain = %domain, error = %err, "failed to remove validation proof");
            }
        }
    }
}

fn generate_key(key_type: KeyType) -> Result<KeyPair, AcmeError> {
    let alg = match key_type {
        KeyType::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
        KeyType::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
    };
    KeyPair::generate_for(alg).map_err(|err| AcmeError::Order(err.to_string()))
}

fn challenge_label(kind: ChallengeKind) -> &'static str {
    match kind {
        ChallengeKind::Dns01 => "dns-01",
        ChallengeKind::Http01 => "http-01",
    }
}

#[async_trait]
impl CertificateAuthority for AcmeAuthority {
    async fn issue(&self, name: &str, domains: &[String]) -> Result<IssuedCertificate, IssueError> {
        info!(
            name = %name,
            environment = %self.settings.environment,
            "ordering certificate"
        );
        self.run_order(domains).await
    }

    async fn renew(&self, name: &str) -> Result<IssuedCertificate, AcmeError> {
        info!(name = %name, "re-ordering certificate for renewal");
        match self.run_order(&self.domains).await {
            Ok(issued) => Ok(issued),
            Err(IssueError::PerDomain { failures }) => {
                for (domain, reason) in &failures {
                    error!(domain = %domain, "renewal validation failed: {reason}");
                }
                Err(AcmeError::Order(format!(
                    "{} domain(s) failed validation",
                    failures.len()
                )))
            }
            Err(IssueError::Other(err)) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::challenge::ChallengeError;
    use crate::domain::config::AcmeEnvironment;

    struct NullSolver;

    #[async_trait]
    impl ChallengeSolver for NullSolver {
        fn kind(&self) -> ChallengeKind {
            ChallengeKind::Http01
        }

        async fn present(&self, _: &str, _: &str, _: &str) -> Result<(), ChallengeError> {
            Ok(())
        }

        async fn cleanup(&self, _: &str, _: &str) -> Result<(), ChallengeError> {
            Ok(())
        }
    }

    #[test]
    fn credentials_live_under_the_store_root() {
        let settings = AcmeSettings {
            email: "ops@example.com".to_string(),
            environment: AcmeEnvironment::Staging,
            key_type: KeyType::EcdsaP256,
            accept_tos: true,
        };
        let authority = AcmeAuthority::new(
            settings,
            vec!["example.com".to_string()],
            Arc::new(NullSolver),
            Path::new("/var/lib/certkeeper/staging"),
        );
        assert_eq!(
            authority.credentials_path,
            Path::new("/var/lib/certkeeper/staging/account.json")
        );
    }

    #[test]
    fn both_key_types_produce_pem_keys() {
        for key_type in [KeyType::EcdsaP256, KeyType::EcdsaP384] {
            let key = generate_key(key_type).unwrap();
            assert!(key.serialize_pem().contains("BEGIN PRIVATE KEY"));
        }
    }
}
