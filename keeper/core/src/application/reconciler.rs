// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Startup reconciler
//!
//! Runs once at process start and brings the local store and the fleet
//! platform into agreement, with at most one issuance and at most one
//! remote mutation:
//!
//! | local | remote | serials match | action |
//! |-------|--------|---------------|--------|
//! | yes   | yes    | yes           | adopt the remote resource |
//! | yes   | yes    | no            | update remote from local, sync balancers |
//! | yes   | no     | any           | create remote from local |
//! | no    | yes    | any           | fatal: refuse to overwrite an unknown resource |
//! | no    | no     | any           | issue, save, create remote |
//!
//! A corrupt store, or a stored domain set that no longer matches the
//! configured one, counts as "no usable local certificate".

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::domain::acme::{CertificateAuthority, IssueError};
use crate::domain::certificate::{domain_set_id, StoreError, StoredCertificate};
use crate::domain::config::Settings;
use crate::domain::fleet::{CertificatePayload, FleetApi, FleetError};
use crate::infrastructure::store::CertificateStore;

use super::synchronizer::Synchronizer;

/// Description attached to the fleet certificate resource.
pub const CERT_DESCRIPTION: &str = "Managed by AEGIS CertKeeper";

/// Where startup converged to: the remote resource now under management
/// and the authoritative expiry for the scheduler.
#[derive(Debug, Clone)]
pub struct Convergence {
    pub remote_cert_id: String,
    pub expiry_date: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A remote certificate exists with no matching local record. Never
    /// guess which side is authoritative.
    #[error(
        "fleet certificate '{name}' exists but is not in the local store; refusing to manage it"
    )]
    RemoteWithoutLocal { name: String },

    #[error("certificate issuance failed")]
    Issuance(#[source] IssueError),

    #[error(transparent)]
    Fleet(#[from] FleetError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Reconciler<'a> {
    store: &'a CertificateStore,
    ca: &'a dyn CertificateAuthority,
    fleet: &'a dyn FleetApi,
    sync: &'a Synchronizer,
    settings: &'a Settings,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a CertificateStore,
        ca: &'a dyn CertificateAuthority,
        fleet: &'a dyn FleetApi,
        sync: &'a Synchronizer,
        settings: &'a Settings,
    ) -> Self {
        Self {
            store,
            ca,
            fleet,
            sync,
            settings,
        }
    }

    pub async fn startup(&self) -> Result<Convergence, ReconcileError> {
        let name = &self.settings.cert_name;
        let local = self.usable_local_certificate();
        let remote = self.fleet.find_certificate_by_name(name).await?;

        match (local, remote) {
            (Some(local), Some(remote)) => {
                if local.serial_number == remote.serial_number {
                    info!(name = %remote.name, id = %remote.id, "managing existing fleet certificate");
                    return Ok(Convergence {
                        remote_cert_id: remote.id,
                        expiry_date: local.expiry_date,
                    });
                }
                info!(
                    name = %remote.name,
                    local_serial = %local.serial_number,
                    remote_serial = %remote.serial_number,
                    "fleet certificate serial differs from local store, pushing local content"
                );
                self.sync
                    .update_certificate(&remote.id, &self.payload(&local))
                    .await?;
                self.sync.sync_load_balancers(&remote.id).await?;
                Ok(Convergence {
                    remote_cert_id: remote.id,
                    expiry_date: local.expiry_date,
                })
            }
            (Some(local), None) => {
                info!(name = %name, "publishing locally stored certificate to the fleet platform");
                let created = self.sync.create_certificate(&self.payload(&local)).await?;
                Ok(Convergence {
                    remote_cert_id: created.id,
                    expiry_date: local.expiry_date,
                })
            }
            (None, Some(remote)) => Err(ReconcileError::RemoteWithoutLocal { name: remote.name }),
            (None, None) => self.issue_and_publish().await,
        }
    }

    /// Load the local certificate, degrading every failure mode to "none":
    /// a fresh issuance recovers from all of them.
    fn usable_local_certificate(&self) -> Option<StoredCertificate> {
        let name = &self.settings.cert_name;
        match self.store.load(name) {
            Ok(cert) => {
                if cert.domain_set_id != domain_set_id(&self.settings.domains) {
                    info!(
                        stored = %cert.domain_set_id,
                        "stored certificate does not cover the configured domains"
                    );
                    return None;
                }
                info!(name = %name, "found local store for certificate");
                Some(cert)
            }
            Err(StoreError::NotFound(_)) => None,
            Err(err) => {
                error!(name = %name, error = %err, "local store is unusable, will issue a new certificate");
                None
            }
        }
    }

    async fn issue_and_publish(&self) -> Result<Convergence, ReconcileError> {
        let name = &self.settings.cert_name;
        info!(
            domains = %self.settings.domains.join(" | "),
            "obtaining certificate"
        );

        let issued = match self.ca.issue(name, &self.settings.domains).await {
            Ok(issued) => issued,
            Err(IssueError::PerDomain { failures }) => {
                log_domain_failures(&failures);
                return Err(ReconcileError::Issuance(IssueError::PerDomain { failures }));
            }
            Err(err) => return Err(ReconcileError::Issuance(err)),
        };
        info!("successfully obtained certificate");

        let stored = self.store.save(
            name,
            &self.settings.domains,
            &issued.private_key,
            &issued.certificate_chain,
        )?;

        let created = self.sync.create_certificate(&self.payload(&stored)).await?;
        Ok(Convergence {
            remote_cert_id: created.id,
            expiry_date: stored.expiry_date,
        })
    }

    fn payload(&self, cert: &StoredCertificate) -> CertificatePayload {
        CertificatePayload {
            name: cert.name.clone(),
            description: CERT_DESCRIPTION.to_string(),
            cert: String::from_utf8_lossy(&cert.certificate_chain).into_owned(),
            key: String::from_utf8_lossy(&cert.private_key).into_owned(),
        }
    }
}

fn log_domain_failures(failures: &BTreeMap<String, String>) {
    for (domain, reason) in failures {
        error!(domain = %domain, "failed to obtain certificate: {reason}");
    }
    warn!("{} domain(s) failed validation", failures.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::acme::{AcmeError, IssuedCertificate};
    use crate::domain::challenge::ProviderCredentials;
    use crate::domain::clock::fake::FakeClock;
    use crate::domain::config::{
        AcmeEnvironment, AcmeSettings, FleetSettings, KeyType, RenewalPolicy,
    };
    use crate::domain::fleet::{LoadBalancer, RemoteCertificate};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    fn test_chain_and_key(serial: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params =
            rcgen::CertificateParams::new(vec!["example.com".to_string()]).unwrap();
        params.serial_number = Some(rcgen::SerialNumber::from_slice(serial));
        params.not_after = rcgen::date_time_ymd(2027, 3, 1);
        let cert = params.self_signed(&key).unwrap();
        (cert.pem().into_bytes(), key.serialize_pem().into_bytes())
    }

    fn settings(store_dir: &std::path::Path) -> Settings {
        Settings {
            fleet: FleetSettings {
                api_url: "http://rancher.local/v2-beta".to_string(),
                access_key: "ak".to_string(),
                secret_key: "sk".to_string(),
            },
            acme: AcmeSettings {
                email: "ops@example.com".to_string(),
                environment: AcmeEnvironment::Staging,
                key_type: KeyType::EcdsaP256,
                accept_tos: true,
            },
            cert_name: "web-tls".to_string(),
            domains: vec!["example.com".to_string()],
            provider: crate::domain::challenge::ProviderKind::Http,
            credentials: ProviderCredentials::default(),
            store_dir: store_dir.to_path_buf(),
            policy: RenewalPolicy::default(),
        }
    }

    /// CA stub returning a scripted result and counting issuances.
    struct ScriptedCa {
        issues: Mutex<u32>,
        fail_domains: Option<BTreeMap<String, String>>,
        chain: Vec<u8>,
        key: Vec<u8>,
    }

    impl ScriptedCa {
        fn issuing(serial: &[u8]) -> Self {
            let (chain, key) = test_chain_and_key(serial);
            Self {
                issues: Mutex::new(0),
                fail_domains: None,
                chain,
                key,
            }
        }

        fn failing(failures: BTreeMap<String, String>) -> Self {
            Self {
                issues: Mutex::new(0),
                fail_domains: Some(failures),
                chain: Vec::new(),
                key: Vec::new(),
            }
        }

        fn issue_count(&self) -> u32 {
            *self.issues.lock().unwrap()
        }
    }

    #[async_trait]
    impl CertificateAuthority for ScriptedCa {
        async fn issue(
            &self,
            _name: &str,
            _domains: &[String],
        ) -> Result<IssuedCertificate, IssueError> {
            *self.issues.lock().unwrap() += 1;
            if let Some(failures) = &self.fail_domains {
                return Err(IssueError::PerDomain {
                    failures: failures.clone(),
                });
            }
            Ok(IssuedCertificate {
                private_key: self.key.clone(),
                certificate_chain: self.chain.clone(),
            })
        }

        async fn renew(&self, _name: &str) -> Result<IssuedCertificate, AcmeError> {
            unreachable!("the reconciler never renews")
        }
    }

    /// Fleet stub recording every call by name.
    struct RecordingFleet {
        existing: Option<RemoteCertificate>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl RecordingFleet {
        fn with_remote(serial: &str) -> Self {
            Self {
                existing: Some(RemoteCertificate {
                    id: "1c5".to_string(),
                    name: "web-tls".to_string(),
                    serial_number: serial.to_string(),
                    transitioning: "no".to_string(),
                }),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn empty() -> Self {
            Self {
                existing: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn mutations(&self) -> Vec<&'static str> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(*c, "create" | "update" | "upgrade"))
                .collect()
        }
    }

    #[async_trait]
    impl FleetApi for RecordingFleet {
        async fn find_certificate_by_name(
            &self,
            _name: &str,
        ) -> Result<Option<RemoteCertificate>, FleetError> {
            self.calls.lock().unwrap().push("find");
            Ok(self.existing.clone())
        }

        async fn create_certificate(
            &self,
            payload: &CertificatePayload,
        ) -> Result<RemoteCertificate, FleetError> {
            self.calls.lock().unwrap().push("create");
            Ok(RemoteCertificate {
                id: "1c9".to_string(),
                name: payload.name.clone(),
                ..Default::default()
            })
        }

        async fn update_certificate(
            &self,
            _id: &str,
            payload: &CertificatePayload,
        ) -> Result<RemoteCertificate, FleetError> {
            self.calls.lock().unwrap().push("update");
            Ok(RemoteCertificate {
                id: "1c5".to_string(),
                name: payload.name.clone(),
                ..Default::default()
            })
        }

        async fn certificate_settled(&self, _id: &str) -> Result<bool, FleetError> {
            Ok(true)
        }

        async fn list_load_balancers_referencing(
            &self,
            _cert_id: &str,
        ) -> Result<Vec<LoadBalancer>, FleetError> {
            self.calls.lock().unwrap().push("list");
            Ok(Vec::new())
        }

        async fn get_load_balancer(&self, _id: &str) -> Result<LoadBalancer, FleetError> {
            Ok(LoadBalancer::default())
        }

        async fn upgrade_load_balancer(
            &self,
            lb: &LoadBalancer,
        ) -> Result<LoadBalancer, FleetError> {
            self.calls.lock().unwrap().push("upgrade");
            Ok(lb.clone())
        }

        async fn finish_upgrade(&self, _id: &str) -> Result<LoadBalancer, FleetError> {
            Ok(LoadBalancer::default())
        }

        async fn load_balancer_settled(&self, _id: &str) -> Result<bool, FleetError> {
            Ok(true)
        }
    }

    fn sync_for(fleet: &Arc<RecordingFleet>) -> Synchronizer {
        let clock = Arc::new(FakeClock::starting_at(
            "2024-01-01T00:00:00Z".parse().unwrap(),
        ));
        Synchronizer::new(fleet.clone(), clock)
    }

    async fn converge(
        store: &CertificateStore,
        ca: &ScriptedCa,
        fleet: &Arc<RecordingFleet>,
        settings: &Settings,
    ) -> Result<Convergence, ReconcileError> {
        let sync = sync_for(fleet);
        Reconciler::new(store, ca, fleet.as_ref(), &sync, settings)
            .startup()
            .await
    }

    fn seeded_store(dir: &std::path::Path, serial: &[u8]) -> CertificateStore {
        let store = CertificateStore::new(dir);
        let (chain, key) = test_chain_and_key(serial);
        store
            .save("web-tls", &["example.com".to_string()], &key, &chain)
            .unwrap();
        store
    }

    #[tokio::test]
    async fn matching_serials_adopt_the_remote_without_mutations() {
        let dir = tempfile::tempdir().unwrap();
        // serial 0x2a == "42"
        let store = seeded_store(dir.path(), &[0x2a]);
        let ca = ScriptedCa::issuing(&[0x01]);
        let fleet = Arc::new(RecordingFleet::with_remote("42"));

        let convergence = converge(&store, &ca, &fleet, &settings(dir.path()))
            .await
            .unwrap();
        assert_eq!(convergence.remote_cert_id, "1c5");
        assert_eq!(ca.issue_count(), 0);
        assert!(fleet.mutations().is_empty());
    }

    #[tokio::test]
    async fn serial_mismatch_updates_remote_and_syncs_balancers() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), &[0x2a]);
        let ca = ScriptedCa::issuing(&[0x01]);
        let fleet = Arc::new(RecordingFleet::with_remote("9999"));

        let convergence = converge(&store, &ca, &fleet, &settings(dir.path()))
            .await
            .unwrap();
        assert_eq!(convergence.remote_cert_id, "1c5");
        assert_eq!(ca.issue_count(), 0);
        assert_eq!(fleet.calls(), vec!["find", "update", "list"]);
    }

    #[tokio::test]
    async fn local_only_creates_the_remote_resource() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), &[0x2a]);
        let ca = ScriptedCa::issuing(&[0x01]);
        let fleet = Arc::new(RecordingFleet::empty());

        let convergence = converge(&store, &ca, &fleet, &settings(dir.path()))
            .await
            .unwrap();
        assert_eq!(convergence.remote_cert_id, "1c9");
        assert_eq!(ca.issue_count(), 0);
        assert_eq!(fleet.mutations(), vec!["create"]);
    }

    #[tokio::test]
    async fn remote_without_local_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path());
        let ca = ScriptedCa::issuing(&[0x01]);
        let fleet = Arc::new(RecordingFleet::with_remote("42"));

        let err = converge(&store, &ca, &fleet, &settings(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::RemoteWithoutLocal { .. }));
        assert_eq!(ca.issue_count(), 0);
        assert!(fleet.mutations().is_empty());
    }

    #[tokio::test]
    async fn nothing_anywhere_issues_saves_and_creates() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path());
        let ca = ScriptedCa::issuing(&[0x07]);
        let fleet = Arc::new(RecordingFleet::empty());

        let convergence = converge(&store, &ca, &fleet, &settings(dir.path()))
            .await
            .unwrap();
        assert_eq!(ca.issue_count(), 1);
        assert_eq!(fleet.mutations(), vec!["create"]);
        assert_eq!(convergence.remote_cert_id, "1c9");
        // The issued certificate made it to the store.
        assert_eq!(store.load("web-tls").unwrap().serial_number, "7");
    }

    #[tokio::test]
    async fn issuance_failure_is_fatal_and_nothing_is_published() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path());
        let failures = BTreeMap::from([(
            "example.com".to_string(),
            "dns record not found".to_string(),
        )]);
        let ca = ScriptedCa::failing(failures);
        let fleet = Arc::new(RecordingFleet::empty());

        let err = converge(&store, &ca, &fleet, &settings(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Issuance(_)));
        assert!(fleet.mutations().is_empty());
        assert!(!store.exists("web-tls"));
    }

    #[tokio::test]
    async fn stored_domain_set_mismatch_counts_as_no_local() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), &[0x2a]);
        let ca = ScriptedCa::issuing(&[0x07]);
        let fleet = Arc::new(RecordingFleet::empty());

        let mut settings = settings(dir.path());
        settings.domains = vec!["example.com".to_string(), "www.example.com".to_string()];

        let _ = converge(&store, &ca, &fleet, &settings).await.unwrap();
        // The stale store does not cover the configured domains: re-issue.
        assert_eq!(ca.issue_count(), 1);
        assert_eq!(fleet.mutations(), vec!["create"]);
    }

    #[tokio::test]
    async fn corrupt_store_degrades_to_no_local() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), &[0x2a]);
        std::fs::write(dir.path().join("certs/web-tls/metadata.json"), b"{ not json").unwrap();
        let ca = ScriptedCa::issuing(&[0x07]);
        let fleet = Arc::new(RecordingFleet::empty());

        let _ = converge(&store, &ca, &fleet, &settings(dir.path()))
            .await
            .unwrap();
        assert_eq!(ca.issue_count(), 1);
    }
}
