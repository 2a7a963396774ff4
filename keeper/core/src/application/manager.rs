// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Certificate manager
//!
//! Owns the whole pipeline: one startup convergence, then the renewal
//! loop. Single logical task; the remote certificate id and expiry date
//! live here and are mutated only between scheduler wakeups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::domain::acme::CertificateAuthority;
use crate::domain::clock::Clock;
use crate::domain::config::Settings;
use crate::domain::fleet::{CertificatePayload, FleetApi};
use crate::infrastructure::store::CertificateStore;

use super::reconciler::{ReconcileError, Reconciler, CERT_DESCRIPTION};
use super::scheduler::{RenewError, RenewalScheduler, Renewer};
use super::synchronizer::Synchronizer;

#[derive(Debug, Error)]
pub enum FatalError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Renew(#[from] RenewError),
}

pub struct CertificateManager {
    settings: Arc<Settings>,
    store: CertificateStore,
    ca: Arc<dyn CertificateAuthority>,
    fleet: Arc<dyn FleetApi>,
    sync: Synchronizer,
    clock: Arc<dyn Clock>,
    remote_cert_id: String,
    expiry_date: DateTime<Utc>,
}

impl CertificateManager {
    pub fn new(
        settings: Arc<Settings>,
        store: CertificateStore,
        ca: Arc<dyn CertificateAuthority>,
        fleet: Arc<dyn FleetApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sync = Synchronizer::new(fleet.clone(), clock.clone());
        Self {
            settings,
            store,
            ca,
            fleet,
            sync,
            clock,
            remote_cert_id: String::new(),
            expiry_date: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Converge local and remote state, then renew on schedule. Only
    /// returns in run-once mode or on a fatal error.
    pub async fn run(mut self) -> Result<(), FatalError> {
        let reconciler = Reconciler::new(
            &self.store,
            self.ca.as_ref(),
            self.fleet.as_ref(),
            &self.sync,
            &self.settings,
        );
        let convergence = reconciler.startup().await?;
        self.remote_cert_id = convergence.remote_cert_id;
        self.expiry_date = convergence.expiry_date;
        info!(
            id = %self.remote_cert_id,
            expires = %self.expiry_date.format("%Y/%m/%d %H:%M UTC"),
            "startup reconciliation complete"
        );

        let scheduler = RenewalScheduler::new(self.settings.policy.clone(), self.clock.clone());
        let initial_expiry = self.expiry_date;
        scheduler.run(initial_expiry, &mut self).await?;
        Ok(())
    }
}

#[async_trait]
impl Renewer for CertificateManager {
    /// One renewal cycle: renew via the CA, persist, push to the fleet
    /// platform, fan out to the referencing load balancers. Strictly in
    /// that order; any failure is fatal for the run.
    async fn renew(&mut self) -> Result<DateTime<Utc>, RenewError> {
        let name = &self.settings.cert_name;
        info!(
            domains = %self.settings.domains.join(" | "),
            "renewing certificate"
        );

        let renewed = self.ca.renew(name).await?;
        info!("successfully renewed certificate");

        let stored = self.store.save(
            name,
            &self.settings.domains,
            &renewed.private_key,
            &renewed.certificate_chain,
        )?;

        let payload = CertificatePayload {
            name: stored.name.clone(),
            description: CERT_DESCRIPTION.to_string(),
            cert: String::from_utf8_lossy(&stored.certificate_chain).into_owned(),
            key: String::from_utf8_lossy(&stored.private_key).into_owned(),
        };
        self.sync
            .update_certificate(&self.remote_cert_id, &payload)
            .await?;
        info!(id = %self.remote_cert_id, "updated fleet certificate resource");

        self.sync.sync_load_balancers(&self.remote_cert_id).await?;

        self.expiry_date = stored.expiry_date;
        Ok(stored.expiry_date)
    }
}
