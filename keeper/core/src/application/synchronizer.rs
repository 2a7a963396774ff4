// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Resource synchronizer
//!
//! The fleet platform applies certificate and load balancer mutations
//! asynchronously: a create/update returns before the change is live.
//! Everything here layers on one primitive, [`await_settled`], which polls
//! a resource with doubling backoff until it leaves its transitioning
//! state or a deadline passes.
//!
//! A settle timeout is soft: the mutation was accepted, the platform is
//! just slow to converge, so callers log a warning and move on. A
//! transport error while polling is hard and propagates.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::domain::clock::Clock;
use crate::domain::fleet::{CertificatePayload, FleetApi, FleetError, LoadBalancer, RemoteCertificate};

/// First backoff interval.
const BACKOFF_BASE: Duration = Duration::from_millis(150);
/// Backoff ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(2);
/// Default settle deadline.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Service state a platform leaves a balancer in until the upgrade is
/// confirmed.
const STATE_UPGRADED: &str = "upgraded";

#[derive(Debug, Error)]
pub enum SettleError {
    #[error("timed out waiting for {0} to settle")]
    Timeout(String),

    #[error(transparent)]
    Api(#[from] FleetError),
}

/// Poll `poll` until it reports the resource settled.
///
/// Backoff starts at 150ms, doubles after every unsettled poll, and is
/// capped at 2s. Fails with [`SettleError::Timeout`] once elapsed time
/// exceeds `max_duration`; returns on the first poll that reports settled.
pub async fn await_settled<F, Fut>(
    clock: &dyn Clock,
    max_duration: Duration,
    what: &str,
    mut poll: F,
) -> Result<(), SettleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, FleetError>>,
{
    let started = clock.now();
    let mut wait = BACKOFF_BASE;
    loop {
        let elapsed = (clock.now() - started).to_std().unwrap_or_default();
        if elapsed > max_duration {
            return Err(SettleError::Timeout(what.to_string()));
        }

        if poll().await? {
            return Ok(());
        }

        clock.sleep(wait).await;
        wait = (wait * 2).min(BACKOFF_CAP);
    }
}

/// Pushes certificate content to the fleet platform and fans renewals out
/// to the load balancers that reference it.
pub struct Synchronizer {
    fleet: Arc<dyn FleetApi>,
    clock: Arc<dyn Clock>,
    settle_timeout: Duration,
}

impl Synchronizer {
    pub fn new(fleet: Arc<dyn FleetApi>, clock: Arc<dyn Clock>) -> Self {
        Self {
            fleet,
            clock,
            settle_timeout: SETTLE_TIMEOUT,
        }
    }

    /// Create the platform certificate resource and wait for it to settle.
    pub async fn create_certificate(
        &self,
        payload: &CertificatePayload,
    ) -> Result<RemoteCertificate, FleetError> {
        let created = self.fleet.create_certificate(payload).await?;
        info!(name = %created.name, id = %created.id, "created fleet certificate resource");
        self.settle_certificate(&created.id).await?;
        Ok(created)
    }

    /// Update the platform certificate resource and wait for it to settle.
    pub async fn update_certificate(
        &self,
        id: &str,
        payload: &CertificatePayload,
    ) -> Result<RemoteCertificate, FleetError> {
        let updated = self.fleet.update_certificate(id, payload).await?;
        info!(name = %updated.name, id = %updated.id, "updated fleet certificate resource");
        self.settle_certificate(&updated.id).await?;
        Ok(updated)
    }

    /// Upgrade every load balancer referencing `cert_id`, each through its
    /// own upgrade-and-settle cycle. One failed balancer does not block
    /// the others; failures are logged and the fan-out continues.
    pub async fn sync_load_balancers(&self, cert_id: &str) -> Result<(), FleetError> {
        let balancers = self.fleet.list_load_balancers_referencing(cert_id).await?;
        if balancers.is_empty() {
            info!("certificate is not referenced by any load balancer");
            return Ok(());
        }

        for lb in &balancers {
            info!(balancer = %lb.name, "upgrading load balancer");
            match self.upgrade_and_settle(lb).await {
                Ok(()) => {
                    info!(balancer = %lb.name, "load balancer upgraded with renewed certificate")
                }
                Err(err) => {
                    error!(balancer = %lb.name, error = %err, "failed to upgrade load balancer")
                }
            }
        }
        Ok(())
    }

    async fn upgrade_and_settle(&self, lb: &LoadBalancer) -> Result<(), FleetError> {
        let service = self.fleet.upgrade_load_balancer(lb).await?;
        self.settle_load_balancer(&service.id).await?;

        // Some platforms hold the service in an intermediate state until
        // the upgrade is confirmed.
        let current = self.fleet.get_load_balancer(&service.id).await?;
        if current.state == STATE_UPGRADED {
            let finished = self.fleet.finish_upgrade(&current.id).await?;
            self.settle_load_balancer(&finished.id).await?;
        }
        Ok(())
    }

    async fn settle_certificate(&self, id: &str) -> Result<(), FleetError> {
        let fleet = self.fleet.as_ref();
        let what = format!("certificate {id}");
        match await_settled(self.clock.as_ref(), self.settle_timeout, &what, || {
            fleet.certificate_settled(id)
        })
        .await
        {
            Ok(()) => Ok(()),
            Err(SettleError::Timeout(what)) => {
                warn!(resource = %what, "mutation accepted but still transitioning after deadline");
                Ok(())
            }
            Err(SettleError::Api(err)) => Err(err),
        }
    }

    async fn settle_load_balancer(&self, id: &str) -> Result<(), FleetError> {
        let fleet = self.fleet.as_ref();
        let what = format!("load balancer {id}");
        match await_settled(self.clock.as_ref(), self.settle_timeout, &what, || {
            fleet.load_balancer_settled(id)
        })
        .await
        {
            Ok(()) => Ok(()),
            Err(SettleError::Timeout(what)) => {
                warn!(resource = %what, "mutation accepted but still transitioning after deadline");
                Ok(())
            }
            Err(SettleError::Api(err)) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::fake::FakeClock;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn clock() -> Arc<FakeClock> {
        Arc::new(FakeClock::starting_at(utc("2024-01-01T00:00:00Z")))
    }

    #[tokio::test]
    async fn settles_on_first_successful_poll_without_sleeping() {
        let clock = clock();
        let result = await_settled(clock.as_ref(), Duration::from_secs(120), "certificate 1c1", || async {
            Ok(true)
        })
        .await;
        assert!(result.is_ok());
        assert!(clock.recorded_sleeps().is_empty());
    }

    #[tokio::test]
    async fn backoff_doubles_until_settled() {
        let clock = clock();
        let polls = Mutex::new(0);
        let result = await_settled(clock.as_ref(), Duration::from_secs(120), "certificate 1c1", || {
            let mut polls = polls.lock().unwrap();
            *polls += 1;
            let settled = *polls >= 3;
            async move { Ok(settled) }
        })
        .await;
        assert!(result.is_ok());
        // not-settled, not-settled, settled: two sleeps of 150ms then 300ms.
        assert_eq!(
            clock.recorded_sleeps(),
            vec![Duration::from_millis(150), Duration::from_millis(300)]
        );
    }

    #[tokio::test]
    async fn backoff_is_nondecreasing_and_capped() {
        let clock = clock();
        let result = await_settled(clock.as_ref(), Duration::from_secs(30), "load balancer 1s1", || async {
            Ok(false)
        })
        .await;
        assert!(matches!(result, Err(SettleError::Timeout(_))));

        let sleeps = clock.recorded_sleeps();
        assert!(!sleeps.is_empty());
        for pair in sleeps.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert!(sleeps.iter().all(|s| *s <= Duration::from_secs(2)));
        assert!(sleeps.contains(&Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn times_out_once_deadline_passes() {
        let clock = clock();
        let result = await_settled(clock.as_ref(), Duration::from_millis(200), "certificate 1c1", || async {
            Ok(false)
        })
        .await;
        match result {
            Err(SettleError::Timeout(what)) => assert_eq!(what, "certificate 1c1"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_errors_propagate_as_hard_failures() {
        let clock = clock();
        let result = await_settled(clock.as_ref(), Duration::from_secs(120), "certificate 1c1", || async {
            Err(FleetError::NotFound("1c1".to_string()))
        })
        .await;
        assert!(matches!(result, Err(SettleError::Api(FleetError::NotFound(_)))));
    }

    /// Fleet stub where one balancer's upgrade fails and the others
    /// succeed; used to prove the fan-out is independent per balancer.
    struct FanOutFleet {
        upgraded: Mutex<Vec<String>>,
        failing: String,
    }

    #[async_trait]
    impl FleetApi for FanOutFleet {
        async fn find_certificate_by_name(
            &self,
            _name: &str,
        ) -> Result<Option<RemoteCertificate>, FleetError> {
            Ok(None)
        }

        async fn create_certificate(
            &self,
            _payload: &CertificatePayload,
        ) -> Result<RemoteCertificate, FleetError> {
            unreachable!("not used by this test")
        }

        async fn update_certificate(
            &self,
            _id: &str,
            _payload: &CertificatePayload,
        ) -> Result<RemoteCertificate, FleetError> {
            unreachable!("not used by this test")
        }

        async fn certificate_settled(&self, _id: &str) -> Result<bool, FleetError> {
            Ok(true)
        }

        async fn list_load_balancers_referencing(
            &self,
            cert_id: &str,
        ) -> Result<Vec<LoadBalancer>, FleetError> {
            let lb = |id: &str, name: &str| LoadBalancer {
                id: id.to_string(),
                name: name.to_string(),
                state: "active".to_string(),
                default_certificate_id: Some(cert_id.to_string()),
                ..Default::default()
            };
            Ok(vec![lb("1s1", "web"), lb("1s2", "api"), lb("1s3", "admin")])
        }

        async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer, FleetError> {
            Ok(LoadBalancer {
                id: id.to_string(),
                state: "active".to_string(),
                ..Default::default()
            })
        }

        async fn upgrade_load_balancer(
            &self,
            lb: &LoadBalancer,
        ) -> Result<LoadBalancer, FleetError> {
            if lb.id == self.failing {
                return Err(FleetError::NotFound(lb.id.clone()));
            }
            self.upgraded.lock().unwrap().push(lb.id.clone());
            Ok(lb.clone())
        }

        async fn finish_upgrade(&self, id: &str) -> Result<LoadBalancer, FleetError> {
            Ok(LoadBalancer {
                id: id.to_string(),
                ..Default::default()
            })
        }

        async fn load_balancer_settled(&self, _id: &str) -> Result<bool, FleetError> {
            Ok(true)
        }
    }

    /// Fleet stub whose certificate never leaves its transitioning state,
    /// or whose settle probe errors outright.
    struct StuckFleet {
        poll: Result<bool, ()>,
        finished: Mutex<Vec<String>>,
        upgraded_state: bool,
    }

    impl StuckFleet {
        fn never_settling() -> Self {
            Self {
                poll: Ok(false),
                finished: Mutex::new(Vec::new()),
                upgraded_state: false,
            }
        }

        fn poll_failing() -> Self {
            Self {
                poll: Err(()),
                finished: Mutex::new(Vec::new()),
                upgraded_state: false,
            }
        }

        fn holding_upgraded() -> Self {
            Self {
                poll: Ok(true),
                finished: Mutex::new(Vec::new()),
                upgraded_state: true,
            }
        }
    }

    #[async_trait]
    impl FleetApi for StuckFleet {
        async fn find_certificate_by_name(
            &self,
            _name: &str,
        ) -> Result<Option<RemoteCertificate>, FleetError> {
            Ok(None)
        }

        async fn create_certificate(
            &self,
            payload: &CertificatePayload,
        ) -> Result<RemoteCertificate, FleetError> {
            Ok(RemoteCertificate {
                id: "1c9".to_string(),
                name: payload.name.clone(),
                transitioning: "yes".to_string(),
                ..Default::default()
            })
        }

        async fn update_certificate(
            &self,
            id: &str,
            payload: &CertificatePayload,
        ) -> Result<RemoteCertificate, FleetError> {
            Ok(RemoteCertificate {
                id: id.to_string(),
                name: payload.name.clone(),
                transitioning: "yes".to_string(),
                ..Default::default()
            })
        }

        async fn certificate_settled(&self, id: &str) -> Result<bool, FleetError> {
            self.poll
                .map_err(|()| FleetError::NotFound(id.to_string()))
        }

        async fn list_load_balancers_referencing(
            &self,
            _cert_id: &str,
        ) -> Result<Vec<LoadBalancer>, FleetError> {
            Ok(Vec::new())
        }

        async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer, FleetError> {
            Ok(LoadBalancer {
                id: id.to_string(),
                state: if self.upgraded_state { "upgraded" } else { "active" }.to_string(),
                ..Default::default()
            })
        }

        async fn upgrade_load_balancer(
            &self,
            lb: &LoadBalancer,
        ) -> Result<LoadBalancer, FleetError> {
            Ok(lb.clone())
        }

        async fn finish_upgrade(&self, id: &str) -> Result<LoadBalancer, FleetError> {
            self.finished.lock().unwrap().push(id.to_string());
            Ok(LoadBalancer {
                id: id.to_string(),
                ..Default::default()
            })
        }

        async fn load_balancer_settled(&self, id: &str) -> Result<bool, FleetError> {
            self.poll
                .map_err(|()| FleetError::NotFound(id.to_string()))
        }
    }

    fn payload() -> CertificatePayload {
        CertificatePayload {
            name: "web-tls".to_string(),
            description: "test".to_string(),
            cert: "CERT".to_string(),
            key: "KEY".to_string(),
        }
    }

    #[tokio::test]
    async fn publish_survives_a_settle_timeout() {
        // The mutation was accepted; a slow platform only costs a warning.
        let sync = Synchronizer::new(Arc::new(StuckFleet::never_settling()), clock());
        let created = sync.create_certificate(&payload()).await.unwrap();
        assert_eq!(created.id, "1c9");
        let updated = sync.update_certificate("1c9", &payload()).await.unwrap();
        assert_eq!(updated.id, "1c9");
    }

    #[tokio::test]
    async fn publish_fails_on_a_settle_poll_error() {
        let sync = Synchronizer::new(Arc::new(StuckFleet::poll_failing()), clock());
        let err = sync.create_certificate(&payload()).await.unwrap_err();
        assert!(matches!(err, FleetError::NotFound(_)));
    }

    #[tokio::test]
    async fn upgraded_balancers_get_their_upgrade_finished() {
        let fleet = Arc::new(StuckFleet::holding_upgraded());
        let sync = Synchronizer::new(fleet.clone(), clock());
        let lb = LoadBalancer {
            id: "1s1".to_string(),
            name: "web".to_string(),
            ..Default::default()
        };
        sync.upgrade_and_settle(&lb).await.unwrap();
        assert_eq!(*fleet.finished.lock().unwrap(), vec!["1s1".to_string()]);
    }

    #[tokio::test]
    async fn one_failed_balancer_does_not_block_the_rest() {
        let fleet = Arc::new(FanOutFleet {
            upgraded: Mutex::new(Vec::new()),
            failing: "1s2".to_string(),
        });
        let sync = Synchronizer::new(fleet.clone(), clock());
        sync.sync_load_balancers("1c1").await.unwrap();
        assert_eq!(
            *fleet.upgraded.lock().unwrap(),
            vec!["1s1".to_string(), "1s3".to_string()]
        );
    }
}
