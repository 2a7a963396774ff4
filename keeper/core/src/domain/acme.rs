// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Certificate authority capability
//!
//! Domain interface for the ACME collaborator. The protocol itself
//! (account registration, challenge negotiation, order finalization) lives
//! behind this trait in `infrastructure/acme`; the reconciler and the
//! renewal step only see issue/renew.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

use super::challenge::ChallengeError;

/// Key and chain returned by a successful issuance or renewal. Both PEM.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub private_key: Vec<u8>,
    pub certificate_chain: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("acme account setup failed: {0}")]
    Account(String),

    #[error("acme order failed: {0}")]
    Order(String),

    #[error(transparent)]
    Challenge(#[from] ChallengeError),
}

/// Issuance failure, reported per domain where the protocol allows it.
#[derive(Debug, Error)]
pub enum IssueError {
    /// One entry per domain whose authorization failed. Ordered map so the
    /// failure log is deterministic.
    #[error("{} domain(s) failed validation", .failures.len())]
    PerDomain { failures: BTreeMap<String, String> },

    #[error(transparent)]
    Other(#[from] AcmeError),
}

/// The ACME collaborator. One implementation per running instance,
/// configured with the instance's single domain set.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Obtain a brand new certificate covering `domains`.
    async fn issue(&self, name: &str, domains: &[String]) -> Result<IssuedCertificate, IssueError>;

    /// Renew the certificate previously issued under `name`. ACME v2 has no
    /// distinct renewal exchange; implementations run a fresh order for the
    /// configured domain set.
    async fn renew(&self, name: &str) -> Result<IssuedCertificate, AcmeError>;
}
