// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Stored certificate model
//!
//! The locally persisted certificate artifact and its metadata. One
//! instance exists per certificate name; it is created on first issuance
//! and overwritten in place on every renewal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Delimiter used to derive a stable identifier from an ordered domain list.
pub const DOMAIN_SET_DELIMITER: &str = "|";

/// Derive the stored identifier for a configured domain list.
///
/// Compared against [`StoredCertificate::domain_set_id`] to detect that the
/// configured domains no longer match what was last issued.
pub fn domain_set_id(domains: &[String]) -> String {
    domains.join(DOMAIN_SET_DELIMITER)
}

/// A certificate held in the local store.
///
/// `expiry_date` and `serial_number` are always recomputed from
/// `certificate_chain` when the artifact is written; they are never carried
/// over from a prior in-memory value.
#[derive(Debug, Clone)]
pub struct StoredCertificate {
    /// Identifier, also the lookup key on the fleet platform.
    pub name: String,
    /// Ordered list of domain names the certificate covers.
    pub domains: Vec<String>,
    /// Derived identifier for the domain list.
    pub domain_set_id: String,
    /// PEM encoded private key.
    pub private_key: Vec<u8>,
    /// PEM encoded certificate chain.
    pub certificate_chain: Vec<u8>,
    /// Not-after instant parsed from the chain at save time.
    pub expiry_date: DateTime<Utc>,
    /// Decimal serial number parsed from the chain at save time.
    pub serial_number: String,
}

/// Metadata document persisted next to the PEM artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateMetadata {
    pub name: String,
    pub domains: Vec<String>,
    pub domain_set_id: String,
    pub expiry_date: DateTime<Utc>,
    pub serial_number: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// No certificate with this name has ever been stored.
    #[error("no stored certificate named '{0}'")]
    NotFound(String),

    /// Artifacts exist but cannot be read or parsed. Callers treat this as
    /// "no usable local certificate" and re-issue rather than crash.
    #[error("stored certificate '{name}' is unusable: {reason}")]
    Corrupt { name: String, reason: String },

    /// A write failed. Fatal: the process cannot continue without a
    /// persisted copy of a freshly issued certificate.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The certificate chain handed to `save` could not be parsed.
    #[error("certificate chain is not valid PEM/X.509: {0}")]
    InvalidChain(String),
}
