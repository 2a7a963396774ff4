// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Filesystem certificate store
//!
//! Persists one certificate per name as three co-located artifacts under
//! `<root>/certs/<name>/`: the full chain, the private key, and a JSON
//! metadata document. Everything is written owner-only; the private key
//! never leaves this directory.
//!
//! Read failures are recoverable: a caller that cannot load a certificate
//! issues a new one. Write failures are not.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::certificate::{
    domain_set_id, CertificateMetadata, StoreError, StoredCertificate,
};

use super::pem;

const CHAIN_FILE: &str = "fullchain.pem";
const KEY_FILE: &str = "privkey.pem";
const METADATA_FILE: &str = "metadata.json";

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

pub struct CertificateStore {
    root: PathBuf,
}

impl CertificateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Whether a metadata file for `name` is present.
    pub fn exists(&self, name: &str) -> bool {
        self.cert_dir(name).join(METADATA_FILE).is_file()
    }

    /// Load the stored certificate for `name`.
    ///
    /// Any unreadable artifact or unparseable metadata is reported as
    /// [`StoreError::Corrupt`]; callers recover by re-issuing.
    pub fn load(&self, name: &str) -> Result<StoredCertificate, StoreError> {
        let dir = self.cert_dir(name);
        if !dir.join(METADATA_FILE).is_file() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        debug!(name = %name, path = %dir.display(), "loading stored certificate");

        let metadata_bytes = read_artifact(&dir.join(METADATA_FILE), name)?;
        let metadata: CertificateMetadata =
            serde_json::from_slice(&metadata_bytes).map_err(|err| StoreError::Corrupt {
                name: name.to_string(),
                reason: format!("metadata is not valid JSON: {err}"),
            })?;
        let certificate_chain = read_artifact(&dir.join(CHAIN_FILE), name)?;
        let private_key = read_artifact(&dir.join(KEY_FILE), name)?;

        Ok(StoredCertificate {
            name: metadata.name,
            domains: metadata.domains,
            domain_set_id: metadata.domain_set_id,
            private_key,
            certificate_chain,
            expiry_date: metadata.expiry_date,
            serial_number: metadata.serial_number,
        })
    }

    /// Persist a freshly issued certificate, overwriting any previous one.
    ///
    /// Expiry date, serial number and the domain set identifier are
    /// recomputed from the inputs here; prior in-memory values are never
    /// trusted.
    pub fn save(
        &self,
        name: &str,
        domains: &[String],
        private_key: &[u8],
        certificate_chain: &[u8],
    ) -> Result<StoredCertificate, StoreError> {
        let expiry_date = pem::chain_expiry(certificate_chain)
            .map_err(|err| StoreError::InvalidChain(err.to_string()))?;
        let serial_number = pem::chain_serial(certificate_chain)
            .map_err(|err| StoreError::InvalidChain(err.to_string()))?;

        let dir = self.cert_dir(name);
        create_private_dir(&dir)?;
        debug!(name = %name, path = %dir.display(), "saving certificate");

        let metadata = CertificateMetadata {
            name: name.to_string(),
            domains: domains.to_vec(),
            domain_set_id: domain_set_id(domains),
            expiry_date,
            serial_number: serial_number.clone(),
        };
        let metadata_bytes =
            serde_json::to_vec_pretty(&metadata).map_err(|err| StoreError::Corrupt {
                name: name.to_string(),
                reason: format!("metadata serialization failed: {err}"),
            })?;

        write_private_file(&dir.join(CHAIN_FILE), certificate_chain)?;
        write_private_file(&dir.join(KEY_FILE), private_key)?;
        write_private_file(&dir.join(METADATA_FILE), &metadata_bytes)?;

        Ok(StoredCertificate {
            name: metadata.name,
            domains: metadata.domains,
            domain_set_id: metadata.domain_set_id,
            private_key: private_key.to_vec(),
            certificate_chain: certificate_chain.to_vec(),
            expiry_date,
            serial_number,
        })
    }

    fn cert_dir(&self, name: &str) -> PathBuf {
        self.root.join("certs").join(safe_file_name(name))
    }
}

fn read_artifact(path: &Path, name: &str) -> Result<Vec<u8>, StoreError> {
    fs::read(path).map_err(|err| StoreError::Corrupt {
        name: name.to_string(),
        reason: format!("cannot read {}: {err}", path.display()),
    })
}

fn create_private_dir(dir: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(dir).map_err(|err| StoreError::Write {
        path: dir.to_path_buf(),
        source: err,
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(DIR_MODE)).map_err(|err| {
            StoreError::Write {
                path: dir.to_path_buf(),
                source: err,
            }
        })?;
    }
    Ok(())
}

fn write_private_file(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    fs::write(path, contents).map_err(|err| StoreError::Write {
        path: path.to_path_buf(),
        source: err,
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE)).map_err(|err| {
            StoreError::Write {
                path: path.to_path_buf(),
                source: err,
            }
        })?;
    }
    Ok(())
}

/// Certificate names become directory names: separators collapse to
/// dashes, anything outside alphanumerics, dash, underscore and dot is
/// dropped.
fn safe_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;
    for c in name.chars() {
        let mapped = match c {
            ' ' | '/' | '\\' | '&' | '=' | '+' | ':' => Some('-'),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' => Some(c),
            _ => None,
        };
        match mapped {
            Some('-') => {
                if !last_dash {
                    out.push('-');
                }
                last_dash = true;
            }
            Some(c) => {
                out.push(c);
                last_dash = false;
            }
            None => {}
        }
    }
    out
}
