// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AEGIS CertKeeper core
//!
//! Keeps one TLS certificate valid without operator intervention: obtain it
//! from an ACME certificate authority, persist it locally, publish it into
//! the fleet platform's certificate resource, and upgrade every load
//! balancer that references it, on a recurring schedule ahead of expiry.
//!
//! # Architecture
//!
//! - **domain**: data model, capability traits, configuration
//! - **application**: reconciler, renewal scheduler, resource synchronizer
//! - **infrastructure**: filesystem store, ACME adapter, challenge
//!   providers, fleet platform HTTP client

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
