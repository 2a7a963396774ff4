// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod manager;
pub mod reconciler;
pub mod scheduler;
pub mod synchronizer;

pub use manager::{CertificateManager, FatalError};
pub use reconciler::{Convergence, ReconcileError, Reconciler};
pub use scheduler::{next_renewal_instant, RenewError, RenewalScheduler, Renewer};
pub use synchronizer::{await_settled, SettleError, Synchronizer};
