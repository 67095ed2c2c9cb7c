// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Transaction records and their payment-status state machine.
//!
//! Contributions and payouts share one record shape, discriminated by
//! [`TransactionKind`]. Status follows a small state machine:
//!
//  Pending ──gateway/admin──► Completed (terminal)
//     │
//     └─────gateway/admin──► Failed (terminal)
//!
//! Terminal states absorb any further status report: a webhook retry that
//! arrives after completion is logged and ignored, never re-applied.

use crate::base::{JarId, TransactionId, UserId};
use crate::fees::{ChargeOutcome, ChargesBreakdown};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Money direction of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Inbound: credits a jar.
    Contribution,
    /// Outbound: debits platform-held funds to a withdrawal account.
    Payout,
}

/// How the money moved.
///
/// Cash and bank transfers are collector-recorded and already settled when
/// they reach the platform; mobile money and card settle asynchronously
/// through a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[serde(alias = "momo")]
    MobileMoney,
    Card,
    Cash,
    BankTransfer,
}

impl PaymentMethod {
    /// Whether settlement confirmation arrives out-of-band via webhook.
    pub fn settles_via_gateway(&self) -> bool {
        matches!(self, Self::MobileMoney | Self::Card)
    }

    /// Initial payment status for a freshly created transaction.
    ///
    /// Collector-recorded methods have no external confirmation to wait
    /// for and start out completed.
    pub fn initial_status(&self) -> PaymentStatus {
        if self.settles_via_gateway() {
            PaymentStatus::Pending
        } else {
            PaymentStatus::Completed
        }
    }
}

/// Payment settlement status.
///
/// The legacy provider word `transferred` is accepted as an alias for
/// `completed` when deserializing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    #[serde(alias = "transferred")]
    Completed,
    Failed,
}

impl PaymentStatus {
    /// Completed and failed transactions accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Result of applying a status report to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The transaction moved to a new status.
    Applied,
    /// Duplicate, out-of-order, or transient report; nothing changed.
    Ignored,
}

impl StatusOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// A single ledger entry: one contribution or payout.
///
/// `amount` is the canonical post-fee figure (the amount credited to the
/// jar, or the net amount delivered by a payout). The charges breakdown is
/// computed once at creation; outside the admin repair sweep it never
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub jar_id: JarId,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub charges: ChargesBreakdown,
    /// True once the corresponding payout has completed (contributions),
    /// or always false for payouts themselves.
    pub is_settled: bool,
    /// Originating contribution this payout pays out, if any.
    pub linked_contribution: Option<TransactionId>,
    /// Collector who recorded the transaction, when not self-service.
    pub collector: Option<UserId>,
    pub contributor_name: Option<String>,
    pub contributor_phone: Option<String>,
    pub via_payment_link: bool,
}

impl Transaction {
    /// Builds a contribution from a fee-calculation outcome.
    ///
    /// Initial status follows the payment method: gateway-settled methods
    /// start pending, collector-recorded methods start completed.
    pub fn contribution(
        id: TransactionId,
        jar_id: JarId,
        method: PaymentMethod,
        outcome: ChargeOutcome,
        contributor_name: Option<String>,
        contributor_phone: Option<String>,
        collector: Option<UserId>,
        via_payment_link: bool,
    ) -> Self {
        Self {
            id,
            jar_id,
            kind: TransactionKind::Contribution,
            amount: outcome.settled_amount,
            method,
            status: method.initial_status(),
            charges: outcome.breakdown,
            is_settled: false,
            linked_contribution: None,
            collector,
            contributor_name,
            contributor_phone,
            via_payment_link,
        }
    }

    /// Builds a pending payout from a fee-calculation outcome.
    pub fn payout(
        id: TransactionId,
        jar_id: JarId,
        outcome: ChargeOutcome,
        linked_contribution: Option<TransactionId>,
        collector: Option<UserId>,
    ) -> Self {
        Self {
            id,
            jar_id,
            kind: TransactionKind::Payout,
            amount: outcome.settled_amount,
            method: PaymentMethod::MobileMoney,
            status: PaymentStatus::Pending,
            charges: outcome.breakdown,
            is_settled: false,
            linked_contribution,
            collector,
            contributor_name: None,
            contributor_phone: None,
            via_payment_link: false,
        }
    }

    /// Whether this entry counts toward its jar's cached total.
    pub fn counts_toward_balance(&self) -> bool {
        self.kind == TransactionKind::Contribution && self.status == PaymentStatus::Completed
    }

    /// Applies a status report from a gateway webhook or admin override.
    ///
    /// | Current | Report | Outcome |
    /// |---------|-----------|---------|
    /// | Pending | Completed | Applied |
    /// | Pending | Failed    | Applied |
    /// | Pending | Pending   | Ignored (still in flight) |
    /// | terminal | anything | Ignored, logged |
    ///
    /// The terminal guard is the only defense against duplicate or
    /// out-of-order webhook delivery, so it must never error: retries are
    /// absorbed silently from the gateway's point of view.
    pub fn apply_status(&mut self, report: PaymentStatus) -> StatusOutcome {
        if self.status.is_terminal() {
            if report != self.status {
                warn!(
                    transaction = %self.id,
                    current = ?self.status,
                    report = ?report,
                    "status report for terminal transaction ignored"
                );
            }
            return StatusOutcome::Ignored;
        }
        if report == PaymentStatus::Pending {
            return StatusOutcome::Ignored;
        }
        self.status = report;
        StatusOutcome::Applied
    }
}
