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

//! Payment-gateway webhook interpretation.
//!
//! Providers report settlement with free-form status strings. Mapping is
//! deliberately conservative: only known success words complete a
//! transaction, known terminal failure words fail it, and anything
//! unrecognized leaves the transaction pending for a later, clearer
//! report. A webhook must never complete a payment by accident.

use crate::base::TransactionId;
use crate::error::EngineError;
use crate::transaction::PaymentStatus;
use serde_json::Value;

/// Provider words that settle a payment.
const SUCCESS_STATUSES: &[&str] = &["success", "successful", "completed", "paid", "transferred"];

/// Provider words that terminally fail a payment. Ambiguous terminal
/// signals (cancelled, expired, error) land here rather than succeeding.
const FAILURE_STATUSES: &[&str] = &[
    "failed",
    "declined",
    "reversed",
    "abandoned",
    "cancelled",
    "expired",
    "error",
];

/// Maps a raw provider status string to a payment status.
///
/// Unrecognized strings map to [`PaymentStatus::Pending`], i.e. no state
/// change; the safer side for transient signals. Matching is
/// case-insensitive.
pub fn map_provider_status(raw: &str) -> PaymentStatus {
    let status = raw.trim().to_ascii_lowercase();
    if SUCCESS_STATUSES.contains(&status.as_str()) {
        PaymentStatus::Completed
    } else if FAILURE_STATUSES.contains(&status.as_str()) {
        PaymentStatus::Failed
    } else {
        PaymentStatus::Pending
    }
}

/// The slice of a provider webhook payload the engine acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotification {
    pub reference: TransactionId,
    pub status: PaymentStatus,
    /// Raw provider word, kept for logging.
    pub provider_status: String,
}

impl WebhookNotification {
    /// Extracts the transaction reference and status from an opaque
    /// provider payload.
    ///
    /// Providers disagree on field names; both `reference` and
    /// `transaction_id`/`transactionId` are accepted, at the top level or
    /// under a `data` envelope (the Paystack shape).
    ///
    /// # Errors
    ///
    /// [`EngineError::Gateway`] when the reference or status field is
    /// missing or unusable. This is the only webhook condition that
    /// warrants a non-2xx response.
    pub fn from_payload(payload: &Value) -> Result<Self, EngineError> {
        let body = payload.get("data").unwrap_or(payload);

        let reference = ["reference", "transaction_id", "transactionId"]
            .iter()
            .find_map(|key| body.get(key))
            .and_then(value_as_u64)
            .ok_or_else(|| EngineError::Gateway("missing transaction reference".to_string()))?;

        let provider_status = body
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Gateway("missing status field".to_string()))?
            .to_string();

        Ok(Self {
            reference: TransactionId(reference),
            status: map_provider_status(&provider_status),
            provider_status,
        })
    }
}

/// Providers send references as JSON numbers or numeric strings.
fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
