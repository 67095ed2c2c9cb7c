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

//! Error types for contribution and payout processing.

use thiserror::Error;

/// Settlement engine errors.
///
/// Validation and permission errors abort the triggering write entirely;
/// no partial transaction is persisted. [`EngineError::Aggregation`] is
/// internal and never reaches a user-facing response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Amount is zero, negative, or otherwise unusable for fee math
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Jar creator has no withdrawal account on file
    #[error("jar creator has no withdrawal account configured")]
    AccountNotConfigured,

    /// Actor is neither the jar creator nor an admin
    #[error("not permitted to modify this jar")]
    Permission,

    /// Referenced jar does not exist
    #[error("jar not found")]
    JarNotFound,

    /// Referenced transaction does not exist
    #[error("transaction not found")]
    TransactionNotFound,

    /// Referenced user does not exist
    #[error("user not found")]
    UserNotFound,

    /// Jar is frozen, broken, or sealed and does not accept money
    #[error("jar is not open for contributions")]
    JarNotOpen,

    /// Frozen jars cannot be deleted regardless of balance
    #[error("jar is frozen")]
    JarFrozen,

    /// Jars holding completed contributions cannot be deleted
    #[error("jar still holds contributed funds")]
    JarNotEmpty,

    /// Payout exceeds the jar's completed-contribution balance
    #[error("payout exceeds jar balance")]
    InsufficientBalance,

    /// Duplicate transaction ID
    #[error("duplicate transaction ID")]
    DuplicateTransaction,

    /// Opaque upstream gateway failure; caller retries or surfaces it
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Internal aggregation failure; logged and swallowed by the engine
    #[error("aggregation error: {0}")]
    Aggregation(String),
}
