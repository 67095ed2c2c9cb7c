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

//! # Jarpay
//!
//! Settlement engine for a jar contribution/payout platform: fee
//! breakdowns, payment lifecycle, and ledger-backed jar balances.
//!
//! ## Core Components
//!
//! - [`fees`]: pure charge math for contributions and payouts
//! - [`Transaction`]: unified contribution/payout record with its
//!   payment-status state machine
//! - [`Engine`]: orchestrates creation, gateway webhooks, settlement
//!   linkage, and jar balance recounts
//! - [`api`]: axum HTTP surface exposing the inbound contracts
//!
//! ## Example
//!
//! ```
//! use jarpay::{
//!     Engine, FeeConfig, FeePayer, NewContribution, NewJar, PaymentMethod,
//!     WithdrawalAccount,
//! };
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//! let config = FeeConfig::default();
//!
//! let creator = engine.create_user(
//!     "Afia".to_string(),
//!     Some(WithdrawalAccount {
//!         channel: "mtn-gh".to_string(),
//!         account_number: "0200000000".to_string(),
//!     }),
//! );
//! let jar_id = engine
//!     .create_jar(NewJar {
//!         name: "School fees".to_string(),
//!         currency: "GHS".to_string(),
//!         creator,
//!         who_pays_platform_fees: FeePayer::Contributor,
//!         goal_amount: None,
//!         deadline_unix: None,
//!     })
//!     .unwrap();
//!
//! // Cash is collector-recorded and completes immediately.
//! engine
//!     .create_contribution(
//!         NewContribution {
//!             jar_id,
//!             amount: dec!(100),
//!             method: PaymentMethod::Cash,
//!             contributor_name: None,
//!             contributor_phone: Some("+233200000001".to_string()),
//!             collector: None,
//!             via_payment_link: false,
//!         },
//!         &config,
//!     )
//!     .unwrap();
//!
//! let jar = engine.get_jar(&jar_id).unwrap();
//! assert_eq!(jar.total_contributed_amount(), dec!(100));
//! ```
//!
//! ## Concurrency
//!
//! Engine state is shared across request tasks without a global lock; jar
//! balance recounts re-derive the truth from the ledger, so concurrent
//! writes converge rather than drift.

pub mod api;
mod base;
pub mod config;
mod engine;
pub mod error;
pub mod fees;
pub mod gateway;
pub mod jar;
mod ledger;
mod transaction;
mod user;

pub use base::{JarId, TransactionId, UserId};
pub use engine::{Engine, NewContribution, NewJar, NewPayout};
pub use error::EngineError;
pub use fees::{ChargeOutcome, ChargesBreakdown, FeeConfig, FeePayer};
pub use gateway::{WebhookNotification, map_provider_status};
pub use jar::{Actor, Jar, JarStatus, JarUpdate};
pub use ledger::TransactionLedger;
pub use transaction::{
    PaymentMethod, PaymentStatus, StatusOutcome, Transaction, TransactionKind,
};
pub use user::{UserProfile, WithdrawalAccount};
