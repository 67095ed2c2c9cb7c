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

//! Fee calculation.
//!
//! Pure charge math for both money directions:
//!
//! - **Contributions** (collection): provider and platform percentages of the
//!   contributed amount, borne by the contributor or absorbed by the jar
//!   creator depending on the jar's fee policy.
//! - **Payouts** (transfer): a single transfer fee split between the provider
//!   and the platform's revenue share.
//!
//! All percentages are fractions of the amount (`1.95` means 1.95%). Charges
//! are rounded to 2 decimal places exactly once, when the breakdown is built;
//! dependent figures (amount paid, credited amount, net amount) are derived
//! from the already-rounded charges so that totals reconcile exactly.

use crate::error::EngineError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Minor-unit precision for persisted charges (GHS pesewas, cents).
pub const CHARGE_PRECISION: u32 = 2;

/// Which side absorbs the platform and provider fees on a contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeePayer {
    /// Fees are deducted from the amount credited to the jar.
    Creator,
    /// Fees are added on top of the amount the contributor pays.
    Contributor,
}

/// Fee percentages, passed explicitly into every calculation.
///
/// Never read from ambient global state: keeping the configuration an
/// explicit argument allows historical transactions to be recalculated
/// with the settings active at their original creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Provider (momo/card) percentage on collections.
    pub provider_fee_percent: Decimal,
    /// Platform percentage on collections.
    pub platform_fee_percent: Decimal,
    /// Total percentage charged on payouts.
    pub transfer_fee_percent: Decimal,
    /// Platform's revenue share of the payout amount; the remainder of the
    /// transfer fee covers provider costs.
    pub platform_transfer_share_percent: Decimal,
}

impl FeeConfig {
    /// Rejects negative percentages and a platform transfer share larger
    /// than the transfer fee itself.
    pub fn validate(&self) -> Result<(), EngineError> {
        let percents = [
            self.provider_fee_percent,
            self.platform_fee_percent,
            self.transfer_fee_percent,
            self.platform_transfer_share_percent,
        ];
        if percents.iter().any(|p| *p < Decimal::ZERO) {
            return Err(EngineError::InvalidAmount);
        }
        if self.platform_transfer_share_percent > self.transfer_fee_percent {
            return Err(EngineError::InvalidAmount);
        }
        Ok(())
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            provider_fee_percent: dec!(1.95),
            platform_fee_percent: dec!(2),
            transfer_fee_percent: dec!(0.5),
            platform_transfer_share_percent: dec!(0.25),
        }
    }
}

/// Itemized fee decomposition attached to a transaction at creation.
///
/// Immutable once attached; the only sanctioned overwrite is the
/// admin-triggered bulk recalculation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargesBreakdown {
    /// Total the contributor hands over (contributions) or the gross amount
    /// debited from jar funds (payouts).
    pub amount_paid_by_contributor: Decimal,
    /// Platform's cut of the charges.
    pub platform_charge: Decimal,
    /// Portion of the charges covering provider (momo/card/transfer) costs.
    pub provider_fee: Decimal,
    /// Net platform revenue. Equals `platform_charge` for contributions.
    pub platform_revenue: Decimal,
}

/// Fee calculation result: the breakdown plus the post-fee amount persisted
/// as the transaction's canonical `amount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeOutcome {
    pub breakdown: ChargesBreakdown,
    /// Amount credited to the jar (contribution) or delivered to the
    /// withdrawal account (payout).
    pub settled_amount: Decimal,
}

fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    (amount * percent / dec!(100)).round_dp(CHARGE_PRECISION)
}

/// Computes the charge breakdown for a contribution.
///
/// With `FeePayer::Contributor` the charges are added on top:
/// `amount_paid_by_contributor = amount + provider + platform` and the jar
/// is credited the full `amount`. With `FeePayer::Creator` the contributor
/// pays exactly `amount` and the jar is credited `amount - provider -
/// platform`.
///
/// # Errors
///
/// [`EngineError::InvalidAmount`] if `amount` is zero or negative.
pub fn contribution_charges(
    amount: Decimal,
    payer: FeePayer,
    config: &FeeConfig,
) -> Result<ChargeOutcome, EngineError> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount);
    }

    let provider_fee = percent_of(amount, config.provider_fee_percent);
    let platform_charge = percent_of(amount, config.platform_fee_percent);

    let (amount_paid, settled_amount) = match payer {
        FeePayer::Contributor => (amount + provider_fee + platform_charge, amount),
        FeePayer::Creator => (amount, amount - provider_fee - platform_charge),
    };

    Ok(ChargeOutcome {
        breakdown: ChargesBreakdown {
            amount_paid_by_contributor: amount_paid,
            platform_charge,
            provider_fee,
            platform_revenue: platform_charge,
        },
        settled_amount,
    })
}

/// Computes the charge breakdown for a payout.
///
/// The transfer fee is a single percentage of the gross amount; the
/// platform's revenue share is carved out of it and the remainder covers
/// the provider. The net amount is derived from the rounded fee, so
/// `net + fee == amount` holds exactly.
///
/// # Errors
///
/// [`EngineError::InvalidAmount`] if `amount` is zero or negative.
pub fn payout_charges(amount: Decimal, config: &FeeConfig) -> Result<ChargeOutcome, EngineError> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount);
    }

    let fee_amount = percent_of(amount, config.transfer_fee_percent);
    let platform_revenue = percent_of(amount, config.platform_transfer_share_percent);
    let provider_fee = fee_amount - platform_revenue;
    let net_amount = amount - fee_amount;

    Ok(ChargeOutcome {
        breakdown: ChargesBreakdown {
            amount_paid_by_contributor: amount,
            platform_charge: platform_revenue,
            provider_fee,
            platform_revenue,
        },
        settled_amount: net_amount,
    })
}
