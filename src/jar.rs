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

//! Jar management.
//!
//! A jar is a fundraising container owned by one creator. Its cached
//! balance figures are maintained by the engine's recount (never
//! incremented in place), and its lifecycle is guarded here:
//!
//  Open ──freeze──► Frozen ──unfreeze──► Open
//   │
//   ├──seal──► Sealed (no longer accepting contributions)
//   └──break──► Broken (paid out and closed)
//!
//! A jar holding completed contributions cannot be deleted, and a frozen
//! jar cannot be deleted regardless of balance.

use crate::base::{JarId, UserId};
use crate::error::EngineError;
use crate::fees::{CHARGE_PRECISION, FeePayer};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;

/// Jar lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JarStatus {
    /// Accepting contributions.
    Open,
    /// Suspended by an admin; rejects contributions and deletion.
    Frozen,
    /// Paid out and closed.
    Broken,
    /// Closed to new contributions by the creator.
    Sealed,
}

/// The user performing a jar mutation, for permission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub admin: bool,
}

impl Actor {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            admin: false,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            admin: true,
        }
    }
}

/// Creator- or admin-editable jar fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JarUpdate {
    pub name: Option<String>,
    pub goal_amount: Option<Decimal>,
    pub deadline_unix: Option<i64>,
}

#[derive(Debug)]
struct JarData {
    name: String,
    currency: String,
    goal_amount: Option<Decimal>,
    status: JarStatus,
    /// Cached sum of completed contribution amounts, maintained by recount.
    total_contributed_amount: Decimal,
    /// Cached count of completed contributions, maintained by recount.
    completed_contribution_count: u64,
    freeze_reason: Option<String>,
    deadline_unix: Option<i64>,
}

impl JarData {
    fn assert_invariants(&self) {
        debug_assert!(
            self.total_contributed_amount >= Decimal::ZERO,
            "Invariant violated: cached jar total went negative: {}",
            self.total_contributed_amount
        );
    }
}

/// A fundraising jar.
///
/// Mutable state sits behind a mutex so concurrent request tasks can share
/// one jar; the creator, fee policy, and identifier are fixed at creation.
#[derive(Debug)]
pub struct Jar {
    id: JarId,
    creator: UserId,
    who_pays_platform_fees: FeePayer,
    inner: Mutex<JarData>,
}

impl Jar {
    pub fn new(
        id: JarId,
        name: String,
        currency: String,
        creator: UserId,
        who_pays_platform_fees: FeePayer,
        goal_amount: Option<Decimal>,
        deadline_unix: Option<i64>,
    ) -> Self {
        Self {
            id,
            creator,
            who_pays_platform_fees,
            inner: Mutex::new(JarData {
                name,
                currency,
                goal_amount,
                status: JarStatus::Open,
                total_contributed_amount: Decimal::ZERO,
                completed_contribution_count: 0,
                freeze_reason: None,
                deadline_unix,
            }),
        }
    }

    pub fn id(&self) -> JarId {
        self.id
    }

    pub fn creator(&self) -> UserId {
        self.creator
    }

    pub fn fee_payer(&self) -> FeePayer {
        self.who_pays_platform_fees
    }

    pub fn status(&self) -> JarStatus {
        self.inner.lock().status
    }

    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    pub fn currency(&self) -> String {
        self.inner.lock().currency.clone()
    }

    pub fn goal_amount(&self) -> Option<Decimal> {
        self.inner.lock().goal_amount
    }

    pub fn freeze_reason(&self) -> Option<String> {
        self.inner.lock().freeze_reason.clone()
    }

    /// Cached sum of completed contribution amounts.
    ///
    /// A point-in-time snapshot published by the last recount; may lag the
    /// ledger briefly under concurrent writes.
    pub fn total_contributed_amount(&self) -> Decimal {
        self.inner.lock().total_contributed_amount
    }

    pub fn completed_contribution_count(&self) -> u64 {
        self.inner.lock().completed_contribution_count
    }

    /// Overwrites the cached balance figures. Recount only.
    pub(crate) fn publish_totals(&self, total: Decimal, count: u64) {
        let mut data = self.inner.lock();
        data.total_contributed_amount = total;
        data.completed_contribution_count = count;
        data.assert_invariants();
    }

    /// Gate for new contributions: only open jars accept money.
    pub fn ensure_accepts_contributions(&self) -> Result<(), EngineError> {
        match self.status() {
            JarStatus::Open => Ok(()),
            _ => Err(EngineError::JarNotOpen),
        }
    }

    fn ensure_can_modify(&self, actor: Actor) -> Result<(), EngineError> {
        if actor.admin || actor.user_id == self.creator {
            Ok(())
        } else {
            Err(EngineError::Permission)
        }
    }

    /// Applies creator-editable fields.
    ///
    /// # Errors
    ///
    /// [`EngineError::Permission`] unless the actor is the creator or an
    /// admin.
    pub fn update(&self, actor: Actor, update: JarUpdate) -> Result<(), EngineError> {
        self.ensure_can_modify(actor)?;
        let mut data = self.inner.lock();
        if let Some(name) = update.name {
            data.name = name;
        }
        if let Some(goal) = update.goal_amount {
            data.goal_amount = Some(goal);
        }
        if let Some(deadline) = update.deadline_unix {
            data.deadline_unix = Some(deadline);
        }
        Ok(())
    }

    /// Admin freeze; suspends contributions and blocks deletion.
    pub fn freeze(&self, actor: Actor, reason: String) -> Result<(), EngineError> {
        if !actor.admin {
            return Err(EngineError::Permission);
        }
        let mut data = self.inner.lock();
        data.status = JarStatus::Frozen;
        data.freeze_reason = Some(reason);
        Ok(())
    }

    /// Admin unfreeze; returns the jar to open.
    pub fn unfreeze(&self, actor: Actor) -> Result<(), EngineError> {
        if !actor.admin {
            return Err(EngineError::Permission);
        }
        let mut data = self.inner.lock();
        data.status = JarStatus::Open;
        data.freeze_reason = None;
        Ok(())
    }

    /// Creator closes the jar to further contributions.
    pub fn seal(&self, actor: Actor) -> Result<(), EngineError> {
        self.ensure_can_modify(actor)?;
        self.inner.lock().status = JarStatus::Sealed;
        Ok(())
    }

    /// Creator breaks the jar open after paying it out; closed for good.
    pub fn break_open(&self, actor: Actor) -> Result<(), EngineError> {
        self.ensure_can_modify(actor)?;
        self.inner.lock().status = JarStatus::Broken;
        Ok(())
    }

    /// Deletion guard.
    ///
    /// Frozen jars are undeletable regardless of balance; any jar whose
    /// completed contributions sum above zero is undeletable while it
    /// holds funds. The caller passes the ledger-derived sum, not the
    /// cache, so a stale cache cannot let funds slip away.
    pub fn ensure_deletable(&self, ledger_total: Decimal) -> Result<(), EngineError> {
        if self.status() == JarStatus::Frozen {
            return Err(EngineError::JarFrozen);
        }
        if ledger_total > Decimal::ZERO {
            return Err(EngineError::JarNotEmpty);
        }
        Ok(())
    }
}

impl Serialize for Jar {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Jar", 11)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("name", &data.name)?;
        state.serialize_field("currency", &data.currency)?;
        state.serialize_field("status", &data.status)?;
        state.serialize_field("creator", &self.creator)?;
        state.serialize_field("whoPaysPlatformFees", &self.who_pays_platform_fees)?;
        state.serialize_field("goalAmount", &data.goal_amount)?;
        state.serialize_field(
            "totalContributedAmount",
            &data.total_contributed_amount.round_dp(CHARGE_PRECISION),
        )?;
        state.serialize_field(
            "completedContributionCount",
            &data.completed_contribution_count,
        )?;
        state.serialize_field("freezeReason", &data.freeze_reason)?;
        state.serialize_field("deadlineUnix", &data.deadline_unix)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn jar() -> Jar {
        Jar::new(
            JarId(1),
            "Wedding fund".to_string(),
            "GHS".to_string(),
            UserId(10),
            FeePayer::Contributor,
            Some(dec!(5000)),
            None,
        )
    }

    #[test]
    fn new_jar_is_open_and_empty() {
        let jar = jar();
        assert_eq!(jar.status(), JarStatus::Open);
        assert_eq!(jar.total_contributed_amount(), Decimal::ZERO);
        assert_eq!(jar.completed_contribution_count(), 0);
    }

    #[test]
    fn creator_can_update() {
        let jar = jar();
        jar.update(
            Actor::user(UserId(10)),
            JarUpdate {
                name: Some("Honeymoon fund".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(jar.name(), "Honeymoon fund");
    }

    #[test]
    fn admin_can_update() {
        let jar = jar();
        let result = jar.update(
            Actor::admin(UserId(99)),
            JarUpdate {
                goal_amount: Some(dec!(8000)),
                ..Default::default()
            },
        );
        assert!(result.is_ok());
        assert_eq!(jar.goal_amount(), Some(dec!(8000)));
    }

    #[test]
    fn stranger_cannot_update() {
        let jar = jar();
        let result = jar.update(Actor::user(UserId(11)), JarUpdate::default());
        assert_eq!(result, Err(EngineError::Permission));
    }

    #[test]
    fn only_admin_can_freeze() {
        let jar = jar();
        assert_eq!(
            jar.freeze(Actor::user(UserId(10)), "fraud review".to_string()),
            Err(EngineError::Permission)
        );

        jar.freeze(Actor::admin(UserId(99)), "fraud review".to_string())
            .unwrap();
        assert_eq!(jar.status(), JarStatus::Frozen);
        assert_eq!(jar.freeze_reason(), Some("fraud review".to_string()));
    }

    #[test]
    fn unfreeze_restores_open() {
        let jar = jar();
        jar.freeze(Actor::admin(UserId(99)), "review".to_string())
            .unwrap();
        jar.unfreeze(Actor::admin(UserId(99))).unwrap();
        assert_eq!(jar.status(), JarStatus::Open);
        assert_eq!(jar.freeze_reason(), None);
    }

    #[test]
    fn frozen_jar_rejects_contributions() {
        let jar = jar();
        jar.freeze(Actor::admin(UserId(99)), "review".to_string())
            .unwrap();
        assert_eq!(
            jar.ensure_accepts_contributions(),
            Err(EngineError::JarNotOpen)
        );
    }

    #[test]
    fn sealed_jar_rejects_contributions() {
        let jar = jar();
        jar.seal(Actor::user(UserId(10))).unwrap();
        assert_eq!(
            jar.ensure_accepts_contributions(),
            Err(EngineError::JarNotOpen)
        );
    }

    #[test]
    fn broken_jar_rejects_contributions() {
        let jar = jar();
        jar.break_open(Actor::user(UserId(10))).unwrap();
        assert_eq!(jar.status(), JarStatus::Broken);
        assert_eq!(
            jar.ensure_accepts_contributions(),
            Err(EngineError::JarNotOpen)
        );
    }

    #[test]
    fn frozen_jar_undeletable_even_when_empty() {
        let jar = jar();
        jar.freeze(Actor::admin(UserId(99)), "review".to_string())
            .unwrap();
        assert_eq!(
            jar.ensure_deletable(Decimal::ZERO),
            Err(EngineError::JarFrozen)
        );
    }

    #[test]
    fn funded_jar_undeletable() {
        let jar = jar();
        assert_eq!(
            jar.ensure_deletable(dec!(120)),
            Err(EngineError::JarNotEmpty)
        );
    }

    #[test]
    fn empty_open_jar_deletable() {
        let jar = jar();
        assert!(jar.ensure_deletable(Decimal::ZERO).is_ok());
    }

    #[test]
    fn serializes_rounded_total() {
        let jar = jar();
        jar.publish_totals(dec!(123.456), 3);

        let json = serde_json::to_value(&jar).unwrap();
        assert_eq!(json["totalContributedAmount"].as_str().unwrap(), "123.46");
        assert_eq!(json["completedContributionCount"], 3);
        assert_eq!(json["status"], "open");
    }
}
