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

//! Settlement engine.
//!
//! The [`Engine`] owns the jar registry, the user directory, and the
//! transaction ledger, and wires the three core pieces together:
//!
//! - **Creation**: validates the request, runs the fee calculator, and
//!   persists the transaction with its charges breakdown, or nothing at
//!   all. A rejected write leaves no partial state behind.
//! - **Lifecycle**: routes gateway webhooks and admin overrides through
//!   the transaction state machine, with terminal states absorbing
//!   duplicate and out-of-order delivery.
//! - **Aggregation**: after any write that changes a jar's set of
//!   completed contributions, re-derives the jar's cached total from the
//!   ledger. Recount failures are logged and swallowed; they never fail
//!   the triggering write.
//!
//! # Consistency
//!
//! Recounts are not serialized against concurrent writes to the same jar.
//! Two overlapping recounts can publish slightly different snapshots; each
//! independently re-derives the true sum, so the cache converges. The
//! payout→contribution settlement link is at-least-once: the payout status
//! commits first, and the linked contribution is settled afterwards, with
//! failures queued for retry on subsequent engine operations.

use crate::base::{JarId, TransactionId, UserId};
use crate::error::EngineError;
use crate::fees::{FeeConfig, FeePayer, contribution_charges, payout_charges};
use crate::jar::{Actor, Jar, JarUpdate};
use crate::ledger::TransactionLedger;
use crate::transaction::{
    PaymentMethod, PaymentStatus, StatusOutcome, Transaction, TransactionKind,
};
use crate::user::{UserProfile, WithdrawalAccount};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::{info, warn};

/// Request to record a contribution.
#[derive(Debug, Clone)]
pub struct NewContribution {
    pub jar_id: JarId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub contributor_name: Option<String>,
    pub contributor_phone: Option<String>,
    /// Collector recording the contribution on someone's behalf.
    pub collector: Option<UserId>,
    pub via_payment_link: bool,
}

/// Request to initiate a payout.
#[derive(Debug, Clone)]
pub struct NewPayout {
    pub jar_id: JarId,
    pub amount: Decimal,
    pub linked_contribution: Option<TransactionId>,
    pub collector: Option<UserId>,
}

/// Parameters for creating a jar.
#[derive(Debug, Clone)]
pub struct NewJar {
    pub name: String,
    pub currency: String,
    pub creator: UserId,
    pub who_pays_platform_fees: FeePayer,
    pub goal_amount: Option<Decimal>,
    pub deadline_unix: Option<i64>,
}

/// Central settlement engine managing jars, users, and the ledger.
pub struct Engine {
    jars: DashMap<JarId, Jar>,
    users: DashMap<UserId, UserProfile>,
    ledger: TransactionLedger,
    /// Completed payouts whose linked contribution still needs settling.
    pending_settlements: SegQueue<TransactionId>,
    next_jar_id: AtomicU32,
    next_user_id: AtomicU32,
    next_transaction_id: AtomicU64,
}

impl Engine {
    /// Creates an engine with no jars, users, or transactions.
    pub fn new() -> Self {
        Self {
            jars: DashMap::new(),
            users: DashMap::new(),
            ledger: TransactionLedger::new(),
            pending_settlements: SegQueue::new(),
            next_jar_id: AtomicU32::new(1),
            next_user_id: AtomicU32::new(1),
            next_transaction_id: AtomicU64::new(1),
        }
    }

    // === Users ===

    /// Registers a user and returns the assigned ID.
    pub fn create_user(&self, name: String, withdrawal_account: Option<WithdrawalAccount>) -> UserId {
        let id = UserId(self.next_user_id.fetch_add(1, Ordering::Relaxed));
        self.users.insert(
            id,
            UserProfile {
                id,
                name,
                withdrawal_account,
            },
        );
        id
    }

    /// Sets or replaces a user's withdrawal account.
    pub fn set_withdrawal_account(
        &self,
        user_id: UserId,
        account: WithdrawalAccount,
    ) -> Result<(), EngineError> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or(EngineError::UserNotFound)?;
        user.withdrawal_account = Some(account);
        Ok(())
    }

    fn user_has_withdrawal_account(&self, user_id: UserId) -> bool {
        self.users
            .get(&user_id)
            .is_some_and(|user| user.withdrawal_account.is_some())
    }

    // === Jars ===

    /// Creates a jar for an existing user.
    ///
    /// # Errors
    ///
    /// [`EngineError::UserNotFound`] if the creator is not registered.
    pub fn create_jar(&self, new_jar: NewJar) -> Result<JarId, EngineError> {
        if !self.users.contains_key(&new_jar.creator) {
            return Err(EngineError::UserNotFound);
        }
        let id = JarId(self.next_jar_id.fetch_add(1, Ordering::Relaxed));
        self.jars.insert(
            id,
            Jar::new(
                id,
                new_jar.name,
                new_jar.currency,
                new_jar.creator,
                new_jar.who_pays_platform_fees,
                new_jar.goal_amount,
                new_jar.deadline_unix,
            ),
        );
        info!(jar = %id, creator = %new_jar.creator, "jar created");
        Ok(id)
    }

    /// Retrieves a jar by ID.
    pub fn get_jar(&self, jar_id: &JarId) -> Option<dashmap::mapref::one::Ref<'_, JarId, Jar>> {
        self.jars.get(jar_id)
    }

    /// Returns an iterator over all jars.
    pub fn jars(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, JarId, Jar>> {
        self.jars.iter()
    }

    /// Applies creator-editable jar fields, permission-gated.
    pub fn update_jar(
        &self,
        jar_id: JarId,
        actor: Actor,
        update: JarUpdate,
    ) -> Result<(), EngineError> {
        let jar = self.jars.get(&jar_id).ok_or(EngineError::JarNotFound)?;
        jar.update(actor, update)
    }

    /// Admin freeze with a reason.
    pub fn freeze_jar(&self, jar_id: JarId, actor: Actor, reason: String) -> Result<(), EngineError> {
        let jar = self.jars.get(&jar_id).ok_or(EngineError::JarNotFound)?;
        jar.freeze(actor, reason)
    }

    /// Admin unfreeze.
    pub fn unfreeze_jar(&self, jar_id: JarId, actor: Actor) -> Result<(), EngineError> {
        let jar = self.jars.get(&jar_id).ok_or(EngineError::JarNotFound)?;
        jar.unfreeze(actor)
    }

    /// Creator/admin closes the jar to further contributions.
    pub fn seal_jar(&self, jar_id: JarId, actor: Actor) -> Result<(), EngineError> {
        let jar = self.jars.get(&jar_id).ok_or(EngineError::JarNotFound)?;
        jar.seal(actor)
    }

    /// Creator/admin breaks the jar open once its funds are paid out.
    pub fn break_jar(&self, jar_id: JarId, actor: Actor) -> Result<(), EngineError> {
        let jar = self.jars.get(&jar_id).ok_or(EngineError::JarNotFound)?;
        jar.break_open(actor)
    }

    /// Deletes a jar.
    ///
    /// The guard reads the ledger, not the cached total, so a stale cache
    /// cannot let a funded jar disappear. Ledger rows for the jar are kept;
    /// transactions are never deleted.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Permission`] unless the actor is the creator or an admin.
    /// - [`EngineError::JarFrozen`] for frozen jars, regardless of balance.
    /// - [`EngineError::JarNotEmpty`] while completed contributions sum above zero.
    pub fn delete_jar(&self, jar_id: JarId, actor: Actor) -> Result<(), EngineError> {
        {
            let jar = self.jars.get(&jar_id).ok_or(EngineError::JarNotFound)?;
            if !actor.admin && actor.user_id != jar.creator() {
                return Err(EngineError::Permission);
            }
            let (ledger_total, _) = self.ledger.completed_contribution_totals(jar_id);
            jar.ensure_deletable(ledger_total)?;
        }
        self.jars.remove(&jar_id);
        info!(jar = %jar_id, "jar deleted");
        Ok(())
    }

    // === Transactions ===

    /// Records a contribution and returns the persisted transaction.
    ///
    /// The charges breakdown is computed here, once, and is immutable
    /// afterwards. Gateway-settled methods (momo, card) start pending and
    /// wait for a webhook; collector-recorded cash and bank transfers are
    /// completed immediately and credit the jar in the same call.
    ///
    /// # Errors
    ///
    /// - [`EngineError::JarNotFound`] for an unknown jar.
    /// - [`EngineError::JarNotOpen`] when the jar is frozen, broken, or sealed.
    /// - [`EngineError::AccountNotConfigured`] for a mobile-money
    ///   contribution when the jar creator has no withdrawal destination:
    ///   money must not be collected before it can be paid out.
    /// - [`EngineError::InvalidAmount`] from the fee calculator.
    pub fn create_contribution(
        &self,
        request: NewContribution,
        config: &FeeConfig,
    ) -> Result<Transaction, EngineError> {
        let (fee_payer, transaction) = {
            let jar = self
                .jars
                .get(&request.jar_id)
                .ok_or(EngineError::JarNotFound)?;
            jar.ensure_accepts_contributions()?;

            if request.method == PaymentMethod::MobileMoney
                && !self.user_has_withdrawal_account(jar.creator())
            {
                return Err(EngineError::AccountNotConfigured);
            }

            let outcome = contribution_charges(request.amount, jar.fee_payer(), config)?;
            let id = TransactionId(self.next_transaction_id.fetch_add(1, Ordering::Relaxed));
            let transaction = Transaction::contribution(
                id,
                request.jar_id,
                request.method,
                outcome,
                request.contributor_name,
                request.contributor_phone,
                request.collector,
                request.via_payment_link,
            );
            (jar.fee_payer(), transaction)
        };

        self.ledger.insert(transaction.clone())?;
        info!(
            transaction = %transaction.id,
            jar = %transaction.jar_id,
            amount = %transaction.amount,
            method = ?transaction.method,
            status = ?transaction.status,
            payer = ?fee_payer,
            "contribution recorded"
        );

        if transaction.counts_toward_balance() {
            self.refresh_jar_totals(transaction.jar_id);
        }
        Ok(transaction)
    }

    /// Initiates a payout of jar funds to the creator's withdrawal account.
    ///
    /// The payout starts pending; the gateway webhook settles it. When a
    /// linked originating contribution is given it must exist and belong
    /// to the same jar.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AccountNotConfigured`] when no withdrawal account exists.
    /// - [`EngineError::InsufficientBalance`] when the amount exceeds the
    ///   jar's completed contributions net of payouts already in flight
    ///   (both read from the ledger, not the cache).
    /// - [`EngineError::TransactionNotFound`] for a bad contribution link.
    pub fn create_payout(
        &self,
        request: NewPayout,
        config: &FeeConfig,
    ) -> Result<Transaction, EngineError> {
        let transaction = {
            let jar = self
                .jars
                .get(&request.jar_id)
                .ok_or(EngineError::JarNotFound)?;

            if !self.user_has_withdrawal_account(jar.creator()) {
                return Err(EngineError::AccountNotConfigured);
            }

            let (contributed, _) = self.ledger.completed_contribution_totals(request.jar_id);
            let outstanding = self.ledger.outstanding_payout_total(request.jar_id);
            if request.amount > contributed - outstanding {
                return Err(EngineError::InsufficientBalance);
            }

            if let Some(linked) = request.linked_contribution {
                let origin = self
                    .ledger
                    .get(&linked)
                    .ok_or(EngineError::TransactionNotFound)?;
                if origin.jar_id != request.jar_id || origin.kind != TransactionKind::Contribution {
                    return Err(EngineError::TransactionNotFound);
                }
            }

            let outcome = payout_charges(request.amount, config)?;
            let id = TransactionId(self.next_transaction_id.fetch_add(1, Ordering::Relaxed));
            Transaction::payout(
                id,
                request.jar_id,
                outcome,
                request.linked_contribution,
                request.collector,
            )
        };

        self.ledger.insert(transaction.clone())?;
        info!(
            transaction = %transaction.id,
            jar = %transaction.jar_id,
            net = %transaction.amount,
            "payout initiated"
        );
        Ok(transaction)
    }

    /// Returns a snapshot of a transaction.
    pub fn get_transaction(&self, id: &TransactionId) -> Option<Transaction> {
        self.ledger.get(id)
    }

    /// All transactions for one jar, ordered by ID.
    pub fn jar_transactions(&self, jar_id: JarId) -> Vec<Transaction> {
        self.ledger.for_jar(jar_id)
    }

    // === Lifecycle ===

    /// Applies a gateway status report to a transaction.
    ///
    /// Duplicate and out-of-order reports are absorbed by the terminal
    /// guard and come back as [`StatusOutcome::Ignored`]; the webhook
    /// endpoint still answers 200 so the gateway stops retrying.
    ///
    /// # Errors
    ///
    /// [`EngineError::TransactionNotFound`] for an unknown reference.
    pub fn apply_status_report(
        &self,
        transaction_id: TransactionId,
        report: PaymentStatus,
    ) -> Result<StatusOutcome, EngineError> {
        let outcome = self
            .ledger
            .update(&transaction_id, |tx| tx.apply_status(report))
            .ok_or(EngineError::TransactionNotFound)?;

        if outcome.applied() {
            // Snapshot after the status commit; side effects run outside
            // the ledger entry lock.
            let transaction = self
                .ledger
                .get(&transaction_id)
                .ok_or(EngineError::TransactionNotFound)?;
            info!(
                transaction = %transaction.id,
                jar = %transaction.jar_id,
                status = ?transaction.status,
                "status applied"
            );
            self.run_post_transition_effects(&transaction);
        }
        self.drain_pending_settlements();
        Ok(outcome)
    }

    /// Admin manual status override; same side effects as a webhook.
    pub fn admin_override_status(
        &self,
        transaction_id: TransactionId,
        report: PaymentStatus,
        actor: Actor,
    ) -> Result<StatusOutcome, EngineError> {
        if !actor.admin {
            return Err(EngineError::Permission);
        }
        self.apply_status_report(transaction_id, report)
    }

    fn run_post_transition_effects(&self, transaction: &Transaction) {
        match transaction.kind {
            TransactionKind::Contribution => {
                if transaction.status == PaymentStatus::Completed {
                    self.refresh_jar_totals(transaction.jar_id);
                }
            }
            TransactionKind::Payout => {
                if transaction.status == PaymentStatus::Completed
                    && transaction.linked_contribution.is_some()
                {
                    self.pending_settlements.push(transaction.id);
                }
            }
        }
    }

    /// Marks the originating contribution of completed payouts as settled.
    ///
    /// At-least-once: entries that cannot be settled yet are re-queued and
    /// retried on later engine operations. Not a two-phase commit; the
    /// payout status is already committed when this runs.
    fn drain_pending_settlements(&self) {
        for _ in 0..self.pending_settlements.len() {
            let Some(payout_id) = self.pending_settlements.pop() else {
                break;
            };
            if !self.try_settle_linked_contribution(payout_id) {
                self.pending_settlements.push(payout_id);
            }
        }
    }

    fn try_settle_linked_contribution(&self, payout_id: TransactionId) -> bool {
        let Some(payout) = self.ledger.get(&payout_id) else {
            warn!(payout = %payout_id, "queued settlement references unknown payout; dropping");
            return true;
        };
        let Some(linked) = payout.linked_contribution else {
            return true;
        };
        match self.ledger.update(&linked, |tx| tx.is_settled = true) {
            Some(()) => {
                info!(payout = %payout_id, contribution = %linked, "linked contribution settled");
                true
            }
            None => {
                warn!(
                    payout = %payout_id,
                    contribution = %linked,
                    "linked contribution not found; settlement re-queued"
                );
                false
            }
        }
    }

    // === Aggregation ===

    /// Recomputes one jar's cached totals from the ledger.
    ///
    /// A full recount rather than an incremental counter: correct under
    /// concurrent and out-of-order webhook delivery at the cost of
    /// scanning the jar's transactions. Failures are logged and swallowed;
    /// the cache is allowed to go briefly stale and self-heals on the next
    /// qualifying event or the admin sweep.
    pub fn refresh_jar_totals(&self, jar_id: JarId) {
        let (total, count) = self.ledger.completed_contribution_totals(jar_id);
        match self.jars.get(&jar_id) {
            Some(jar) => {
                jar.publish_totals(total, count);
                info!(jar = %jar_id, total = %total, count, "jar totals refreshed");
            }
            None => {
                let err = EngineError::Aggregation(format!("jar {jar_id} missing during recount"));
                warn!(jar = %jar_id, error = %err, "jar totals refresh skipped");
            }
        }
    }

    /// Admin sweep: re-derives every jar's cached totals from the ledger.
    ///
    /// Returns the number of jars refreshed.
    pub fn recalculate_all_jar_totals(&self) -> usize {
        self.drain_pending_settlements();
        let jar_ids: Vec<JarId> = self.jars.iter().map(|entry| *entry.key()).collect();
        for jar_id in &jar_ids {
            self.refresh_jar_totals(*jar_id);
        }
        jar_ids.len()
    }

    /// Admin sweep: re-derives the charges breakdown of every mobile-money
    /// transaction using the given fee settings and overwrites the stored
    /// breakdown. Affected jars are recounted afterwards since creator-paid
    /// credited amounts shift with the percentages.
    ///
    /// Returns the number of transactions rewritten.
    pub fn recalculate_charges(&self, config: &FeeConfig) -> usize {
        self.drain_pending_settlements();
        let mut rewritten = 0;
        let mut touched_jars: Vec<JarId> = Vec::new();

        self.ledger.update_all(|tx| {
            if tx.method != PaymentMethod::MobileMoney {
                return;
            }
            let recalculated = match tx.kind {
                TransactionKind::Contribution => {
                    let Some(fee_payer) = self
                        .jars
                        .get(&tx.jar_id)
                        .map(|jar| jar.fee_payer())
                    else {
                        warn!(transaction = %tx.id, jar = %tx.jar_id, "jar missing; charges kept");
                        return;
                    };
                    // The base amount is whichever figure excludes charges:
                    // what the contributor paid when the creator absorbs
                    // fees, the credited amount otherwise.
                    let base = match fee_payer {
                        FeePayer::Creator => tx.charges.amount_paid_by_contributor,
                        FeePayer::Contributor => tx.amount,
                    };
                    contribution_charges(base, fee_payer, config)
                }
                TransactionKind::Payout => {
                    payout_charges(tx.charges.amount_paid_by_contributor, config)
                }
            };
            match recalculated {
                Ok(outcome) => {
                    tx.charges = outcome.breakdown;
                    tx.amount = outcome.settled_amount;
                    rewritten += 1;
                    if !touched_jars.contains(&tx.jar_id) {
                        touched_jars.push(tx.jar_id);
                    }
                }
                Err(err) => {
                    warn!(transaction = %tx.id, error = %err, "charge recalculation skipped");
                }
            }
        });

        for jar_id in touched_jars {
            self.refresh_jar_totals(jar_id);
        }
        info!(rewritten, "charge recalculation sweep finished");
        rewritten
    }

    /// Number of transactions in the ledger.
    pub fn transaction_count(&self) -> usize {
        self.ledger.len()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
