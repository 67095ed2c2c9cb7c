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

//! Thread-safe transaction ledger with deduplication.
//!
//! The ledger is the authoritative record: transactions are inserted once,
//! never deleted, and mutated only through status updates. Jar balance
//! recounts scan it rather than trusting any cached figure.

use crate::base::{JarId, TransactionId};
use crate::error::EngineError;
use crate::transaction::{PaymentStatus, Transaction, TransactionKind};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;

/// Append-only transaction store with O(1) duplicate detection.
///
/// Backed by a [`DashMap`] so concurrent request tasks can insert and
/// update without a global lock.
#[derive(Debug, Default)]
pub struct TransactionLedger {
    transactions: DashMap<TransactionId, Transaction>,
}

impl TransactionLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self {
            transactions: DashMap::new(),
        }
    }

    /// Adds a transaction to the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateTransaction`] if a transaction with
    /// the same ID already exists.
    pub fn insert(&self, transaction: Transaction) -> Result<(), EngineError> {
        // Entry API for atomic check-and-insert under concurrent callers.
        match self.transactions.entry(transaction.id) {
            Entry::Occupied(_) => Err(EngineError::DuplicateTransaction),
            Entry::Vacant(entry) => {
                entry.insert(transaction);
                Ok(())
            }
        }
    }

    /// Returns a snapshot of a transaction by ID.
    pub fn get(&self, id: &TransactionId) -> Option<Transaction> {
        self.transactions.get(id).map(|entry| entry.value().clone())
    }

    /// Applies a mutation to one transaction under its shard lock.
    ///
    /// Returns `None` if the transaction does not exist; otherwise the
    /// closure's result.
    pub fn update<R>(
        &self,
        id: &TransactionId,
        mutate: impl FnOnce(&mut Transaction) -> R,
    ) -> Option<R> {
        self.transactions.get_mut(id).map(|mut entry| mutate(&mut entry))
    }

    /// Applies a mutation to every transaction. Admin sweeps only.
    pub fn update_all(&self, mut mutate: impl FnMut(&mut Transaction)) {
        for mut entry in self.transactions.iter_mut() {
            mutate(&mut entry);
        }
    }

    /// All transactions for one jar, ordered by ID.
    pub fn for_jar(&self, jar_id: JarId) -> Vec<Transaction> {
        let mut entries: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|entry| entry.jar_id == jar_id)
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|tx| tx.id);
        entries
    }

    /// Authoritative sum and count of completed contributions for one jar.
    ///
    /// This is the ground truth the recount publishes into the jar cache.
    pub fn completed_contribution_totals(&self, jar_id: JarId) -> (Decimal, u64) {
        self.transactions
            .iter()
            .filter(|entry| entry.jar_id == jar_id && entry.counts_toward_balance())
            .fold((Decimal::ZERO, 0), |(sum, count), entry| {
                (sum + entry.amount, count + 1)
            })
    }

    /// Gross amount already committed to payouts for one jar.
    ///
    /// Counts pending and completed payouts (failed ones release their
    /// funds); the gross figure includes the transfer fee.
    pub fn outstanding_payout_total(&self, jar_id: JarId) -> Decimal {
        self.transactions
            .iter()
            .filter(|entry| {
                entry.jar_id == jar_id
                    && entry.kind == TransactionKind::Payout
                    && entry.status != PaymentStatus::Failed
            })
            .map(|entry| entry.charges.amount_paid_by_contributor)
            .sum()
    }

    /// All distinct jar IDs present in the ledger.
    pub fn jar_ids(&self) -> Vec<JarId> {
        let mut ids: Vec<JarId> = self.transactions.iter().map(|entry| entry.jar_id).collect();
        ids.sort_by_key(|id| id.0);
        ids.dedup();
        ids
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::{FeeConfig, FeePayer, contribution_charges, payout_charges};
    use crate::transaction::PaymentMethod;
    use rust_decimal_macros::dec;

    fn contribution(id: u64, jar: u32, amount: Decimal, method: PaymentMethod) -> Transaction {
        let outcome =
            contribution_charges(amount, FeePayer::Contributor, &FeeConfig::default()).unwrap();
        Transaction::contribution(
            TransactionId(id),
            JarId(jar),
            method,
            outcome,
            None,
            Some("+233200000001".to_string()),
            None,
            false,
        )
    }

    #[test]
    fn insert_rejects_duplicate_id() {
        let ledger = TransactionLedger::new();
        ledger
            .insert(contribution(1, 1, dec!(10), PaymentMethod::Cash))
            .unwrap();

        let result = ledger.insert(contribution(1, 2, dec!(20), PaymentMethod::Cash));
        assert_eq!(result, Err(EngineError::DuplicateTransaction));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn for_jar_filters_and_orders() {
        let ledger = TransactionLedger::new();
        ledger
            .insert(contribution(3, 1, dec!(30), PaymentMethod::Cash))
            .unwrap();
        ledger
            .insert(contribution(1, 1, dec!(10), PaymentMethod::Cash))
            .unwrap();
        ledger
            .insert(contribution(2, 2, dec!(20), PaymentMethod::Cash))
            .unwrap();

        let jar1 = ledger.for_jar(JarId(1));
        assert_eq!(jar1.len(), 2);
        assert_eq!(jar1[0].id, TransactionId(1));
        assert_eq!(jar1[1].id, TransactionId(3));
    }

    #[test]
    fn totals_only_count_completed_contributions() {
        let ledger = TransactionLedger::new();
        // Cash is completed at creation, momo stays pending.
        ledger
            .insert(contribution(1, 1, dec!(100), PaymentMethod::Cash))
            .unwrap();
        ledger
            .insert(contribution(2, 1, dec!(50), PaymentMethod::MobileMoney))
            .unwrap();

        let (sum, count) = ledger.completed_contribution_totals(JarId(1));
        assert_eq!(sum, dec!(100));
        assert_eq!(count, 1);
    }

    #[test]
    fn update_mutates_in_place() {
        let ledger = TransactionLedger::new();
        ledger
            .insert(contribution(1, 1, dec!(100), PaymentMethod::MobileMoney))
            .unwrap();

        let outcome = ledger.update(&TransactionId(1), |tx| {
            tx.apply_status(PaymentStatus::Completed)
        });
        assert!(outcome.unwrap().applied());
        assert_eq!(
            ledger.get(&TransactionId(1)).unwrap().status,
            PaymentStatus::Completed
        );
    }

    #[test]
    fn update_missing_returns_none() {
        let ledger = TransactionLedger::new();
        assert!(ledger.update(&TransactionId(404), |_| ()).is_none());
    }

    #[test]
    fn outstanding_payouts_exclude_failed() {
        let ledger = TransactionLedger::new();
        ledger
            .insert(contribution(1, 1, dec!(100), PaymentMethod::Cash))
            .unwrap();

        let outcome = payout_charges(dec!(50), &FeeConfig::default()).unwrap();
        ledger
            .insert(Transaction::payout(TransactionId(2), JarId(1), outcome, None, None))
            .unwrap();

        let outcome = payout_charges(dec!(30), &FeeConfig::default()).unwrap();
        let mut failed = Transaction::payout(TransactionId(3), JarId(1), outcome, None, None);
        failed.apply_status(PaymentStatus::Failed);
        ledger.insert(failed).unwrap();

        assert_eq!(ledger.outstanding_payout_total(JarId(1)), dec!(50));
    }

    #[test]
    fn jar_ids_deduplicated() {
        let ledger = TransactionLedger::new();
        ledger
            .insert(contribution(1, 2, dec!(10), PaymentMethod::Cash))
            .unwrap();
        ledger
            .insert(contribution(2, 2, dec!(10), PaymentMethod::Cash))
            .unwrap();
        ledger
            .insert(contribution(3, 1, dec!(10), PaymentMethod::Cash))
            .unwrap();

        assert_eq!(ledger.jar_ids(), vec![JarId(1), JarId(2)]);
    }
}
