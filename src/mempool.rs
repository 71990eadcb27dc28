//! Transaction admission and the three pools a transaction can live in.
//!
//! Every transaction known to the node sits in exactly one of:
//! - `confirmed`: included in a block,
//! - `unconfirmed`: pending, with `amount + fee` reserved from the sender's
//!   unconfirmed balance,
//! - `double_spending`: quarantined because the sender could not cover it.
//!
//! Admissions for one sender are serialized by a per-account lock so the
//! balance check and the debit cannot interleave; different senders proceed
//! in parallel.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::account::{AccountId, AccountLedger};
use crate::time::TimeSource;
use crate::tx::Transaction;

/// Outcome of [`TransactionProcessor::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Funds reserved; the transaction waits for inclusion in a block.
    Accepted,
    /// The sender is unknown or cannot cover the transaction.
    DoubleSpending,
    /// Failed a validity check; no state changed.
    Rejected(Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    FutureTimestamp,
    InvalidDeadline,
    Expired,
    NonPositiveFee,
    Duplicate,
    InvalidSignature,
}

pub struct TransactionProcessor<L: AccountLedger> {
    ledger: Arc<L>,
    clock: Box<dyn TimeSource>,
    confirmed: DashMap<i64, Arc<Transaction>>,
    unconfirmed: DashMap<i64, Arc<Transaction>>,
    double_spending: DashMap<i64, Arc<Transaction>>,
    account_locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl<L: AccountLedger> TransactionProcessor<L> {
    pub fn new(ledger: Arc<L>, clock: Box<dyn TimeSource>) -> Self {
        Self {
            ledger,
            clock,
            confirmed: DashMap::new(),
            unconfirmed: DashMap::new(),
            double_spending: DashMap::new(),
            account_locks: DashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Runs `f` while holding the sender's lock. The lock entry is dropped
    /// again once no other admission for that sender holds it.
    fn with_account_lock<R>(&self, account: AccountId, f: impl FnOnce() -> R) -> R {
        let lock = Arc::clone(&self.account_locks.entry(account).or_default());
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.account_locks
            .remove_if(&account, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn is_known(&self, id: i64) -> bool {
        self.confirmed.contains_key(&id)
            || self.unconfirmed.contains_key(&id)
            || self.double_spending.contains_key(&id)
    }

    fn check_validity(&self, tx: &Transaction) -> Option<Rejection> {
        let now = i64::from(self.clock.now());
        if i64::from(tx.timestamp()) > now {
            Some(Rejection::FutureTimestamp)
        } else if tx.deadline() < 1 {
            Some(Rejection::InvalidDeadline)
        } else if tx.expiration() < now {
            Some(Rejection::Expired)
        } else if tx.fee() <= 0 {
            Some(Rejection::NonPositiveFee)
        } else {
            None
        }
    }

    /// Runs the admission pipeline and reports where the transaction went.
    pub fn admit(&self, tx: Arc<Transaction>) -> Admission {
        let id = tx.id();
        if let Some(rejection) = self.check_validity(&tx) {
            debug!(id = %tx.string_id(), ?rejection, "transaction rejected");
            return Admission::Rejected(rejection);
        }
        if !tx.verify() {
            debug!(id = %tx.string_id(), "transaction signature invalid");
            return Admission::Rejected(Rejection::InvalidSignature);
        }

        let sender = self.ledger.id_from_public_key(tx.sender_public_key());
        self.with_account_lock(sender, || self.classify(id, tx))
    }

    /// Duplicate check, reservation and insertion; runs under the sender's lock.
    fn classify(&self, id: i64, tx: Arc<Transaction>) -> Admission {
        if self.is_known(id) {
            debug!(id = %tx.string_id(), "transaction already known");
            return Admission::Rejected(Rejection::Duplicate);
        }

        let reserved = match self.ledger.resolve_by_public_key(tx.sender_public_key()) {
            Some(account) => {
                let required = tx.required_balance();
                if self.ledger.unconfirmed_balance(account) < required {
                    false
                } else {
                    self.ledger.adjust_unconfirmed_balance(account, -required);
                    true
                }
            }
            None => false,
        };

        if reserved {
            info!(id = %tx.string_id(), "transaction processed");
            self.unconfirmed.insert(id, tx);
            Admission::Accepted
        } else {
            info!(id = %tx.string_id(), "double spending transaction processed");
            self.double_spending.insert(id, tx);
            Admission::DoubleSpending
        }
    }

    /// Admits `tx`; `true` if it was classified (pending or quarantined),
    /// `false` if it was rejected outright.
    pub fn process_transaction(&self, tx: Arc<Transaction>) -> bool {
        !matches!(self.admit(tx), Admission::Rejected(_))
    }

    /// Marks a transaction as confirmed. Returns `false` if it already was.
    ///
    /// The transaction leaves the other two pools; reserved balance is the
    /// caller's concern.
    pub fn add_transaction(&self, tx: Arc<Transaction>) -> bool {
        let id = tx.id();
        let sender = self.ledger.id_from_public_key(tx.sender_public_key());
        self.with_account_lock(sender, || {
            if self.confirmed.contains_key(&id) {
                return false;
            }
            self.unconfirmed.remove(&id);
            self.double_spending.remove(&id);
            self.confirmed.insert(id, tx);
            true
        })
    }

    /// Drops a pending transaction. Does not release its reserved balance.
    pub fn remove_unconfirmed_transaction(&self, tx: &Transaction) -> bool {
        self.unconfirmed.remove(&tx.id()).is_some()
    }

    pub fn transaction(&self, id: i64) -> Option<Arc<Transaction>> {
        self.confirmed.get(&id).map(|tx| Arc::clone(&tx))
    }

    pub fn unconfirmed_transaction(&self, id: i64) -> Option<Arc<Transaction>> {
        self.unconfirmed.get(&id).map(|tx| Arc::clone(&tx))
    }

    pub fn double_spending_transaction(&self, id: i64) -> Option<Arc<Transaction>> {
        self.double_spending.get(&id).map(|tx| Arc::clone(&tx))
    }

    /// Pending transactions ordered by id, as blocks require.
    pub fn unconfirmed_transactions(&self) -> Vec<Arc<Transaction>> {
        let mut txs: Vec<_> = self.unconfirmed.iter().map(|e| Arc::clone(e.value())).collect();
        txs.sort_by_key(|tx| tx.id());
        txs
    }

    pub fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }

    pub fn unconfirmed_count(&self) -> usize {
        self.unconfirmed.len()
    }

    pub fn double_spending_count(&self) -> usize {
        self.double_spending.len()
    }
}
