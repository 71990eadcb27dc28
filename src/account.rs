//! Account ledger interface and an in-memory reference ledger.
//!
//! The consensus core never owns balances. Blocks and the mempool reach
//! accounts only through [`AccountLedger`], addressed by account id.

use dashmap::DashMap;

use crate::constants::FEE_TO_BALANCE_SCALE;
use crate::crypto::{self, PublicKeyBytes};

pub type AccountId = i64;

/// Balance queries and mutations the consensus core depends on.
pub trait AccountLedger: Send + Sync {
    fn id_from_public_key(&self, public_key: &PublicKeyBytes) -> AccountId {
        crypto::account_id(public_key)
    }

    fn contains_account(&self, id: AccountId) -> bool;

    /// Returns the account owning `public_key`, if it exists and the key does
    /// not conflict with a key already bound to that id.
    fn resolve_by_public_key(&self, public_key: &PublicKeyBytes) -> Option<AccountId>;

    fn add_or_get_account(&self, id: AccountId) -> AccountId;

    /// Stake used for forging; zero for unknown accounts.
    fn effective_balance(&self, id: AccountId) -> i64;

    /// Balance net of reservations made by pending transactions; zero for unknown accounts.
    fn unconfirmed_balance(&self, id: AccountId) -> i64;

    fn adjust_unconfirmed_balance(&self, id: AccountId, delta: i64);

    fn adjust_confirmed_balance(&self, id: AccountId, delta: i64);

    fn adjust_balance_and_unconfirmed_balance(&self, id: AccountId, delta: i64) {
        self.adjust_confirmed_balance(id, delta);
        self.adjust_unconfirmed_balance(id, delta);
    }

    /// Binds `public_key` to the account on first use, or checks it against
    /// the bound key. `height` is the height of the block presenting the key,
    /// if already known.
    fn set_or_verify_generating_key(
        &self,
        id: AccountId,
        public_key: &PublicKeyBytes,
        height: Option<u32>,
    ) -> bool;

    /// Records that the key was used to forge a block at `height`.
    fn apply_generating_key(&self, id: AccountId, public_key: &PublicKeyBytes, height: u32) -> bool;

    /// Releases a key binding recorded at or above `height`.
    fn undo_generating_key(&self, id: AccountId, height: u32);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: i64,
    pub unconfirmed_balance: i64,
    pub public_key: Option<PublicKeyBytes>,
    /// Height at which `public_key` was first used on chain; `None` while the
    /// binding is only provisional.
    pub key_height: Option<u32>,
}

impl Account {
    pub fn effective_balance(&self) -> i64 {
        self.balance / FEE_TO_BALANCE_SCALE
    }

    fn set_or_verify(&mut self, key: &PublicKeyBytes, height: Option<u32>) -> bool {
        match (self.public_key, self.key_height, height) {
            (None, _, _) => {
                self.public_key = Some(*key);
                self.key_height = None;
                true
            }
            (Some(bound), _, _) if bound == *key => true,
            (Some(_), Some(bound_at), Some(h)) if bound_at >= h => {
                self.public_key = Some(*key);
                self.key_height = Some(h);
                true
            }
            _ => false,
        }
    }
}

/// Thread-safe ledger backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: DashMap<AccountId, Account>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credits `amount` to both balances of the account owning `public_key`,
    /// creating it if needed, and returns its id.
    pub fn fund(&self, public_key: &PublicKeyBytes, amount: i64) -> AccountId {
        let id = self.id_from_public_key(public_key);
        let mut account = self.accounts.entry(id).or_default();
        account.balance += amount;
        account.unconfirmed_balance += amount;
        id
    }

    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.accounts.get(&id).map(|a| a.clone())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl AccountLedger for InMemoryLedger {
    fn contains_account(&self, id: AccountId) -> bool {
        self.accounts.contains_key(&id)
    }

    fn resolve_by_public_key(&self, public_key: &PublicKeyBytes) -> Option<AccountId> {
        let id = self.id_from_public_key(public_key);
        let account = self.accounts.get(&id)?;
        match account.public_key {
            Some(bound) if bound != *public_key => None,
            _ => Some(id),
        }
    }

    fn add_or_get_account(&self, id: AccountId) -> AccountId {
        self.accounts.entry(id).or_default();
        id
    }

    fn effective_balance(&self, id: AccountId) -> i64 {
        self.accounts
            .get(&id)
            .map_or(0, |a| a.effective_balance())
    }

    fn unconfirmed_balance(&self, id: AccountId) -> i64 {
        self.accounts.get(&id).map_or(0, |a| a.unconfirmed_balance)
    }

    fn adjust_unconfirmed_balance(&self, id: AccountId, delta: i64) {
        if let Some(mut account) = self.accounts.get_mut(&id) {
            account.unconfirmed_balance += delta;
        }
    }

    fn adjust_confirmed_balance(&self, id: AccountId, delta: i64) {
        if let Some(mut account) = self.accounts.get_mut(&id) {
            account.balance += delta;
        }
    }

    fn adjust_balance_and_unconfirmed_balance(&self, id: AccountId, delta: i64) {
        if let Some(mut account) = self.accounts.get_mut(&id) {
            account.balance += delta;
            account.unconfirmed_balance += delta;
        }
    }

    fn set_or_verify_generating_key(
        &self,
        id: AccountId,
        public_key: &PublicKeyBytes,
        height: Option<u32>,
    ) -> bool {
        self.accounts
            .get_mut(&id)
            .map_or(false, |mut a| a.set_or_verify(public_key, height))
    }

    fn apply_generating_key(&self, id: AccountId, public_key: &PublicKeyBytes, height: u32) -> bool {
        let Some(mut account) = self.accounts.get_mut(&id) else {
            return false;
        };
        if !account.set_or_verify(public_key, Some(height)) {
            return false;
        }
        if account.key_height.map_or(true, |h| h > height) {
            account.key_height = Some(height);
        }
        true
    }

    fn undo_generating_key(&self, id: AccountId, height: u32) {
        if let Some(mut account) = self.accounts.get_mut(&id) {
            if account.key_height.map_or(false, |h| h >= height) {
                account.public_key = None;
                account.key_height = None;
            }
        }
    }
}
