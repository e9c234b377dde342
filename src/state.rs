// src/state.rs
//
// In-memory account state with a deterministic commitment and a
// copy-on-write overlay so optimistic layers can read one shared base
// while buffering their own writes.
//
// Durable persistence is a separate collaborator invoked between blocks;
// nothing here touches disk.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{canonical_uint_framed, content_hash, Address, Hash32};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: u128,
    pub nonce: u64,
    pub storage_root: Hash32,
    pub code_hash: Hash32,
}

impl Default for AccountState {
    fn default() -> Self {
        Self {
            balance: 0,
            nonce: 0,
            storage_root: [0; 32],
            code_hash: [0; 32],
        }
    }
}

impl AccountState {
    /// Canonical encoding: framed minimal big-endian integers followed by
    /// the two fixed-width roots.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(80);
        buf.extend_from_slice(&canonical_uint_framed(self.balance));
        buf.extend_from_slice(&canonical_uint_framed(self.nonce as u128));
        buf.extend_from_slice(&self.storage_root);
        buf.extend_from_slice(&self.code_hash);
        buf
    }

    fn is_vacant(&self) -> bool {
        *self == AccountState::default()
    }
}

/// Read access shared by the canonical store and overlays.
pub trait StateView: Sync {
    fn account(&self, addr: &Address) -> AccountState;

    fn balance_of(&self, addr: &Address) -> u128 {
        self.account(addr).balance
    }

    fn nonce_of(&self, addr: &Address) -> u64 {
        self.account(addr).nonce
    }
}

/* ---------------------------------------------------------------------
   Canonical store
---------------------------------------------------------------------*/

/// Canonical account map. `BTreeMap` keeps iteration order fixed so the
/// state root never depends on insertion history.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    accounts: BTreeMap<Address, AccountState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balances<I: IntoIterator<Item = (Address, u128)>>(balances: I) -> Self {
        let mut store = Self::new();
        for (addr, balance) in balances {
            store.accounts.insert(
                addr,
                AccountState {
                    balance,
                    ..Default::default()
                },
            );
        }
        store
    }

    pub fn set_account(&mut self, addr: Address, account: AccountState) {
        if account.is_vacant() {
            self.accounts.remove(&addr);
        } else {
            self.accounts.insert(addr, account);
        }
    }

    pub fn credit(&mut self, addr: Address, amount: u128) {
        let mut acct = self.account(&addr);
        acct.balance = acct.balance.saturating_add(amount);
        self.set_account(addr, acct);
    }

    pub fn debit(&mut self, addr: Address, amount: u128) -> Result<()> {
        let mut acct = self.account(&addr);
        if acct.balance < amount {
            return Err(CoreError::InsufficientFunds {
                have: acct.balance,
                need: amount,
            });
        }
        acct.balance -= amount;
        self.set_account(addr, acct);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Fold a batch of account writes into the store.
    pub fn apply_writes(&mut self, writes: HashMap<Address, AccountState>) {
        for (addr, account) in writes {
            self.set_account(addr, account);
        }
    }

    /// Deterministic commitment: H over `address || canonical_account` in
    /// address order.
    pub fn state_root(&self) -> Hash32 {
        let mut buf = Vec::with_capacity(self.accounts.len() * 100);
        for (addr, account) in &self.accounts {
            buf.extend_from_slice(addr.as_bytes());
            buf.extend_from_slice(&account.canonical_bytes());
        }
        content_hash(&buf)
    }
}

impl StateView for StateStore {
    fn account(&self, addr: &Address) -> AccountState {
        self.accounts.get(addr).cloned().unwrap_or_default()
    }
}

/* ---------------------------------------------------------------------
   Copy-on-write overlay
---------------------------------------------------------------------*/

/// Buffered writes over a shared read-only base. Layers of the optimistic
/// scheduler each get their own overlay; merge order is the declared tx
/// order, so the result is position-independent of execution interleaving.
pub struct Overlay<'a> {
    base: &'a dyn StateView,
    writes: HashMap<Address, AccountState>,
}

impl<'a> Overlay<'a> {
    pub fn new(base: &'a dyn StateView) -> Self {
        Self {
            base,
            writes: HashMap::new(),
        }
    }

    pub fn set_account(&mut self, addr: Address, account: AccountState) {
        self.writes.insert(addr, account);
    }

    pub fn credit(&mut self, addr: Address, amount: u128) {
        let mut acct = self.account(&addr);
        acct.balance = acct.balance.saturating_add(amount);
        self.set_account(addr, acct);
    }

    pub fn debit(&mut self, addr: Address, amount: u128) -> Result<()> {
        let mut acct = self.account(&addr);
        if acct.balance < amount {
            return Err(CoreError::InsufficientFunds {
                have: acct.balance,
                need: amount,
            });
        }
        acct.balance -= amount;
        self.set_account(addr, acct);
        Ok(())
    }

    pub fn bump_nonce(&mut self, addr: Address) {
        let mut acct = self.account(&addr);
        acct.nonce += 1;
        self.set_account(addr, acct);
    }

    /// Discard buffered writes (per-tx revert).
    pub fn clear(&mut self) {
        self.writes.clear();
    }

    pub fn into_writes(self) -> HashMap<Address, AccountState> {
        self.writes
    }

    pub fn writes(&self) -> &HashMap<Address, AccountState> {
        &self.writes
    }
}

impl<'a> StateView for Overlay<'a> {
    fn account(&self, addr: &Address) -> AccountState {
        self.writes
            .get(addr)
            .cloned()
            .unwrap_or_else(|| self.base.account(addr))
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_insertion_order_independent() {
        let a = Address::repeat(1);
        let b = Address::repeat(2);

        let mut s1 = StateStore::new();
        s1.credit(a, 10);
        s1.credit(b, 20);

        let mut s2 = StateStore::new();
        s2.credit(b, 20);
        s2.credit(a, 10);

        assert_eq!(s1.state_root(), s2.state_root());
    }

    #[test]
    fn root_changes_with_any_field() {
        let a = Address::repeat(1);
        let mut s = StateStore::new();
        s.credit(a, 10);
        let r0 = s.state_root();

        let mut acct = s.account(&a);
        acct.nonce += 1;
        s.set_account(a, acct);
        assert_ne!(r0, s.state_root());
    }

    #[test]
    fn vacant_account_equals_absent() {
        let a = Address::repeat(1);
        let empty = StateStore::new();
        let mut touched = StateStore::new();
        touched.credit(a, 5);
        touched.debit(a, 5).unwrap();
        assert_eq!(empty.state_root(), touched.state_root());
    }

    #[test]
    fn debit_checks_balance() {
        let a = Address::repeat(1);
        let mut s = StateStore::new();
        s.credit(a, 5);
        assert!(matches!(
            s.debit(a, 6),
            Err(CoreError::InsufficientFunds { have: 5, need: 6 })
        ));
        assert!(s.debit(a, 5).is_ok());
    }

    #[test]
    fn overlay_reads_through_and_buffers_writes() {
        let a = Address::repeat(1);
        let b = Address::repeat(2);
        let mut base = StateStore::new();
        base.credit(a, 100);

        let mut ov = Overlay::new(&base);
        assert_eq!(ov.balance_of(&a), 100);
        ov.debit(a, 30).unwrap();
        ov.credit(b, 30);
        ov.bump_nonce(a);

        // Base untouched until merge.
        assert_eq!(base.balance_of(&a), 100);

        let writes = ov.into_writes();
        base.apply_writes(writes);
        assert_eq!(base.balance_of(&a), 70);
        assert_eq!(base.balance_of(&b), 30);
        assert_eq!(base.nonce_of(&a), 1);
    }

    #[test]
    fn overlay_clear_reverts_delta() {
        let a = Address::repeat(1);
        let mut base = StateStore::new();
        base.credit(a, 10);
        let mut ov = Overlay::new(&base);
        ov.debit(a, 10).unwrap();
        ov.clear();
        assert_eq!(ov.balance_of(&a), 10);
        assert!(ov.writes().is_empty());
    }
}
