//! Store double for unit tests: an `InMemoryStore` that counts reads and can
//! be told to fail individual operations.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier, Mutex,
    },
};

use minibank_core::{Account, AccountId, AccountStatus, Currency, Transaction};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::storage::{DurableStore, InMemoryStore, StorageError, TransactionId};

pub fn account(account_id: AccountId, currency: Currency, balance: Decimal, status: AccountStatus) -> Account {
    Account {
        account_id,
        currency,
        balance,
        status,
    }
}

/// 111 and 222 are active GBP accounts, 333 is deleted, 444 holds NOK.
pub fn accounts() -> Vec<Account> {
    vec![
        account(111, Currency::Gbp, dec!(1000.00), AccountStatus::Active),
        account(222, Currency::Gbp, dec!(2000.00), AccountStatus::Active),
        account(333, Currency::Gbp, dec!(1000.00), AccountStatus::Deleted),
        account(444, Currency::Nok, dec!(2000.00), AccountStatus::Active),
    ]
}

pub fn transaction_at(sender: AccountId, receiver: AccountId, timestamp: OffsetDateTime) -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        sender,
        receiver,
        amount: dec!(1.00),
        currency: Currency::Gbp,
        timestamp,
        reference_id: "test".to_string(),
    }
}

pub struct ProbeStore {
    inner: InMemoryStore,
    failing: Mutex<HashSet<&'static str>>,
    account_reads: AtomicUsize,
    bulk_reads: AtomicUsize,
    read_gate: Mutex<Option<ReadGate>>,
    failing_adjustments: Mutex<HashSet<AccountId>>,
    before_rollback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// Holds the next `remaining` store reads of one account at a barrier, after
/// the read, so that many callers observe the same balance.
struct ReadGate {
    account_id: AccountId,
    barrier: Arc<Barrier>,
    remaining: usize,
}

impl ProbeStore {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            inner: InMemoryStore::with_accounts(accounts),
            failing: Mutex::new(HashSet::new()),
            account_reads: AtomicUsize::new(0),
            bulk_reads: AtomicUsize::new(0),
            read_gate: Mutex::new(None),
            failing_adjustments: Mutex::new(HashSet::new()),
            before_rollback: Mutex::new(None),
        }
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    /// Fails `adjust_balance` for one account only.
    pub fn fail_adjustment_of(&self, account_id: AccountId) {
        self.failing_adjustments.lock().unwrap().insert(account_id);
    }

    /// Runs `hook` once, just before the next rollback reaches the store.
    pub fn before_rollback(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_rollback.lock().unwrap() = Some(Box::new(hook));
    }

    /// The next `readers` reads of `account_id` all return before any of
    /// them is allowed to continue.
    pub fn hold_reads(&self, account_id: AccountId, readers: usize) {
        *self.read_gate.lock().unwrap() = Some(ReadGate {
            account_id,
            barrier: Arc::new(Barrier::new(readers)),
            remaining: readers,
        });
    }

    fn gate(&self, account_id: AccountId) -> Option<Arc<Barrier>> {
        let mut gate = self.read_gate.lock().unwrap();
        match gate.as_mut() {
            Some(g) if g.account_id == account_id && g.remaining > 0 => {
                g.remaining -= 1;
                Some(g.barrier.clone())
            }
            _ => None,
        }
    }

    pub fn account_reads(&self) -> usize {
        self.account_reads.load(Ordering::SeqCst)
    }

    pub fn bulk_reads(&self) -> usize {
        self.bulk_reads.load(Ordering::SeqCst)
    }

    /// Inserts straight into the store, bypassing any repository cache.
    pub fn seed_transaction(&self, transaction: Transaction) {
        self.inner.insert_transaction(&transaction).unwrap();
    }

    fn check(&self, op: &'static str) -> Result<(), StorageError> {
        if self.failing.lock().unwrap().contains(op) {
            return Err(StorageError::unavailable(format!("injected failure in {}", op)));
        }
        Ok(())
    }
}

impl DurableStore for ProbeStore {
    fn provision_account(&self, account: &Account) -> Result<(), StorageError> {
        self.check("provision_account")?;
        self.inner.provision_account(account)
    }

    fn fetch_account(&self, account_id: AccountId) -> Result<Option<Account>, StorageError> {
        self.check("fetch_account")?;
        self.account_reads.fetch_add(1, Ordering::SeqCst);
        let account = self.inner.fetch_account(account_id);
        if let Some(barrier) = self.gate(account_id) {
            barrier.wait();
        }
        account
    }

    fn fetch_all_accounts(&self) -> Result<Vec<Account>, StorageError> {
        self.check("fetch_all_accounts")?;
        self.bulk_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_all_accounts()
    }

    fn fetch_recent_transactions(&self, account_id: AccountId, limit: usize) -> Result<Vec<Transaction>, StorageError> {
        self.check("fetch_recent_transactions")?;
        self.inner.fetch_recent_transactions(account_id, limit)
    }

    fn fetch_all_transactions(&self) -> Result<Vec<Transaction>, StorageError> {
        self.check("fetch_all_transactions")?;
        self.inner.fetch_all_transactions()
    }

    fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StorageError> {
        self.check("insert_transaction")?;
        self.inner.insert_transaction(transaction)
    }

    fn adjust_balance(&self, account_id: AccountId, delta: Decimal) -> Result<(), StorageError> {
        self.check("adjust_balance")?;
        if self.failing_adjustments.lock().unwrap().contains(&account_id) {
            return Err(StorageError::unavailable(format!("injected failure adjusting {}", account_id)));
        }
        self.inner.adjust_balance(account_id, delta)
    }

    fn insert_idempotency_key(&self, key: &str) -> Result<(), StorageError> {
        self.check("insert_idempotency_key")?;
        self.inner.insert_idempotency_key(key)
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        self.inner.begin_transaction()
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        self.check("commit_transaction")?;
        self.inner.commit_transaction(tx_id)
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let hook = self.before_rollback.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.inner.rollback_transaction(tx_id)
    }
}
