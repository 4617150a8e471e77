use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    thread::{self, ThreadId},
};

use minibank_core::{Account, AccountId, IdempotencyRecord, Transaction};
use rust_decimal::Decimal;
use uuid::Uuid;

// Re-export core storage types so callers can reach them through crate::storage
pub use minibank_core::storage::{DurableStore, StorageError, TransactionId, MINI_STATEMENT_LIMIT};

/// Inverse of a write made inside an open unit of work.
enum Undo {
    Transaction(Uuid),
    IdempotencyKey(String),
    Balance { account_id: AccountId, delta: Decimal },
}

struct OpenTransaction {
    id: TransactionId,
    undo: Vec<Undo>,
}

/// Volatile `DurableStore` used for tests, benchmarks and the `memory` backend.
///
/// Units of work are tracked per thread with an undo log, so transfers running
/// on different threads can be open at the same time and roll back
/// independently.
pub struct InMemoryStore {
    accounts: RwLock<BTreeMap<AccountId, Account>>,
    transactions: RwLock<Vec<Transaction>>,
    idempotency: RwLock<HashMap<String, IdempotencyRecord>>,
    tx_counter: AtomicU64,
    open: Mutex<HashMap<ThreadId, OpenTransaction>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned(what: &str) -> StorageError {
    StorageError::unavailable(format!("{} lock poisoned", what))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(BTreeMap::new()),
            transactions: RwLock::new(Vec::new()),
            idempotency: RwLock::new(HashMap::new()),
            tx_counter: AtomicU64::new(1),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.accounts.write() {
            map.extend(accounts.into_iter().map(|a| (a.account_id, a)));
        }
        store
    }

    fn accounts(&self) -> Result<RwLockReadGuard<'_, BTreeMap<AccountId, Account>>, StorageError> {
        self.accounts.read().map_err(|_| poisoned("accounts"))
    }

    fn accounts_mut(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<AccountId, Account>>, StorageError> {
        self.accounts.write().map_err(|_| poisoned("accounts"))
    }

    fn transactions(&self) -> Result<RwLockReadGuard<'_, Vec<Transaction>>, StorageError> {
        self.transactions.read().map_err(|_| poisoned("transactions"))
    }

    fn transactions_mut(&self) -> Result<RwLockWriteGuard<'_, Vec<Transaction>>, StorageError> {
        self.transactions.write().map_err(|_| poisoned("transactions"))
    }

    fn idempotency_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, IdempotencyRecord>>, StorageError> {
        self.idempotency.write().map_err(|_| poisoned("idempotency"))
    }

    fn open_transactions(&self) -> Result<MutexGuard<'_, HashMap<ThreadId, OpenTransaction>>, StorageError> {
        self.open.lock().map_err(|_| poisoned("open transactions"))
    }

    /// Appends `undo` to the calling thread's unit of work, if one is open.
    fn record(&self, undo: Undo) -> Result<(), StorageError> {
        if let Some(open) = self.open_transactions()?.get_mut(&thread::current().id()) {
            open.undo.push(undo);
        }
        Ok(())
    }

    fn take_open(&self, tx_id: TransactionId) -> Result<OpenTransaction, StorageError> {
        let mut open = self.open_transactions()?;
        let me = thread::current().id();
        match open.get(&me) {
            Some(current) if current.id == tx_id => open
                .remove(&me)
                .ok_or_else(|| StorageError::unavailable(format!("no active transaction {}", tx_id))),
            _ => Err(StorageError::unavailable(format!("no active transaction {}", tx_id))),
        }
    }
}

impl DurableStore for InMemoryStore {
    fn provision_account(&self, account: &Account) -> Result<(), StorageError> {
        self.accounts_mut()?
            .entry(account.account_id)
            .or_insert_with(|| account.clone());
        Ok(())
    }

    fn fetch_account(&self, account_id: AccountId) -> Result<Option<Account>, StorageError> {
        Ok(self.accounts()?.get(&account_id).cloned())
    }

    fn fetch_all_accounts(&self) -> Result<Vec<Account>, StorageError> {
        Ok(self.accounts()?.values().cloned().collect())
    }

    fn fetch_recent_transactions(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> Result<Vec<Transaction>, StorageError> {
        let mut recent: Vec<Transaction> = self
            .transactions()?
            .iter()
            .filter(|t| t.involves(account_id))
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent.truncate(limit);
        Ok(recent)
    }

    fn fetch_all_transactions(&self) -> Result<Vec<Transaction>, StorageError> {
        Ok(self.transactions()?.clone())
    }

    fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StorageError> {
        {
            let mut transactions = self.transactions_mut()?;
            if transactions.iter().any(|t| t.id == transaction.id) {
                return Err(StorageError::DuplicateKey(transaction.id.to_string()));
            }
            transactions.push(transaction.clone());
        }
        self.record(Undo::Transaction(transaction.id))
    }

    fn adjust_balance(&self, account_id: AccountId, delta: Decimal) -> Result<(), StorageError> {
        {
            let mut accounts = self.accounts_mut()?;
            let account = accounts
                .get_mut(&account_id)
                .ok_or_else(|| StorageError::unavailable(format!("account not found: {}", account_id)))?;
            account.balance += delta;
        }
        self.record(Undo::Balance { account_id, delta })
    }

    fn insert_idempotency_key(&self, key: &str) -> Result<(), StorageError> {
        {
            let mut keys = self.idempotency_mut()?;
            if keys.contains_key(key) {
                return Err(StorageError::DuplicateKey(key.to_string()));
            }
            keys.insert(key.to_string(), IdempotencyRecord::new(key));
        }
        self.record(Undo::IdempotencyKey(key.to_string()))
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        let mut open = self.open_transactions()?;
        let me = thread::current().id();
        if open.contains_key(&me) {
            return Err(StorageError::unavailable("transaction already open on this thread"));
        }
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        open.insert(me, OpenTransaction { id: tx_id, undo: Vec::new() });
        tracing::debug!(tx_id, "Transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        self.take_open(tx_id)?;
        tracing::debug!(tx_id, "Transaction committed");
        Ok(())
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let open = self.take_open(tx_id)?;
        for undo in open.undo.into_iter().rev() {
            match undo {
                Undo::Transaction(id) => self.transactions_mut()?.retain(|t| t.id != id),
                Undo::IdempotencyKey(key) => {
                    self.idempotency_mut()?.remove(&key);
                }
                Undo::Balance { account_id, delta } => {
                    if let Some(account) = self.accounts_mut()?.get_mut(&account_id) {
                        account.balance -= delta;
                    }
                }
            }
        }
        tracing::debug!(tx_id, "Transaction rolled back");
        Ok(())
    }
}
