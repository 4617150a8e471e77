//! Volatile cache in front of the durable store.
//!
//! The cache is split into one typed region per entity. A region that faults
//! (a poisoned lock) behaves like an empty one: reads miss, writes are
//! dropped, and the fault is logged. Nothing here ever returns an error.

use std::{collections::BTreeMap, sync::RwLock};

use minibank_core::{Account, AccountId, IdempotencyRecord, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

pub const ACCOUNTS_REGION: &str = "accounts";
pub const TRANSACTIONS_REGION: &str = "transactions";
pub const IDEMPOTENCY_REGION: &str = "idempotency";

fn fault(region: &'static str, op: &'static str) {
    tracing::error!(region, op, "Cache region unavailable, treating as miss");
}

struct Region<K, V> {
    name: &'static str,
    entries: RwLock<BTreeMap<K, V>>,
}

impl<K: Ord, V: Clone> Region<K, V> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        match self.entries.read() {
            Ok(entries) => entries.get(key).cloned(),
            Err(_) => {
                fault(self.name, "get");
                None
            }
        }
    }

    fn put(&self, key: K, value: V) {
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(key, value);
            }
            Err(_) => fault(self.name, "put"),
        }
    }

    /// Clears the region and fills it with `entries` under one write lock.
    fn bulk_replace(&self, replacement: impl IntoIterator<Item = (K, V)>) {
        match self.entries.write() {
            Ok(mut entries) => {
                entries.clear();
                entries.extend(replacement);
            }
            Err(_) => fault(self.name, "bulk_replace"),
        }
    }

    fn contains_key(&self, key: &K) -> bool {
        match self.entries.read() {
            Ok(entries) => entries.contains_key(key),
            Err(_) => {
                fault(self.name, "contains_key");
                false
            }
        }
    }

    fn values(&self) -> Vec<V> {
        match self.entries.read() {
            Ok(entries) => entries.values().cloned().collect(),
            Err(_) => {
                fault(self.name, "values");
                Vec::new()
            }
        }
    }

    fn remove(&self, key: &K) {
        match self.entries.write() {
            Ok(mut entries) => {
                entries.remove(key);
            }
            Err(_) => fault(self.name, "remove"),
        }
    }

    #[cfg(test)]
    fn poison(&self)
    where
        K: Send + Sync,
        V: Send + Sync,
    {
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = self.entries.write();
                    panic!("poisoning {} region", self.name);
                })
                .join();
        });
    }
}

/// Accounts keyed by account id.
pub struct AccountCache(Region<AccountId, Account>);

impl AccountCache {
    fn new() -> Self {
        Self(Region::new(ACCOUNTS_REGION))
    }

    pub fn get(&self, account_id: AccountId) -> Option<Account> {
        self.0.get(&account_id)
    }

    /// Inserts or replaces the entry for `account.account_id`.
    pub fn put(&self, account: Account) {
        self.0.put(account.account_id, account);
    }

    pub fn replace_all(&self, accounts: &[Account]) {
        self.0
            .bulk_replace(accounts.iter().map(|a| (a.account_id, a.clone())));
    }

    /// Current contents ordered by account id.
    pub fn all(&self) -> Vec<Account> {
        self.0.values()
    }

    pub fn evict(&self, account_id: AccountId) {
        self.0.remove(&account_id);
    }
}

/// Transactions keyed by their own id. The key only exists to make bulk
/// enumeration possible; lookups by key are never needed.
pub struct TransactionCache(Region<Uuid, Transaction>);

impl TransactionCache {
    fn new() -> Self {
        Self(Region::new(TRANSACTIONS_REGION))
    }

    pub fn put(&self, transaction: Transaction) {
        self.0.put(transaction.id, transaction);
    }

    pub fn replace_all(&self, transactions: &[Transaction]) {
        self.0
            .bulk_replace(transactions.iter().map(|t| (t.id, t.clone())));
    }

    pub fn all(&self) -> Vec<Transaction> {
        self.0.values()
    }

    pub fn evict(&self, transaction_id: Uuid) {
        self.0.remove(&transaction_id);
    }
}

/// Idempotency keys seen by this process, with their insertion time.
pub struct IdempotencyCache(Region<String, OffsetDateTime>);

impl IdempotencyCache {
    fn new() -> Self {
        Self(Region::new(IDEMPOTENCY_REGION))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(&key.to_string())
    }

    pub fn inserted_at(&self, key: &str) -> Option<OffsetDateTime> {
        self.0.get(&key.to_string())
    }

    pub fn put(&self, record: IdempotencyRecord) {
        self.0.put(record.key, record.inserted_at);
    }
}

pub struct CacheStore {
    pub accounts: AccountCache,
    pub transactions: TransactionCache,
    pub idempotency: IdempotencyCache,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            accounts: AccountCache::new(),
            transactions: TransactionCache::new(),
            idempotency: IdempotencyCache::new(),
        }
    }
}
