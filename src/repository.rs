//! Cache-aside reads and write-through writes over a `DurableStore`.
//!
//! Every mutation reaches the durable store before the cache, so the store is
//! always at least as current as the cache. Idempotency keys are the one
//! exception: the key is cached first so a concurrent retry is rejected
//! without touching the store.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use minibank_core::{Account, AccountId, IdempotencyRecord, Transaction};
use rust_decimal::Decimal;

use crate::{
    cache::CacheStore,
    error::LedgerError,
    storage::{DurableStore, StorageError, TransactionId, MINI_STATEMENT_LIMIT},
};

/// Logs a durable fault with its cause and normalizes it.
fn durable<T>(op: &'static str, result: Result<T, StorageError>) -> Result<T, LedgerError> {
    result.map_err(|err| {
        tracing::error!(op, cause = err.cause(), "Durable store operation failed");
        LedgerError::from(err)
    })
}

/// Bulk reads are served from a region only after that region has been
/// filled from the store once; entries cached one by one before that do not
/// make it complete.
pub struct LedgerRepository {
    store: Arc<dyn DurableStore>,
    cache: CacheStore,
    accounts_loaded: AtomicBool,
    transactions_loaded: AtomicBool,
}

impl LedgerRepository {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            cache: CacheStore::new(),
            accounts_loaded: AtomicBool::new(false),
            transactions_loaded: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Primes the accounts and transactions regions from the store.
    pub fn warm_up(&self) -> Result<(), LedgerError> {
        let accounts = self.fetch_all_accounts()?.len();
        let transactions = self.fetch_all_transactions()?.len();
        tracing::info!(accounts, transactions, "Cache warmed up");
        Ok(())
    }

    pub fn fetch_account(&self, account_id: AccountId) -> Result<Option<Account>, LedgerError> {
        if let Some(account) = self.cache.accounts.get(account_id) {
            tracing::debug!(account_id, "Account served from cache");
            return Ok(Some(account));
        }
        tracing::debug!(account_id, "Account not in cache, reading store");
        let account = durable("fetch_account", self.store.fetch_account(account_id))?;
        match &account {
            Some(found) => self.cache.accounts.put(found.clone()),
            None => tracing::debug!(account_id, "Account not found in store"),
        }
        Ok(account)
    }

    pub fn fetch_all_accounts(&self) -> Result<Vec<Account>, LedgerError> {
        if self.accounts_loaded.load(Ordering::Acquire) {
            let cached = self.cache.accounts.all();
            if !cached.is_empty() {
                tracing::debug!(count = cached.len(), "Accounts served from cache");
                return Ok(cached);
            }
        }
        let accounts = durable("fetch_all_accounts", self.store.fetch_all_accounts())?;
        if !accounts.is_empty() {
            self.cache.accounts.replace_all(&accounts);
            self.accounts_loaded.store(true, Ordering::Release);
        }
        Ok(accounts)
    }

    pub fn fetch_all_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        if self.transactions_loaded.load(Ordering::Acquire) {
            let cached = self.cache.transactions.all();
            if !cached.is_empty() {
                tracing::debug!(count = cached.len(), "Transactions served from cache");
                return Ok(cached);
            }
        }
        let transactions = durable("fetch_all_transactions", self.store.fetch_all_transactions())?;
        if !transactions.is_empty() {
            self.cache.transactions.replace_all(&transactions);
            self.transactions_loaded.store(true, Ordering::Release);
        }
        Ok(transactions)
    }

    /// The newest transactions touching `account_id`, at most
    /// `MINI_STATEMENT_LIMIT` of them. No transactions is an empty list.
    pub fn fetch_mini_statement(&self, account_id: AccountId) -> Result<Vec<Transaction>, LedgerError> {
        let mut statement: Vec<Transaction> = self
            .fetch_all_transactions()?
            .into_iter()
            .filter(|t| t.involves(account_id))
            .collect();
        statement.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        statement.truncate(MINI_STATEMENT_LIMIT);
        Ok(statement)
    }

    pub fn insert_idempotency_key(&self, key: &str) -> Result<(), LedgerError> {
        if self.cache.idempotency.contains(key) {
            tracing::warn!(idempotency_key = key, "Idempotency key already used");
            return Err(LedgerError::DuplicateIdempotencyKey);
        }
        self.cache.idempotency.put(IdempotencyRecord::new(key));
        match self.store.insert_idempotency_key(key) {
            Ok(()) => Ok(()),
            Err(StorageError::DuplicateKey(_)) => {
                tracing::warn!(idempotency_key = key, "Idempotency key already stored");
                Err(LedgerError::DuplicateIdempotencyKey)
            }
            Err(err) => durable("insert_idempotency_key", Err(err)),
        }
    }

    pub fn save_transaction(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        durable("insert_transaction", self.store.insert_transaction(transaction))?;
        self.cache.transactions.put(transaction.clone());
        Ok(())
    }

    /// Applies `delta` in the store, then refreshes the cached account from
    /// the store's current row.
    pub fn update_balance(&self, account_id: AccountId, delta: Decimal) -> Result<(), LedgerError> {
        durable("adjust_balance", self.store.adjust_balance(account_id, delta))?;
        match durable("fetch_account", self.store.fetch_account(account_id))? {
            Some(account) => self.cache.accounts.put(account),
            None => {
                tracing::warn!(account_id, "Account vanished after balance update");
                self.cache.accounts.evict(account_id);
            }
        }
        Ok(())
    }

    pub fn begin_transaction(&self) -> Result<TransactionId, LedgerError> {
        durable("begin_transaction", self.store.begin_transaction())
    }

    pub fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), LedgerError> {
        durable("commit_transaction", self.store.commit_transaction(tx_id))
    }

    pub fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), LedgerError> {
        durable("rollback_transaction", self.store.rollback_transaction(tx_id))
    }

    /// Drops cache entries written by a transfer whose durable writes were
    /// rolled back, so the next read goes to the store.
    pub fn discard_transfer(&self, transaction: &Transaction) {
        self.cache.transactions.evict(transaction.id);
        self.cache.accounts.evict(transaction.sender);
        self.cache.accounts.evict(transaction.receiver);
        tracing::debug!(transaction_id = %transaction.id, "Discarded cached transfer state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{accounts, transaction_at, ProbeStore};
    use rust_decimal_macros::dec;
    use time::{Duration, OffsetDateTime};

    fn repository() -> (Arc<ProbeStore>, LedgerRepository) {
        let store = Arc::new(ProbeStore::new(accounts()));
        let repository = LedgerRepository::new(store.clone());
        (store, repository)
    }

    #[test]
    fn test_fetch_account_populates_cache_on_miss() {
        let (store, repository) = repository();

        let first = repository.fetch_account(111).unwrap().unwrap();
        let second = repository.fetch_account(111).unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(store.account_reads(), 1);
        assert_eq!(repository.cache().accounts.get(111), Some(first));
    }

    #[test]
    fn test_fetch_missing_account_does_not_cache() {
        let (store, repository) = repository();
        assert_eq!(repository.fetch_account(999).unwrap(), None);
        assert_eq!(repository.fetch_account(999).unwrap(), None);
        assert_eq!(store.account_reads(), 2);
        assert_eq!(repository.cache().accounts.get(999), None);
    }

    #[test]
    fn test_fetch_all_accounts_bulk_loads_once() {
        let (store, repository) = repository();
        let first = repository.fetch_all_accounts().unwrap();
        let second = repository.fetch_all_accounts().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert_eq!(store.bulk_reads(), 1);
    }

    #[test]
    fn test_fetch_all_accounts_ignores_partially_filled_region() {
        let (store, repository) = repository();
        repository.fetch_account(111).unwrap();
        let listed = repository.fetch_all_accounts().unwrap();
        assert_eq!(listed.len(), 4);
        assert_eq!(store.bulk_reads(), 1);

        repository.fetch_all_accounts().unwrap();
        assert_eq!(store.bulk_reads(), 1);
    }

    #[test]
    fn test_mini_statement_on_cold_repository_includes_stored_history() {
        let (store, repository) = repository();
        let start = OffsetDateTime::now_utc();
        store.seed_transaction(transaction_at(111, 222, start));

        let mut recent = transaction_at(222, 111, start + Duration::seconds(1));
        recent.reference_id = "new".to_string();
        repository.save_transaction(&recent).unwrap();

        let statement = repository.fetch_mini_statement(111).unwrap();
        assert_eq!(statement.len(), 2);
        assert_eq!(statement[0].reference_id, "new");
        assert_eq!(repository.cache().transactions.all().len(), 2);
    }

    #[test]
    fn test_mini_statement_sorted_and_limited() {
        let (store, repository) = repository();
        let start = OffsetDateTime::now_utc();
        // Inserted out of order so the store's natural order is not sorted.
        for i in [5, 1, 30, 12, 7, 0, 22, 3, 18, 9, 25, 2, 14, 27, 6, 11, 4, 20, 16, 8, 29, 10] {
            store.seed_transaction(transaction_at(111, 222, start + Duration::seconds(i)));
        }
        store.seed_transaction(transaction_at(333, 444, start + Duration::seconds(100)));

        let statement = repository.fetch_mini_statement(111).unwrap();
        assert_eq!(statement.len(), MINI_STATEMENT_LIMIT);
        assert_eq!(statement[0].timestamp, start + Duration::seconds(30));
        assert!(statement.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
        assert!(statement.iter().all(|t| t.involves(111)));
    }

    #[test]
    fn test_mini_statement_empty_for_account_without_transactions() {
        let (store, repository) = repository();
        store.seed_transaction(transaction_at(111, 222, OffsetDateTime::now_utc()));
        assert!(repository.fetch_mini_statement(444).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_idempotency_key_from_cache() {
        let (_, repository) = repository();
        repository.insert_idempotency_key("key-1").unwrap();
        assert!(matches!(
            repository.insert_idempotency_key("key-1"),
            Err(LedgerError::DuplicateIdempotencyKey)
        ));
        repository.insert_idempotency_key("key-2").unwrap();
    }

    #[test]
    fn test_duplicate_idempotency_key_from_store() {
        let (store, repository) = repository();
        // Key written by another process: absent from this cache.
        store.insert_idempotency_key("key-1").unwrap();
        assert!(matches!(
            repository.insert_idempotency_key("key-1"),
            Err(LedgerError::DuplicateIdempotencyKey)
        ));
    }

    #[test]
    fn test_update_balance_refreshes_cache_from_store() {
        let (_, repository) = repository();
        repository.fetch_account(111).unwrap();

        repository.update_balance(111, dec!(-250.00)).unwrap();

        let cached = repository.cache().accounts.get(111).unwrap();
        assert_eq!(cached.balance, dec!(750.00));
        let cold = LedgerRepository::new(repository.store.clone());
        assert_eq!(cold.fetch_account(111).unwrap(), Some(cached));
    }

    #[test]
    fn test_failed_store_write_leaves_cache_untouched() {
        let (store, repository) = repository();
        repository.fetch_account(111).unwrap();
        store.fail("adjust_balance");

        let err = repository.update_balance(111, dec!(-1)).unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));
        assert_eq!(repository.cache().accounts.get(111).unwrap().balance, dec!(1000.00));
    }

    #[test]
    fn test_save_transaction_writes_store_then_cache() {
        let (store, repository) = repository();
        let tx = transaction_at(111, 222, OffsetDateTime::now_utc());
        repository.save_transaction(&tx).unwrap();
        assert_eq!(store.fetch_all_transactions().unwrap(), vec![tx.clone()]);
        assert_eq!(repository.cache().transactions.all(), vec![tx.clone()]);

        store.fail("insert_transaction");
        let other = transaction_at(111, 222, OffsetDateTime::now_utc());
        assert!(repository.save_transaction(&other).is_err());
        assert_eq!(repository.cache().transactions.all(), vec![tx]);
    }

    #[test]
    fn test_same_tick_transactions_do_not_collide() {
        let (_, repository) = repository();
        let now = OffsetDateTime::now_utc();
        for _ in 0..3 {
            repository.save_transaction(&transaction_at(111, 222, now)).unwrap();
        }
        assert_eq!(repository.cache().transactions.all().len(), 3);
    }

    #[test]
    fn test_store_fault_surfaces_as_storage_unavailable() {
        let (store, repository) = repository();
        store.fail("fetch_account");
        let err = repository.fetch_account(111).unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));
        assert_eq!(
            err.to_string(),
            "Something went wrong, please try again or contact our support team."
        );
    }

    #[test]
    fn test_warm_up_primes_both_regions() {
        let (store, repository) = repository();
        store.seed_transaction(transaction_at(111, 222, OffsetDateTime::now_utc()));
        repository.warm_up().unwrap();
        assert_eq!(repository.cache().accounts.all().len(), 4);
        assert_eq!(repository.cache().transactions.all().len(), 1);

        repository.fetch_account(222).unwrap();
        assert_eq!(store.account_reads(), 0);
    }
}
