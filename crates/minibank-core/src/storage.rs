use rust_decimal::Decimal;

use crate::models::{Account, AccountId, Transaction};

use thiserror::Error;

/// Number of entries in a mini statement.
pub const MINI_STATEMENT_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    /// Any other backend fault. The cause is kept for diagnostics and is not
    /// part of the display text.
    #[error("storage unavailable")]
    Unavailable { cause: String },
}

impl StorageError {
    pub fn unavailable(cause: impl std::fmt::Display) -> Self {
        StorageError::Unavailable {
            cause: cause.to_string(),
        }
    }

    pub fn cause(&self) -> &str {
        match self {
            StorageError::DuplicateKey(key) => key,
            StorageError::Unavailable { cause } => cause,
        }
    }
}

pub type TransactionId = u64;

/// Authoritative persistence for accounts, transactions and idempotency keys.
///
/// A unit of work opened with `begin_transaction` is bound to the calling
/// thread; every write that thread performs until `commit_transaction` or
/// `rollback_transaction` belongs to it.
pub trait DurableStore: Send + Sync {
    /// Inserts an account unless one with the same id exists. Used for seed
    /// data and external provisioning only.
    fn provision_account(&self, account: &Account) -> Result<(), StorageError>;

    fn fetch_account(&self, account_id: AccountId) -> Result<Option<Account>, StorageError>;
    fn fetch_all_accounts(&self) -> Result<Vec<Account>, StorageError>;
    /// Transactions where the account is sender or receiver, newest first.
    fn fetch_recent_transactions(&self, account_id: AccountId, limit: usize) -> Result<Vec<Transaction>, StorageError>;
    fn fetch_all_transactions(&self) -> Result<Vec<Transaction>, StorageError>;
    fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StorageError>;
    /// Adds `delta` (possibly negative) to the balance. Callers serialize
    /// concurrent adjustments of the same account.
    fn adjust_balance(&self, account_id: AccountId, delta: Decimal) -> Result<(), StorageError>;
    /// Fails with `StorageError::DuplicateKey` when the key already exists.
    fn insert_idempotency_key(&self, key: &str) -> Result<(), StorageError>;

    fn begin_transaction(&self) -> Result<TransactionId, StorageError>;
    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError>;
    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError>;
}
