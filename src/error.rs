use minibank_core::{AccountId, AmountError, StorageError};
use thiserror::Error;

/// Failures surfaced to the caller of the ledger core.
///
/// Every kind except `StorageUnavailable` is a client error raised by
/// validation. `StorageUnavailable` keeps the backend fault as its source for
/// diagnostics; its display text never includes it.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Duplicate Idempotency-Key, please try again with a new key.")]
    DuplicateIdempotencyKey,
    #[error("Sender's account_id not found.")]
    SenderNotFound,
    #[error("Receiver's account_id not found.")]
    ReceiverNotFound,
    #[error("Sender's account is in Deleted status, not able to perform the transaction.")]
    SenderAccountDeleted,
    #[error("Receiver's account is in Deleted status, not able to perform the transaction.")]
    ReceiverAccountDeleted,
    #[error("Insufficient funds, not able to perform the transaction.")]
    InsufficientFunds,
    #[error("Sender's currency not supported.")]
    SenderCurrencyMismatch,
    #[error("Receiver's currency not supported.")]
    ReceiverCurrencyMismatch,
    #[error("Sending between same account numbers not permitted.")]
    SameAccountTransfer,
    #[error("Invalid account number.")]
    AccountNotFound(AccountId),
    #[error("{0}")]
    InvalidAmount(#[from] AmountError),
    #[error("Something went wrong, please try again or contact our support team.")]
    StorageUnavailable(#[source] StorageError),
}

impl LedgerError {
    pub fn is_client_error(&self) -> bool {
        !matches!(self, LedgerError::StorageUnavailable(_))
    }
}

impl From<StorageError> for LedgerError {
    fn from(err: StorageError) -> Self {
        LedgerError::StorageUnavailable(err)
    }
}
