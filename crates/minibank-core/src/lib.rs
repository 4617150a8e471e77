//! Core types and traits for minibank durable stores.
//!
//! This crate provides the `DurableStore` trait and the ledger domain model,
//! so storage backends can live in separate crates.

pub mod amount;
pub mod models;
pub mod storage;

// Re-export key types at crate root for convenience
pub use amount::{format_amount, parse_amount, AmountError};
pub use models::{
    Account, AccountId, AccountStatus, Currency, Direction, IdempotencyRecord, ParseEnumError,
    Transaction,
};
pub use models::read::TransferConfirmation;
pub use models::write::TransferRequest;
pub use storage::{DurableStore, StorageError, TransactionId, MINI_STATEMENT_LIMIT};
