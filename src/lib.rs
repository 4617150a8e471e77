pub mod cache;
pub mod config;
pub mod error;
pub mod queries;
pub mod repository;
pub mod storage;
pub mod transfer;

#[cfg(test)]
mod test_support;

pub use error::LedgerError;
pub use queries::{AccountBalance, AccountDetails, AccountQueries, StatementLine};
pub use repository::LedgerRepository;
pub use transfer::{ExecutionMode, TransferOrchestrator, TransferStage};
