//! Funds transfer: validation state machine and execution.
//!
//! A transfer moves through `IdempotencyCheck -> SenderValidate ->
//! ReceiverValidate -> SameAccountCheck -> Execute -> Complete`. The first
//! failing stage ends the request. All durable writes of one transfer share a
//! single store transaction and are rolled back together on failure.

use std::{
    fmt::Display,
    sync::{Arc, Mutex, PoisonError},
};

use minibank_core::{
    format_amount, models::read::TRANSFER_COMPLETED, AmountError, Transaction,
    TransferConfirmation, TransferRequest,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{error::LedgerError, repository::LedgerRepository, storage::TransactionId};

/// How concurrent transfers are executed.
///
/// `Unserialized` matches the historical behaviour: nothing stops two
/// transfers from the same sender validating against the same balance and
/// both debiting it. `Serialized` runs one transfer at a time per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Unserialized,
    Serialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    IdempotencyCheck,
    SenderValidate,
    ReceiverValidate,
    SameAccountCheck,
    Execute,
    Complete,
}

impl Display for TransferStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransferStage::IdempotencyCheck => "idempotency_check",
            TransferStage::SenderValidate => "sender_validate",
            TransferStage::ReceiverValidate => "receiver_validate",
            TransferStage::SameAccountCheck => "same_account_check",
            TransferStage::Execute => "execute",
            TransferStage::Complete => "complete",
        };
        f.write_str(name)
    }
}

fn reject(stage: TransferStage, err: LedgerError) -> LedgerError {
    tracing::warn!(stage = %stage, error = %err, "Transfer rejected");
    err
}

pub struct TransferOrchestrator {
    repository: Arc<LedgerRepository>,
    mode: ExecutionMode,
    serial: Mutex<()>,
}

impl TransferOrchestrator {
    pub fn new(repository: Arc<LedgerRepository>, mode: ExecutionMode) -> Self {
        Self {
            repository,
            mode,
            serial: Mutex::new(()),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn transfer(&self, request: &TransferRequest) -> Result<TransferConfirmation, LedgerError> {
        let _serial = match self.mode {
            ExecutionMode::Serialized => {
                Some(self.serial.lock().unwrap_or_else(PoisonError::into_inner))
            }
            ExecutionMode::Unserialized => None,
        };

        let tx_id = self.repository.begin_transaction()?;
        if let Err(err) = self.validate(request) {
            self.rollback(tx_id);
            return Err(err);
        }

        let transaction = Transaction {
            id: Uuid::new_v4(),
            sender: request.sender,
            receiver: request.receiver,
            amount: request.amount,
            currency: request.currency,
            timestamp: OffsetDateTime::now_utc(),
            reference_id: request.reference_id.clone(),
        };

        // Cache entries are dropped only once the store is rolled back, so a
        // concurrent read cannot re-cache uncommitted state.
        if let Err(err) = self.execute(&transaction) {
            self.rollback(tx_id);
            self.repository.discard_transfer(&transaction);
            return Err(reject(TransferStage::Execute, err));
        }

        if let Err(err) = self.repository.commit_transaction(tx_id) {
            self.rollback(tx_id);
            self.repository.discard_transfer(&transaction);
            return Err(reject(TransferStage::Complete, err));
        }

        tracing::info!(
            transaction_id = %transaction.id,
            sender = transaction.sender,
            receiver = transaction.receiver,
            amount = %transaction.amount,
            currency = %transaction.currency,
            "Transfer completed"
        );
        Ok(TransferConfirmation {
            transaction_id: transaction.id,
            sender: transaction.sender,
            receiver: transaction.receiver,
            amount: format_amount(transaction.amount),
            status: TRANSFER_COMPLETED,
        })
    }

    fn rollback(&self, tx_id: TransactionId) {
        if let Err(err) = self.repository.rollback_transaction(tx_id) {
            tracing::error!(tx_id, error = %err, "Failed to roll back transfer");
        }
    }

    fn validate(&self, request: &TransferRequest) -> Result<(), LedgerError> {
        self.repository
            .insert_idempotency_key(&request.idempotency_key)
            .map_err(|e| reject(TransferStage::IdempotencyCheck, e))?;

        let stage = TransferStage::SenderValidate;
        if request.amount <= Decimal::ZERO {
            return Err(reject(stage, LedgerError::InvalidAmount(AmountError::NotPositive)));
        }
        let sender = self
            .repository
            .fetch_account(request.sender)
            .map_err(|e| reject(stage, e))?
            .ok_or_else(|| reject(stage, LedgerError::SenderNotFound))?;
        if sender.is_deleted() {
            return Err(reject(stage, LedgerError::SenderAccountDeleted));
        }
        if sender.balance < request.amount {
            tracing::debug!(available = %sender.balance, required = %request.amount, "Balance too low");
            return Err(reject(stage, LedgerError::InsufficientFunds));
        }
        if sender.currency != request.currency {
            return Err(reject(stage, LedgerError::SenderCurrencyMismatch));
        }

        let stage = TransferStage::ReceiverValidate;
        let receiver = self
            .repository
            .fetch_account(request.receiver)
            .map_err(|e| reject(stage, e))?
            .ok_or_else(|| reject(stage, LedgerError::ReceiverNotFound))?;
        if receiver.is_deleted() {
            return Err(reject(stage, LedgerError::ReceiverAccountDeleted));
        }
        if receiver.currency != request.currency {
            return Err(reject(stage, LedgerError::ReceiverCurrencyMismatch));
        }

        if request.sender == request.receiver {
            return Err(reject(TransferStage::SameAccountCheck, LedgerError::SameAccountTransfer));
        }
        Ok(())
    }

    fn execute(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        self.repository.save_transaction(transaction)?;
        self.repository
            .update_balance(transaction.sender, -transaction.amount)?;
        self.repository
            .update_balance(transaction.receiver, transaction.amount)
    }
}
