//! Read-side views over the repository, shaped for presentation.

use std::sync::Arc;

use minibank_core::{format_amount, AccountId, AccountStatus, Currency, Direction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{error::LedgerError, repository::LedgerRepository};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountBalance {
    pub account_id: AccountId,
    pub currency: Currency,
    pub balance: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDetails {
    pub account_id: AccountId,
    pub currency: Currency,
    pub balance: String,
    pub status: AccountStatus,
}

/// One mini statement entry as seen from the viewing account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementLine {
    pub transaction_id: Uuid,
    pub direction: Direction,
    pub counterparty: AccountId,
    pub amount: String,
    pub currency: Currency,
    pub timestamp: OffsetDateTime,
    pub reference_id: String,
}

pub struct AccountQueries {
    repository: Arc<LedgerRepository>,
}

impl AccountQueries {
    pub fn new(repository: Arc<LedgerRepository>) -> Self {
        Self { repository }
    }

    pub fn account_balance(&self, account_id: AccountId) -> Result<AccountBalance, LedgerError> {
        let account = self
            .repository
            .fetch_account(account_id)?
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        Ok(AccountBalance {
            account_id: account.account_id,
            currency: account.currency,
            balance: format_amount(account.balance),
        })
    }

    pub fn list_accounts(&self) -> Result<Vec<AccountDetails>, LedgerError> {
        let accounts = self.repository.fetch_all_accounts()?;
        Ok(accounts
            .into_iter()
            .map(|account| AccountDetails {
                account_id: account.account_id,
                currency: account.currency,
                balance: format_amount(account.balance),
                status: account.status,
            })
            .collect())
    }

    /// Up to the 20 most recent transactions involving the account, newest
    /// first. An account with no activity yields an empty statement.
    pub fn mini_statement(&self, account_id: AccountId) -> Result<Vec<StatementLine>, LedgerError> {
        if self.repository.fetch_account(account_id)?.is_none() {
            return Err(LedgerError::AccountNotFound(account_id));
        }
        let transactions = self.repository.fetch_mini_statement(account_id)?;
        Ok(transactions
            .into_iter()
            .filter_map(|tx| {
                let direction = tx.direction_for(account_id)?;
                let counterparty = tx.counterparty_of(account_id)?;
                Some(StatementLine {
                    transaction_id: tx.id,
                    direction,
                    counterparty,
                    amount: format_amount(tx.amount),
                    currency: tx.currency,
                    timestamp: tx.timestamp,
                    reference_id: tx.reference_id,
                })
            })
            .collect())
    }
}
