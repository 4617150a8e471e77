use std::{fmt::Display, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

pub mod read;
pub mod write;

pub type AccountId = i64;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Gbp,
    Nok,
    Eur,
    Usd,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Gbp => "GBP",
            Currency::Nok => "NOK",
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
        }
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GBP" => Ok(Currency::Gbp),
            "NOK" => Ok(Currency::Nok),
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            _ => Err(ParseEnumError {
                kind: "currency",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    #[default]
    Active,
    Deleted,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Deleted => "DELETED",
        }
    }
}

impl Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(AccountStatus::Active),
            "DELETED" => Ok(AccountStatus::Deleted),
            _ => Err(ParseEnumError {
                kind: "account status",
                value: s.to_string(),
            }),
        }
    }
}

/// A ledger account. Balances only change through delta application, and
/// accounts are never removed: `Deleted` just takes them out of service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub currency: Currency,
    pub balance: Decimal,
    #[serde(default)]
    pub status: AccountStatus,
}

impl Account {
    pub fn is_deleted(&self) -> bool {
        self.status == AccountStatus::Deleted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Debit,
    Credit,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Debit => f.write_str("DEBIT"),
            Direction::Credit => f.write_str("CREDIT"),
        }
    }
}

/// An executed transfer. Immutable once recorded.
///
/// `id` is generated when the transfer executes and doubles as the cache key,
/// so two transactions recorded within the same clock tick never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: Uuid,
    pub sender: AccountId,
    pub receiver: AccountId,
    pub amount: Decimal,
    pub currency: Currency,
    pub timestamp: OffsetDateTime,
    pub reference_id: String,
}

impl Transaction {
    pub fn involves(&self, account_id: AccountId) -> bool {
        self.sender == account_id || self.receiver == account_id
    }

    /// Direction of this transaction as seen from `account_id`, or `None`
    /// when the account is not a party to it.
    pub fn direction_for(&self, account_id: AccountId) -> Option<Direction> {
        if self.sender == account_id {
            Some(Direction::Debit)
        } else if self.receiver == account_id {
            Some(Direction::Credit)
        } else {
            None
        }
    }

    pub fn counterparty_of(&self, account_id: AccountId) -> Option<AccountId> {
        match self.direction_for(account_id)? {
            Direction::Debit => Some(self.receiver),
            Direction::Credit => Some(self.sender),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub inserted_at: OffsetDateTime,
}

impl IdempotencyRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            inserted_at: OffsetDateTime::now_utc(),
        }
    }
}
