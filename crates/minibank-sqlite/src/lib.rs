//! SQLite durable store for minibank.

use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Condvar, Mutex, MutexGuard,
    },
    thread::{self, ThreadId},
};

use minibank_core::{
    Account, AccountId, AccountStatus, Currency, DurableStore, StorageError, Transaction,
    TransactionId,
};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

type Owner = Option<(ThreadId, TransactionId)>;
type AccountRow = (i64, String, String, String);
type TransactionRow = (String, i64, i64, String, String, i64, String);

const ACCOUNT_COLUMNS: &str = "account_id, currency, balance, account_status";
const TRANSACTION_COLUMNS: &str = "transaction_id, sender_account_id, receiver_account_id, amount, currency, transaction_date, reference_id";

/// Single-connection SQLite store.
///
/// Only one unit of work is open at a time: the thread that called
/// `begin_transaction` owns the connection until it commits or rolls back,
/// and every other thread's operations wait for that.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    tx_counter: AtomicU64,
    owner: Mutex<Owner>,
    released: Condvar,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(StorageError::unavailable)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(StorageError::unavailable)?;

        let store = Self {
            conn: Mutex::new(conn),
            tx_counter: AtomicU64::new(1),
            owner: Mutex::new(None),
            released: Condvar::new(),
        };
        store.init_schema()?;
        tracing::debug!(path, "SQLite store opened");
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.connection()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                account_id INTEGER PRIMARY KEY,
                currency TEXT NOT NULL,
                balance TEXT NOT NULL,
                account_status TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS transactions (
                transaction_id TEXT PRIMARY KEY,
                sender_account_id INTEGER NOT NULL,
                receiver_account_id INTEGER NOT NULL,
                amount TEXT NOT NULL,
                currency TEXT NOT NULL,
                transaction_date INTEGER NOT NULL,
                reference_id TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_sender
                ON transactions(sender_account_id, transaction_date);

            CREATE INDEX IF NOT EXISTS idx_transactions_receiver
                ON transactions(receiver_account_id, transaction_date);

            CREATE TABLE IF NOT EXISTS idempotency (
                idempotency_key TEXT NOT NULL UNIQUE,
                inserted_at INTEGER NOT NULL
            );
            ",
        )
        .map_err(StorageError::unavailable)?;
        Ok(())
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::unavailable("sqlite connection lock poisoned"))
    }

    /// Waits until no other thread owns an open unit of work.
    fn turn(&self) -> Result<MutexGuard<'_, Owner>, StorageError> {
        let me = thread::current().id();
        let mut owner = self
            .owner
            .lock()
            .map_err(|_| StorageError::unavailable("sqlite transaction state poisoned"))?;
        while matches!(*owner, Some((thread, _)) if thread != me) {
            owner = self
                .released
                .wait(owner)
                .map_err(|_| StorageError::unavailable("sqlite transaction state poisoned"))?;
        }
        Ok(owner)
    }

    fn finish_transaction(&self, tx_id: TransactionId, sql: &str) -> Result<(), StorageError> {
        let me = thread::current().id();
        let mut owner = self
            .owner
            .lock()
            .map_err(|_| StorageError::unavailable("sqlite transaction state poisoned"))?;
        if *owner != Some((me, tx_id)) {
            return Err(StorageError::unavailable(format!("no active transaction {}", tx_id)));
        }
        let result = self
            .connection()
            .and_then(|conn| conn.execute_batch(sql).map_err(StorageError::unavailable));
        *owner = None;
        drop(owner);
        self.released.notify_all();
        result
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation)
}

fn timestamp_to_nanos(ts: OffsetDateTime) -> Result<i64, StorageError> {
    i64::try_from(ts.unix_timestamp_nanos()).map_err(StorageError::unavailable)
}

fn nanos_to_timestamp(nanos: i64) -> Result<OffsetDateTime, StorageError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos)).map_err(StorageError::unavailable)
}

fn parse_decimal(s: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(s).map_err(|e| StorageError::unavailable(format!("Invalid decimal: {}", e)))
}

fn account_from_row(row: AccountRow) -> Result<Account, StorageError> {
    let (account_id, currency, balance, status) = row;
    Ok(Account {
        account_id,
        currency: Currency::from_str(&currency).map_err(StorageError::unavailable)?,
        balance: parse_decimal(&balance)?,
        status: AccountStatus::from_str(&status).map_err(StorageError::unavailable)?,
    })
}

fn transaction_from_row(row: TransactionRow) -> Result<Transaction, StorageError> {
    let (id, sender, receiver, amount, currency, date, reference_id) = row;
    Ok(Transaction {
        id: Uuid::parse_str(&id).map_err(StorageError::unavailable)?,
        sender,
        receiver,
        amount: parse_decimal(&amount)?,
        currency: Currency::from_str(&currency).map_err(StorageError::unavailable)?,
        timestamp: nanos_to_timestamp(date)?,
        reference_id,
    })
}

fn account_row(row: &rusqlite::Row) -> rusqlite::Result<AccountRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn transaction_row(row: &rusqlite::Row) -> rusqlite::Result<TransactionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn query_transactions<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Transaction>, StorageError> {
    let mut stmt = conn.prepare(sql).map_err(StorageError::unavailable)?;
    let rows = stmt
        .query_map(params, transaction_row)
        .map_err(StorageError::unavailable)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(StorageError::unavailable)?;
    rows.into_iter().map(transaction_from_row).collect()
}

impl DurableStore for SqliteStore {
    fn provision_account(&self, account: &Account) -> Result<(), StorageError> {
        let _turn = self.turn()?;
        let conn = self.connection()?;
        conn.execute(
            "INSERT OR IGNORE INTO accounts (account_id, currency, balance, account_status) VALUES (?1, ?2, ?3, ?4)",
            params![
                account.account_id,
                account.currency.code(),
                account.balance.to_string(),
                account.status.as_str()
            ],
        )
        .map_err(StorageError::unavailable)?;
        Ok(())
    }

    fn fetch_account(&self, account_id: AccountId) -> Result<Option<Account>, StorageError> {
        let _turn = self.turn()?;
        let conn = self.connection()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE account_id = ?1", ACCOUNT_COLUMNS),
                params![account_id],
                account_row,
            )
            .optional()
            .map_err(StorageError::unavailable)?;
        row.map(account_from_row).transpose()
    }

    fn fetch_all_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let _turn = self.turn()?;
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM accounts ORDER BY account_id", ACCOUNT_COLUMNS))
            .map_err(StorageError::unavailable)?;
        let rows = stmt
            .query_map([], account_row)
            .map_err(StorageError::unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::unavailable)?;
        rows.into_iter().map(account_from_row).collect()
    }

    fn fetch_recent_transactions(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> Result<Vec<Transaction>, StorageError> {
        let _turn = self.turn()?;
        let conn = self.connection()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        query_transactions(
            &conn,
            &format!(
                "SELECT {} FROM transactions
                 WHERE sender_account_id = ?1 OR receiver_account_id = ?1
                 ORDER BY transaction_date DESC LIMIT ?2",
                TRANSACTION_COLUMNS
            ),
            params![account_id, limit],
        )
    }

    fn fetch_all_transactions(&self) -> Result<Vec<Transaction>, StorageError> {
        let _turn = self.turn()?;
        let conn = self.connection()?;
        query_transactions(
            &conn,
            &format!("SELECT {} FROM transactions ORDER BY transaction_date", TRANSACTION_COLUMNS),
            [],
        )
    }

    fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StorageError> {
        let _turn = self.turn()?;
        let conn = self.connection()?;
        conn.execute(
            &format!(
                "INSERT INTO transactions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                TRANSACTION_COLUMNS
            ),
            params![
                transaction.id.to_string(),
                transaction.sender,
                transaction.receiver,
                transaction.amount.to_string(),
                transaction.currency.code(),
                timestamp_to_nanos(transaction.timestamp)?,
                transaction.reference_id
            ],
        )
        .map_err(StorageError::unavailable)?;
        Ok(())
    }

    fn adjust_balance(&self, account_id: AccountId, delta: Decimal) -> Result<(), StorageError> {
        let _turn = self.turn()?;
        let conn = self.connection()?;
        let current: String = conn
            .query_row(
                "SELECT balance FROM accounts WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StorageError::unavailable(format!("account not found: {}", account_id))
                }
                _ => StorageError::unavailable(e),
            })?;
        let balance = parse_decimal(&current)? + delta;
        conn.execute(
            "UPDATE accounts SET balance = ?1 WHERE account_id = ?2",
            params![balance.to_string(), account_id],
        )
        .map_err(StorageError::unavailable)?;
        Ok(())
    }

    fn insert_idempotency_key(&self, key: &str) -> Result<(), StorageError> {
        let _turn = self.turn()?;
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO idempotency (idempotency_key, inserted_at) VALUES (?1, ?2)",
            params![key, timestamp_to_nanos(OffsetDateTime::now_utc())?],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StorageError::DuplicateKey(key.to_string())
            } else {
                StorageError::unavailable(e)
            }
        })?;
        Ok(())
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        let mut owner = self.turn()?;
        if owner.is_some() {
            return Err(StorageError::unavailable("transaction already open on this thread"));
        }
        self.connection()?
            .execute_batch("SAVEPOINT minibank_tx")
            .map_err(StorageError::unavailable)?;
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        *owner = Some((thread::current().id(), tx_id));
        tracing::debug!(tx_id, "SQLite transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        self.finish_transaction(tx_id, "RELEASE SAVEPOINT minibank_tx")?;
        tracing::debug!(tx_id, "SQLite transaction committed");
        Ok(())
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        self.finish_transaction(
            tx_id,
            "ROLLBACK TO SAVEPOINT minibank_tx; RELEASE SAVEPOINT minibank_tx",
        )?;
        tracing::debug!(tx_id, "SQLite transaction rolled back");
        Ok(())
    }
}
