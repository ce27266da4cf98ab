//! SQLite persistence layer.
//!
//! RULE: Only the store modules talk to the database. Managers call store
//! functions — they never execute SQL directly.
//!
//! The store models a hosted document database with atomic optimistic
//! transactions: mutable records carry a version column, writes inside a
//! transaction are guarded on the version that was read, and a failed guard
//! (or lock contention) aborts the whole read-compute-write block so
//! `run_transaction` can re-run it against a fresh snapshot.

pub mod account;
pub mod catalog;
pub mod ledger;
pub mod potion;
pub mod purchase;
pub mod usage;

use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use rusqlite::{Connection, OpenFlags, Transaction};
use std::thread;
use std::time::Duration;

/// Maximum re-runs of an optimistic transaction before surfacing
/// `TransientConflict` to the caller.
const TXN_MAX_ATTEMPTS: u32 = 5;

/// Base backoff between attempts; doubles each retry, with jitter.
const TXN_BACKOFF_MS: u64 = 8;

/// Upper bound on writes per chunk in bulk-maintenance paths.
pub const BATCH_MAX_OPS: usize = 400;

pub struct EconomyStore {
    conn: Connection,
    path: Option<String>, // None for plain :memory:, Some(path) otherwise
}

impl EconomyStore {
    pub fn open(path: &str) -> LedgerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only matters for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_millis(5000))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an isolated in-memory database.
    pub fn in_memory() -> LedgerResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Open a shared-cache in-memory database: `reopen()` connects to the
    /// same data for as long as one connection stays alive. Used by tests
    /// and maintenance dry-runs.
    pub fn in_memory_shared(tag: &str) -> LedgerResult<Self> {
        Self::open(&format!("file:economy_{tag}?mode=memory&cache=shared"))
    }

    /// Open a new connection to the same database.
    /// For plain in-memory databases this returns a new, isolated database —
    /// use `in_memory_shared` when several components must see one store.
    pub fn reopen(&self) -> LedgerResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> LedgerResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_accounts.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/002_purchases.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/003_effects_usage.sql"))?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` as one atomic read-compute-write block.
    ///
    /// The closure may be re-run: version-guard failures and lock contention
    /// roll the transaction back and retry with jittered backoff, up to
    /// `TXN_MAX_ATTEMPTS`. Domain failures abort immediately and nothing is
    /// written. Exhausting the retries surfaces `TransientConflict`.
    pub fn run_transaction<T>(
        &self,
        mut f: impl FnMut(&Transaction<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut backoff_ms = TXN_BACKOFF_MS;
        for attempt in 1..=TXN_MAX_ATTEMPTS {
            match self.attempt_transaction(&mut f) {
                Ok(value) => return Ok(value),
                Err(LedgerError::TransientConflict) => {}
                Err(LedgerError::Database(e)) if is_busy(&e) => {}
                Err(e) => return Err(e),
            }
            if attempt < TXN_MAX_ATTEMPTS {
                let jitter = rand::thread_rng().gen_range(0..=backoff_ms);
                log::debug!(
                    "store: transaction conflict, retry {attempt}/{TXN_MAX_ATTEMPTS} in {}ms",
                    backoff_ms + jitter
                );
                thread::sleep(Duration::from_millis(backoff_ms + jitter));
                backoff_ms *= 2;
            }
        }
        Err(LedgerError::TransientConflict)
    }

    fn attempt_transaction<T>(
        &self,
        f: &mut impl FnMut(&Transaction<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        // Dropping an uncommitted transaction rolls it back.
        let tx = self.conn.unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Non-transactional bulk writer for maintenance paths: applies `apply`
    /// to every item, committing one transaction per chunk of `max_chunk`
    /// writes. Not atomic across chunks — callers must tolerate a partial
    /// sweep being resumed later.
    pub fn batch_write<T>(
        &self,
        items: &[T],
        max_chunk: usize,
        mut apply: impl FnMut(&Transaction<'_>, &T) -> LedgerResult<()>,
    ) -> LedgerResult<usize> {
        if max_chunk == 0 {
            return Err(LedgerError::Validation("batch chunk size must be positive".into()));
        }
        let mut written = 0usize;
        for chunk in items.chunks(max_chunk) {
            let tx = self.conn.unchecked_transaction()?;
            for item in chunk {
                apply(&tx, item)?;
            }
            tx.commit()?;
            written += chunk.len();
            log::debug!("store: batch chunk committed ({written}/{} rows)", items.len());
        }
        Ok(written)
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

/// Canonical timestamp encoding: fixed-width RFC 3339 in UTC, so lexical
/// ordering on the column matches chronological ordering.
pub(crate) fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> LedgerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| anyhow::anyhow!("invalid timestamp '{s}' in store: {e}").into())
}
