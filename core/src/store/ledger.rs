//! Append-only ledger entries — the audit trail for every balance change.
//!
//! RULE: entries are inserted once and never updated or deleted. Refunds
//! reference the original entry id in their metadata instead of mutating it.

use super::{fmt_ts, parse_ts};
use crate::error::{LedgerError, LedgerResult};
use crate::wallet::{HistoryFilter, LedgerEntry, LedgerKind, LedgerStats};
use rusqlite::{params, Connection, OptionalExtension};

pub fn append(conn: &Connection, entry: &LedgerEntry) -> LedgerResult<()> {
    // The recorder seam: callers must hand over a consistent entry.
    if entry.balance_after != entry.balance_before + entry.amount {
        return Err(LedgerError::Validation(format!(
            "inconsistent ledger entry: {} + {} != {}",
            entry.balance_before, entry.amount, entry.balance_after
        )));
    }

    let result = conn.execute(
        "INSERT INTO ledger_entry
             (id, user_id, kind, amount, balance_before, balance_after,
              description, metadata, idempotency_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.id,
            entry.user_id,
            entry.kind.as_str(),
            entry.amount,
            entry.balance_before,
            entry.balance_after,
            entry.description,
            serde_json::to_string(&entry.metadata)?,
            entry.idempotency_key,
            fmt_ts(entry.created_at),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            let key = entry.idempotency_key.clone().unwrap_or_default();
            Err(LedgerError::DuplicateRequest { idempotency_key: key })
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get(conn: &Connection, id: &str) -> LedgerResult<Option<LedgerEntry>> {
    let row = conn
        .query_row(
            &format!("{SELECT_COLS} FROM ledger_entry WHERE id = ?1"),
            params![id],
            map_row,
        )
        .optional()?;
    row.map(finish_row).transpose()
}

pub fn idempotency_key_exists(conn: &Connection, key: &str) -> LedgerResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM ledger_entry WHERE idempotency_key = ?1",
        params![key],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// True when a refund entry already references `entry_id`.
pub fn refund_exists_for(conn: &Connection, entry_id: &str) -> LedgerResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM ledger_entry
         WHERE kind = 'refund' AND json_extract(metadata, '$.refund_of') = ?1",
        params![entry_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn list_for_user(
    conn: &Connection,
    user_id: &str,
    filter: &HistoryFilter,
) -> LedgerResult<Vec<LedgerEntry>> {
    let kind = filter.kind.map(|k| k.as_str());
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COLS} FROM ledger_entry
         WHERE user_id = ?1 AND (?2 IS NULL OR kind = ?2)
         ORDER BY created_at DESC
         LIMIT ?3 OFFSET ?4"
    ))?;
    let rows = stmt
        .query_map(
            params![user_id, kind, filter.limit as i64, filter.offset as i64],
            map_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(finish_row).collect()
}

pub fn stats_for_user(conn: &Connection, user_id: &str) -> LedgerResult<LedgerStats> {
    conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN amount > 0 THEN amount ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN amount < 0 THEN -amount ELSE 0 END), 0)
         FROM ledger_entry WHERE user_id = ?1",
        params![user_id],
        |row| {
            Ok(LedgerStats {
                entry_count:    row.get(0)?,
                total_credited: row.get(1)?,
                total_debited:  row.get(2)?,
            })
        },
    )
    .map_err(Into::into)
}

const SELECT_COLS: &str = "SELECT id, user_id, kind, amount, balance_before, balance_after,
       description, metadata, idempotency_key, created_at";

type RawRow = (
    String,
    String,
    String,
    i64,
    i64,
    i64,
    String,
    String,
    Option<String>,
    String,
);

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn finish_row(raw: RawRow) -> LedgerResult<LedgerEntry> {
    let (id, user_id, kind, amount, balance_before, balance_after, description, metadata, idempotency_key, created_at) =
        raw;
    Ok(LedgerEntry {
        id,
        user_id,
        kind: LedgerKind::parse(&kind)
            .ok_or_else(|| anyhow::anyhow!("unknown ledger kind '{kind}' in store"))?,
        amount,
        balance_before,
        balance_after,
        description,
        metadata: serde_json::from_str(&metadata)?,
        idempotency_key,
        created_at: parse_ts(&created_at)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
