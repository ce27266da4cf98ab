//! Per (user, bundle) purchase records backing the limit policy.

use super::{fmt_ts, parse_ts};
use crate::error::{LedgerError, LedgerResult};
use crate::policy::PurchaseRecord;
use rusqlite::{params, Connection, OptionalExtension};

pub fn get(
    conn: &Connection,
    user_id: &str,
    bundle_id: &str,
) -> LedgerResult<Option<PurchaseRecord>> {
    let row = conn
        .query_row(
            "SELECT user_id, bundle_id, count, first_purchase_at, last_purchase_at, version
             FROM bundle_purchase WHERE user_id = ?1 AND bundle_id = ?2",
            params![user_id, bundle_id],
            map_row,
        )
        .optional()?;
    row.map(finish_row).transpose()
}

pub fn list_for_user(conn: &Connection, user_id: &str) -> LedgerResult<Vec<PurchaseRecord>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, bundle_id, count, first_purchase_at, last_purchase_at, version
         FROM bundle_purchase WHERE user_id = ?1",
    )?;
    let rows = stmt
        .query_map(params![user_id], map_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(finish_row).collect()
}

pub fn insert(conn: &Connection, record: &PurchaseRecord) -> LedgerResult<()> {
    let result = conn.execute(
        "INSERT INTO bundle_purchase
             (user_id, bundle_id, count, first_purchase_at, last_purchase_at, version)
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        params![
            record.user_id,
            record.bundle_id,
            record.count,
            fmt_ts(record.first_purchase_at),
            fmt_ts(record.last_purchase_at),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        // Two transactions raced to create the first record: re-run the block.
        Err(e) if is_constraint(&e) => Err(LedgerError::TransientConflict),
        Err(e) => Err(e.into()),
    }
}

/// Version-guarded write; a failed guard re-runs the surrounding transaction.
pub fn update(conn: &Connection, record: &PurchaseRecord) -> LedgerResult<()> {
    let changed = conn.execute(
        "UPDATE bundle_purchase
         SET count = ?1, last_purchase_at = ?2, version = version + 1
         WHERE user_id = ?3 AND bundle_id = ?4 AND version = ?5",
        params![
            record.count,
            fmt_ts(record.last_purchase_at),
            record.user_id,
            record.bundle_id,
            record.version,
        ],
    )?;
    if changed == 0 {
        return Err(LedgerError::TransientConflict);
    }
    Ok(())
}

type RawRow = (String, String, i64, String, String, i64);

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn finish_row(raw: RawRow) -> LedgerResult<PurchaseRecord> {
    let (user_id, bundle_id, count, first_purchase_at, last_purchase_at, version) = raw;
    Ok(PurchaseRecord {
        user_id,
        bundle_id,
        count,
        first_purchase_at: parse_ts(&first_purchase_at)?,
        last_purchase_at: parse_ts(&last_purchase_at)?,
        version,
    })
}

fn is_constraint(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
