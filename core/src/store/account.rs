//! Account rows: wallet balance plus entitlement counters.
//!
//! The entitlement map is stored as a JSON document in the row and
//! deserialized once here, so business logic always sees fully-defaulted
//! typed records.

use super::{fmt_ts, parse_ts};
use crate::entitlement::EntitlementType;
use crate::error::{LedgerError, LedgerResult};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct AccountRow {
    pub user_id:      UserId,
    pub balance:      i64,
    pub entitlements: BTreeMap<EntitlementType, i64>,
    pub version:      i64,
    pub created_at:   DateTime<Utc>,
    pub updated_at:   DateTime<Utc>,
}

pub fn get(conn: &Connection, user_id: &str) -> LedgerResult<Option<AccountRow>> {
    let row = conn
        .query_row(
            "SELECT user_id, balance, entitlements, version, created_at, updated_at
             FROM account WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some((user_id, balance, entitlements, version, created_at, updated_at)) => {
            Ok(Some(AccountRow {
                user_id,
                balance,
                entitlements: serde_json::from_str(&entitlements)?,
                version,
                created_at: parse_ts(&created_at)?,
                updated_at: parse_ts(&updated_at)?,
            }))
        }
    }
}

/// Insert a zero-balance account if none exists, then return the row.
pub fn ensure(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> LedgerResult<AccountRow> {
    conn.execute(
        "INSERT OR IGNORE INTO account (user_id, balance, entitlements, version, created_at, updated_at)
         VALUES (?1, 0, '{}', 0, ?2, ?2)",
        params![user_id, fmt_ts(now)],
    )?;
    get(conn, user_id)?.ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))
}

/// Version-guarded write. Fails with `TransientConflict` when the row moved
/// on since `row.version` was read — the surrounding transaction is re-run.
pub fn update(conn: &Connection, row: &AccountRow, now: DateTime<Utc>) -> LedgerResult<()> {
    let entitlements = serde_json::to_string(&row.entitlements)?;
    let changed = conn.execute(
        "UPDATE account
         SET balance = ?1, entitlements = ?2, version = version + 1, updated_at = ?3
         WHERE user_id = ?4 AND version = ?5",
        params![row.balance, entitlements, fmt_ts(now), row.user_id, row.version],
    )?;
    if changed == 0 {
        return Err(LedgerError::TransientConflict);
    }
    Ok(())
}
