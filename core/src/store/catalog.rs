//! Store-backed bundle catalog documents.
//!
//! Each bundle is persisted as one JSON document; the `active` and `ord`
//! columns are denormalized for listing without parsing every row.

use super::fmt_ts;
use crate::config::BundleDefinition;
use crate::error::LedgerResult;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

pub fn load_all(conn: &Connection) -> LedgerResult<Vec<BundleDefinition>> {
    let mut stmt =
        conn.prepare("SELECT bundle_id, definition FROM bundle_catalog ORDER BY ord ASC")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut bundles = Vec::with_capacity(rows.len());
    for (bundle_id, definition) in rows {
        match serde_json::from_str::<BundleDefinition>(&definition) {
            Ok(bundle) => bundles.push(bundle),
            Err(e) => log::warn!("catalog: skipping malformed bundle '{bundle_id}': {e}"),
        }
    }
    Ok(bundles)
}

pub fn upsert(conn: &Connection, bundle: &BundleDefinition, now: DateTime<Utc>) -> LedgerResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO bundle_catalog (bundle_id, definition, active, ord, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            bundle.id,
            serde_json::to_string(bundle)?,
            bundle.active as i64,
            bundle.order,
            fmt_ts(now),
        ],
    )?;
    Ok(())
}

pub fn count(conn: &Connection) -> LedgerResult<i64> {
    conn.query_row("SELECT COUNT(*) FROM bundle_catalog", [], |row| row.get(0))
        .map_err(Into::into)
}
