//! Timed potion-effect rows, keyed by (user, potion type, character).

use super::{fmt_ts, parse_ts};
use crate::error::LedgerResult;
use crate::potion::{ActivePotionEffect, PotionType};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

/// Empty string in the character column means "account-wide".
fn character_key(character_id: Option<&str>) -> &str {
    character_id.unwrap_or("")
}

pub fn get(
    conn: &Connection,
    user_id: &str,
    potion_type: PotionType,
    character_id: Option<&str>,
) -> LedgerResult<Option<ActivePotionEffect>> {
    let row = conn
        .query_row(
            "SELECT user_id, potion_type, character_id, activated_at, expires_at
             FROM potion_effect
             WHERE user_id = ?1 AND potion_type = ?2 AND character_id = ?3",
            params![user_id, potion_type.as_str(), character_key(character_id)],
            map_row,
        )
        .optional()?;
    row.map(finish_row).transpose()
}

pub fn list_for_user(conn: &Connection, user_id: &str) -> LedgerResult<Vec<ActivePotionEffect>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, potion_type, character_id, activated_at, expires_at
         FROM potion_effect WHERE user_id = ?1
         ORDER BY expires_at ASC",
    )?;
    let rows = stmt
        .query_map(params![user_id], map_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(finish_row).collect()
}

/// One row per key: re-activation replaces the previous record instead of
/// stacking a duplicate buff.
pub fn upsert(conn: &Connection, effect: &ActivePotionEffect) -> LedgerResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO potion_effect
             (user_id, potion_type, character_id, activated_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            effect.user_id,
            effect.potion_type.as_str(),
            character_key(effect.character_id.as_deref()),
            fmt_ts(effect.activated_at),
            fmt_ts(effect.expires_at),
        ],
    )?;
    Ok(())
}

/// Returns true when a row was removed.
pub fn delete(
    conn: &Connection,
    user_id: &str,
    potion_type: PotionType,
    character_id: Option<&str>,
) -> LedgerResult<bool> {
    let changed = conn.execute(
        "DELETE FROM potion_effect
         WHERE user_id = ?1 AND potion_type = ?2 AND character_id = ?3",
        params![user_id, potion_type.as_str(), character_key(character_id)],
    )?;
    Ok(changed > 0)
}

/// Storage-hygiene sweep: remove rows whose expiry has passed. Expiry is
/// already enforced lazily at read time, so running this is optional.
pub fn delete_expired(
    conn: &Connection,
    user_id: Option<&str>,
    now: DateTime<Utc>,
) -> LedgerResult<usize> {
    let removed = match user_id {
        Some(user) => conn.execute(
            "DELETE FROM potion_effect WHERE user_id = ?1 AND expires_at < ?2",
            params![user, fmt_ts(now)],
        )?,
        None => conn.execute(
            "DELETE FROM potion_effect WHERE expires_at < ?1",
            params![fmt_ts(now)],
        )?,
    };
    Ok(removed)
}

type RawRow = (String, String, String, String, String);

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn finish_row(raw: RawRow) -> LedgerResult<ActivePotionEffect> {
    let (user_id, potion_type, character_id, activated_at, expires_at) = raw;
    Ok(ActivePotionEffect {
        user_id,
        potion_type: PotionType::parse(&potion_type)
            .ok_or_else(|| anyhow::anyhow!("unknown potion type '{potion_type}' in store"))?,
        character_id: if character_id.is_empty() { None } else { Some(character_id) },
        activated_at: parse_ts(&activated_at)?,
        expires_at: parse_ts(&expires_at)?,
    })
}
