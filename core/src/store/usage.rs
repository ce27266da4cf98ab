//! Per-resource usage counter rows, optionally scoped to a character.

use super::{fmt_ts, parse_ts};
use crate::error::LedgerResult;
use crate::usage::{UsageCounter, UsageResource};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

fn character_key(character_id: Option<&str>) -> &str {
    character_id.unwrap_or("")
}

pub fn get(
    conn: &Connection,
    user_id: &str,
    resource: UsageResource,
    character_id: Option<&str>,
) -> LedgerResult<Option<UsageCounter>> {
    let row = conn
        .query_row(
            "SELECT user_id, resource, character_id, count, lifetime_count,
                    unlocked_count, card_count, permanent_unlock, custom_limit, last_reset_date
             FROM usage_counter
             WHERE user_id = ?1 AND resource = ?2 AND character_id = ?3",
            params![user_id, resource.as_str(), character_key(character_id)],
            map_row,
        )
        .optional()?;
    row.map(finish_row).transpose()
}

pub fn upsert(conn: &Connection, counter: &UsageCounter, now: DateTime<Utc>) -> LedgerResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO usage_counter
             (user_id, resource, character_id, count, lifetime_count,
              unlocked_count, card_count, permanent_unlock, custom_limit,
              last_reset_date, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            counter.user_id,
            counter.resource.as_str(),
            character_key(counter.character_id.as_deref()),
            counter.count,
            counter.lifetime_count,
            counter.unlocked_count,
            counter.card_count,
            counter.permanent_unlock as i64,
            counter.custom_limit,
            counter.last_reset_date.map(fmt_ts),
            fmt_ts(now),
        ],
    )?;
    Ok(())
}

/// All (user, character) keys tracked for a resource — the work list for
/// bulk maintenance resets.
pub fn list_keys(
    conn: &Connection,
    resource: UsageResource,
) -> LedgerResult<Vec<(String, Option<String>)>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, character_id FROM usage_counter WHERE resource = ?1
         ORDER BY user_id, character_id",
    )?;
    let rows = stmt
        .query_map(params![resource.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(user, character)| {
            let character = if character.is_empty() { None } else { Some(character) };
            (user, character)
        })
        .collect())
}

/// Window reset: zero the in-window count and stamp the reset date.
/// Lifetime and override fields are untouched.
pub fn reset_row(
    conn: &Connection,
    user_id: &str,
    resource: UsageResource,
    character_id: Option<&str>,
    now: DateTime<Utc>,
) -> LedgerResult<()> {
    conn.execute(
        "UPDATE usage_counter
         SET count = 0, last_reset_date = ?1, updated_at = ?1
         WHERE user_id = ?2 AND resource = ?3 AND character_id = ?4",
        params![fmt_ts(now), user_id, resource.as_str(), character_key(character_id)],
    )?;
    Ok(())
}

type RawRow = (
    String,
    String,
    String,
    i64,
    i64,
    i64,
    i64,
    i64,
    Option<i64>,
    Option<String>,
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

fn finish_row(raw: RawRow) -> LedgerResult<UsageCounter> {
    let (
        user_id,
        resource,
        character_id,
        count,
        lifetime_count,
        unlocked_count,
        card_count,
        permanent_unlock,
        custom_limit,
        last_reset_date,
    ) = raw;
    Ok(UsageCounter {
        user_id,
        resource: UsageResource::parse(&resource)
            .ok_or_else(|| anyhow::anyhow!("unknown usage resource '{resource}' in store"))?,
        character_id: if character_id.is_empty() { None } else { Some(character_id) },
        count,
        lifetime_count,
        unlocked_count,
        card_count,
        permanent_unlock: permanent_unlock != 0,
        custom_limit,
        last_reset_date: last_reset_date.as_deref().map(parse_ts).transpose()?,
    })
}
