//! Database operations module for SQLite storage
//!
//! This module handles all database operations including:
//! - Database initialization and migrations
//! - Normalization of legacy timestamp rows
//! - CRUD operations for journal entries
//! - Users and login sessions

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::timezone::{self, DisplayZone};
use crate::types::{Entry, EntryDraft, EntryId, User, UserId};

const ENTRY_COLUMNS: &str = "id, user_id, title, body, created_at, updated_at, entry_date";

/// Initialize the database at the given path, running any pending migrations
pub fn init_db(db_path: &Path, migrations_dir: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    // Enable foreign keys
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    let count = run_migrations(&conn, migrations_dir)?;
    if count > 0 {
        info!(count = count, "Applied migrations");
    }

    Ok(conn)
}

/// Run pending migrations from the migrations directory
pub fn run_migrations(conn: &Connection, migrations_dir: &Path) -> Result<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
             version TEXT PRIMARY KEY,
             applied_at TEXT NOT NULL
         );",
    )?;

    // Get list of migration files
    let mut migrations: Vec<_> = std::fs::read_dir(migrations_dir)
        .with_context(|| {
            format!(
                "Failed to read migrations directory: {}",
                migrations_dir.display()
            )
        })?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "sql")
                .unwrap_or(false)
        })
        .map(|e| e.path())
        .collect();

    migrations.sort();

    let mut applied = 0;

    for migration_path in migrations {
        let version = migration_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid migration filename"))?
            .to_string();

        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
            [&version],
            |row| row.get(0),
        )?;

        if already_applied {
            continue;
        }

        let sql = std::fs::read_to_string(&migration_path)
            .with_context(|| format!("Failed to read migration: {}", migration_path.display()))?;

        // Schema change and bookkeeping commit together
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(&sql)
            .with_context(|| format!("Failed to apply migration: {}", version))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, timezone::format_stored(Utc::now())],
        )?;
        tx.commit()?;

        debug!(version = %version, "Applied migration");
        applied += 1;
    }

    Ok(applied)
}

/// Rewrite timestamps stored by older versions into canonical UTC text and
/// backfill `entry_date` from `created_at` in the display zone.
/// Returns the number of rows changed.
pub fn normalize_legacy_rows(conn: &Connection, zone: &DisplayZone) -> Result<usize> {
    let mut stmt = conn.prepare("SELECT id, created_at, updated_at, entry_date FROM entries")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, EntryId>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    let tx = conn.unchecked_transaction()?;
    let mut changed = 0;
    for (id, created_raw, updated_raw, date_raw) in rows {
        let created = match timezone::parse_stored(&created_raw) {
            Ok(ts) => ts,
            Err(e) => {
                warn!(id = id, error = %e, "Skipping entry with unreadable created_at");
                continue;
            }
        };
        let updated = timezone::parse_stored(&updated_raw).unwrap_or(created);

        let created_text = timezone::format_stored(created);
        let updated_text = timezone::format_stored(updated);
        let date_text = zone.local_date(created).format("%Y-%m-%d").to_string();

        if created_text == created_raw
            && updated_text == updated_raw
            && date_raw.as_deref() == Some(date_text.as_str())
        {
            continue;
        }

        tx.execute(
            "UPDATE entries SET created_at = ?1, updated_at = ?2, entry_date = ?3 WHERE id = ?4",
            params![created_text, updated_text, date_text, id],
        )?;
        changed += 1;
    }
    tx.commit()?;

    if changed > 0 {
        info!(count = changed, zone = zone.name(), "Normalized legacy entry rows");
    }
    Ok(changed)
}

fn entry_from_row(row: &Row) -> rusqlite::Result<Entry> {
    let created_raw: String = row.get(4)?;
    let updated_raw: String = row.get(5)?;
    let date_raw: Option<String> = row.get(6)?;

    let entry_date = match date_raw {
        Some(text) => Some(
            NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| conversion_error(6, e))?,
        ),
        None => None,
    };

    Ok(Entry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        created_at: parse_timestamp_column(4, &created_raw)?,
        updated_at: parse_timestamp_column(5, &updated_raw)?,
        entry_date,
    })
}

fn parse_timestamp_column(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    timezone::parse_stored(raw).map_err(|e| conversion_error(idx, e))
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

/// Entries owned by `user_id` created in `[start, end)`, oldest first
pub fn find_entries_by_user_and_range(
    conn: &Connection,
    user_id: UserId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Entry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS}
         FROM entries
         WHERE user_id = ?1 AND created_at >= ?2 AND created_at < ?3
         ORDER BY created_at ASC, id ASC"
    ))?;

    let entries = stmt
        .query_map(
            params![
                user_id,
                timezone::format_stored(start),
                timezone::format_stored(end)
            ],
            entry_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Most recent entries of a user, newest first
pub fn recent_entries(conn: &Connection, user_id: UserId, limit: usize) -> Result<Vec<Entry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS}
         FROM entries
         WHERE user_id = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2"
    ))?;

    let entries = stmt
        .query_map(params![user_id, limit as i64], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Get a single entry by ID
pub fn find_entry_by_id(conn: &Connection, id: EntryId) -> Result<Option<Entry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS}
         FROM entries
         WHERE id = ?1"
    ))?;

    let entry = stmt.query_row([id], entry_from_row).optional()?;

    Ok(entry)
}

/// Insert a new entry created at `now`, filed under its local date in `zone`
pub fn insert_entry(
    conn: &Connection,
    zone: &DisplayZone,
    user_id: UserId,
    draft: &EntryDraft,
    now: DateTime<Utc>,
) -> Result<Entry> {
    let stamp = timezone::format_stored(now);
    let entry_date = zone.local_date(now);

    conn.execute(
        "INSERT INTO entries (user_id, title, body, created_at, updated_at, entry_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user_id,
            draft.title,
            draft.body,
            stamp,
            stamp,
            entry_date.format("%Y-%m-%d").to_string(),
        ],
    )
    .context("Failed to insert entry")?;

    let id = conn.last_insert_rowid();
    find_entry_by_id(conn, id)?.ok_or_else(|| anyhow::anyhow!("Inserted entry {id} vanished"))
}

/// Replace title and body of an entry and refresh `updated_at`.
/// Returns the updated entry, or `None` if it does not exist.
pub fn update_entry(
    conn: &Connection,
    id: EntryId,
    draft: &EntryDraft,
    now: DateTime<Utc>,
) -> Result<Option<Entry>> {
    let affected = conn
        .execute(
            "UPDATE entries SET title = ?1, body = ?2, updated_at = ?3 WHERE id = ?4",
            params![draft.title, draft.body, timezone::format_stored(now), id],
        )
        .context("Failed to update entry")?;

    if affected == 0 {
        return Ok(None);
    }
    find_entry_by_id(conn, id)
}

/// Delete an entry by ID
pub fn delete_entry(conn: &Connection, id: EntryId) -> Result<bool> {
    let affected = conn.execute("DELETE FROM entries WHERE id = ?1", [id])?;
    Ok(affected > 0)
}

/// Count all entries in the database
pub fn count_entries(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
    Ok(count as usize)
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
    })
}

/// Insert a user. Returns `None` if the username is already taken.
pub fn insert_user(conn: &Connection, username: &str, password_hash: &str) -> Result<Option<User>> {
    let inserted = conn.execute(
        "INSERT INTO users (username, password_hash) VALUES (?1, ?2)
         ON CONFLICT(username) DO NOTHING",
        params![username, password_hash],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    Ok(Some(User {
        id: conn.last_insert_rowid(),
        username: username.to_string(),
        password_hash: password_hash.to_string(),
    }))
}

pub fn find_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, username, password_hash FROM users WHERE username = ?1",
            [username],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn insert_session(
    conn: &Connection,
    token: &str,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (token, user_id, created_at) VALUES (?1, ?2, ?3)",
        params![token, user_id, timezone::format_stored(now)],
    )?;
    Ok(())
}

/// Resolve a session token to its user
pub fn find_session_user(conn: &Connection, token: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT u.id, u.username, u.password_hash
             FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1",
            [token],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn delete_session(conn: &Connection, token: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?;
    Ok(affected > 0)
}

/// Open a throwaway database with every migration applied
#[cfg(test)]
pub fn setup_test_db() -> (tempfile::TempDir, Connection) {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let migrations_dir = temp_dir.path().join("migrations");
    std::fs::create_dir(&migrations_dir).unwrap();

    std::fs::write(
        migrations_dir.join("001_initial_schema.sql"),
        include_str!("../db/migrations/001_initial_schema.sql"),
    )
    .unwrap();
    std::fs::write(
        migrations_dir.join("002_add_entry_date.sql"),
        include_str!("../db/migrations/002_add_entry_date.sql"),
    )
    .unwrap();

    let conn = init_db(&db_path, &migrations_dir).unwrap();
    (temp_dir, conn)
}
