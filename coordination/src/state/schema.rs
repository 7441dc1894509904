//! SQLite schema and versioned migrations for the state store
//!
//! Each migration runs in its own immediate transaction, records itself in
//! `schema_migrations`, and is verified before commit. Migrations are
//! idempotent so re-running them against an up-to-date database is a no-op.
//!
//! ```text
//! v1  sessions, state_snapshots, events, transition_rules,
//!     special_rules, config_meta
//! v2  events.sequence + per-scope sequence index
//! ```

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::store::{StoreError, StoreResult};

/// Highest schema version this build understands.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

pub const TABLE_SESSIONS: &str = "sessions";
pub const TABLE_STATE_SNAPSHOTS: &str = "state_snapshots";
pub const TABLE_EVENTS: &str = "events";
pub const TABLE_TRANSITION_RULES: &str = "transition_rules";
pub const TABLE_SPECIAL_RULES: &str = "special_rules";
pub const TABLE_CONFIG_META: &str = "config_meta";
pub const TABLE_SCHEMA_MIGRATIONS: &str = "schema_migrations";

/// Tables that must exist once v1 is applied.
pub const REQUIRED_TABLES: &[&str] = &[
    TABLE_SESSIONS,
    TABLE_STATE_SNAPSHOTS,
    TABLE_EVENTS,
    TABLE_TRANSITION_RULES,
    TABLE_SPECIAL_RULES,
    TABLE_CONFIG_META,
    TABLE_SCHEMA_MIGRATIONS,
];

struct Migration {
    version: u32,
    name: &'static str,
    apply: fn(&Transaction<'_>) -> rusqlite::Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "baseline",
        apply: migrate_v1,
    },
    Migration {
        version: 2,
        name: "event_sequence",
        apply: migrate_v2,
    },
];

/// Outcome of a migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub applied: Vec<u32>,
}

/// Bring the database up to [`CURRENT_SCHEMA_VERSION`].
pub fn migrate(conn: &mut Connection) -> StoreResult<MigrationReport> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;

    let from_version = current_version(conn)?;
    if from_version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchemaVersion {
            found: from_version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // Re-read inside the write lock; a concurrent opener may have won.
        if version_applied(&tx, migration.version)? {
            continue;
        }

        (migration.apply)(&tx).map_err(|e| migration_error(migration.version, e))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(version) DO NOTHING",
            params![migration.version, migration.name, Utc::now().to_rfc3339()],
        )?;
        verify_version(&tx, migration.version)?;
        tx.commit()?;

        info!(
            version = migration.version,
            name = migration.name,
            "Applied schema migration"
        );
        applied.push(migration.version);
    }

    verify_integrity(conn)?;
    let to_version = current_version(conn)?;
    debug!(from_version, to_version, "Schema up to date");

    Ok(MigrationReport {
        from_version,
        to_version,
        applied,
    })
}

/// Highest applied migration, `0` for a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    if !table_exists(conn, TABLE_SCHEMA_MIGRATIONS)? {
        return Ok(0);
    }
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

pub fn table_exists(conn: &Connection, name: &str) -> StoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
            params![name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2 LIMIT 1",
            params![table, column],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn version_applied(conn: &Connection, version: u32) -> StoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM schema_migrations WHERE version = ?1",
            params![version],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn verify_version(conn: &Connection, version: u32) -> StoreResult<()> {
    if version >= 1 {
        for table in REQUIRED_TABLES {
            if !table_exists(conn, table)? {
                return Err(StoreError::Migration {
                    version,
                    reason: format!("table '{table}' missing after migration"),
                });
            }
        }
    }
    if version >= 2 && !column_exists(conn, TABLE_EVENTS, "sequence")? {
        return Err(StoreError::Migration {
            version,
            reason: "column 'events.sequence' missing after migration".to_string(),
        });
    }
    Ok(())
}

/// `PRAGMA integrity_check` plus `PRAGMA foreign_key_check`.
pub fn verify_integrity(conn: &Connection) -> StoreResult<()> {
    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if integrity != "ok" {
        return Err(StoreError::Integrity(format!(
            "integrity_check reported: {integrity}"
        )));
    }

    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let mut rows = stmt.query([])?;
    if let Some(row) = rows.next()? {
        let table: String = row.get(0)?;
        return Err(StoreError::Integrity(format!(
            "foreign key violation in table '{table}'"
        )));
    }
    Ok(())
}

fn migration_error(version: u32, err: rusqlite::Error) -> StoreError {
    match StoreError::from(err) {
        busy @ StoreError::Busy(_) => busy,
        other => StoreError::Migration {
            version,
            reason: other.to_string(),
        },
    }
}

fn migrate_v1(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            definition_version TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS state_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
            scope_type TEXT NOT NULL,
            scope_id TEXT NOT NULL DEFAULT 'global',
            state_type TEXT NOT NULL,
            state_payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (session_id, scope_type, scope_id)
        );

        CREATE INDEX IF NOT EXISTS idx_state_by_type
            ON state_snapshots (session_id, scope_type, state_type, id);

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
            scope_id TEXT NOT NULL DEFAULT 'global',
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            redacted INTEGER NOT NULL DEFAULT 0,
            idempotency_key TEXT,
            created_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_events_idempotency
            ON events (session_id, event_type, scope_id, idempotency_key)
            WHERE idempotency_key IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_events_scope
            ON events (session_id, scope_id, id);

        CREATE TABLE IF NOT EXISTS transition_rules (
            current_role TEXT NOT NULL,
            status_code TEXT NOT NULL,
            next_role TEXT,
            action TEXT NOT NULL,
            required_context_keys TEXT NOT NULL DEFAULT '[]',
            model_or_priority_override TEXT,
            fallback_role TEXT,
            batch_cap INTEGER,
            then_action TEXT,
            PRIMARY KEY (current_role, status_code)
        );

        CREATE TABLE IF NOT EXISTS special_rules (
            rule_name TEXT PRIMARY KEY,
            config TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS config_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            definition_version TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            transitions_loaded INTEGER NOT NULL,
            rules_loaded INTEGER NOT NULL,
            seeded_at TEXT NOT NULL
        );
        ",
    )
}

fn migrate_v2(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    let has_sequence: bool = tx
        .query_row(
            "SELECT 1 FROM pragma_table_info('events') WHERE name = 'sequence'",
            [],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !has_sequence {
        tx.execute_batch("ALTER TABLE events ADD COLUMN sequence INTEGER;")?;
    }
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_events_sequence
            ON events (session_id, scope_id, event_type, sequence)
            WHERE sequence IS NOT NULL;",
    )
}
