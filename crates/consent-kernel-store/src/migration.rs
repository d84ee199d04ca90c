//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration transforms the schema
//! from version N to N+1 inside one transaction.

use rusqlite::Connection;

use consent_kernel_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent: safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {current} is newer than supported {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per consent request; version drives compare-and-swap
        CREATE TABLE consent_requests (
            request_id BLOB PRIMARY KEY,       -- 16 random bytes
            requester TEXT NOT NULL,
            grantor TEXT NOT NULL,
            document_kinds BLOB NOT NULL,      -- CBOR array of DocumentKind
            reason TEXT NOT NULL,
            status INTEGER NOT NULL,           -- 0=requested 1=granted 2=revoked 3=expired
            permissions INTEGER,               -- capability bits, NULL until granted
            documents BLOB,                    -- CBOR array of DocumentRef, NULL until granted
            granted_at INTEGER,
            expires_at INTEGER,
            revoked_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 0
        );

        -- Append-only audit trail; seq gives append order
        CREATE TABLE audit_trail (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id BLOB NOT NULL REFERENCES consent_requests(request_id),
            action TEXT NOT NULL,
            actor_kind TEXT NOT NULL,          -- 'party' or 'sweeper'
            actor TEXT,                        -- identity for parties
            at INTEGER NOT NULL,
            note TEXT
        );

        -- Document registry
        CREATE TABLE documents (
            content_address TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            media_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            registered_at INTEGER NOT NULL
        );

        CREATE INDEX idx_requests_requester ON consent_requests(requester, created_at);
        CREATE INDEX idx_requests_grantor ON consent_requests(grantor, created_at);
        CREATE INDEX idx_requests_status ON consent_requests(status, created_at);
        CREATE INDEX idx_audit_request ON audit_trail(request_id, seq);
        CREATE INDEX idx_documents_owner ON documents(owner, registered_at);
        "#,
    )?;

    Ok(())
}
