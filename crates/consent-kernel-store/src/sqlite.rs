//! SQLite implementation of the Store trait.
//!
//! The primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via `tokio::task::spawn_blocking`.
//!
//! Transitions use optimistic compare-and-swap on the `version` column: read
//! the row, run the state machine, then `UPDATE ... WHERE version = ?` in the
//! same transaction as the audit insert. A lost race re-reads and retries,
//! so several processes can share one database file.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use consent_kernel_core::{
    apply_transition, Actor, AuditAction, AuditEntry, ConsentRequest, ContentAddress,
    DocumentKind, DocumentRecord, DocumentRef, IdentityRef, NewConsentRequest, PartyRole,
    PermissionSet, RequestId, Status, Transition, TransitionOutcome,
};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::Store;

/// SQLite-based store implementation.
///
/// Thread-safe via an internal Mutex. All operations run on the blocking
/// pool so the async runtime is never stalled by disk I/O.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
    config: StoreConfig,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Open a database file with explicit tuning.
    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, config)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, StoreConfig::default())
    }

    fn from_connection(mut conn: Connection, config: StoreConfig) -> Result<Self> {
        conn.busy_timeout(config.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(StoreError::poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {e}")))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

const SELECT_REQUEST: &str = "SELECT request_id, requester, grantor, document_kinds, reason, \
     status, permissions, documents, granted_at, expires_at, revoked_at, created_at, \
     updated_at, version FROM consent_requests";

/// A consent_requests row before decoding.
struct RawRequest {
    request_id: Vec<u8>,
    requester: String,
    grantor: String,
    document_kinds: Vec<u8>,
    reason: String,
    status: u8,
    permissions: Option<u8>,
    documents: Option<Vec<u8>>,
    granted_at: Option<i64>,
    expires_at: Option<i64>,
    revoked_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
    version: i64,
}

impl RawRequest {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            request_id: row.get("request_id")?,
            requester: row.get("requester")?,
            grantor: row.get("grantor")?,
            document_kinds: row.get("document_kinds")?,
            reason: row.get("reason")?,
            status: row.get("status")?,
            permissions: row.get("permissions")?,
            documents: row.get("documents")?,
            granted_at: row.get("granted_at")?,
            expires_at: row.get("expires_at")?,
            revoked_at: row.get("revoked_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            version: row.get("version")?,
        })
    }

    fn decode(self) -> Result<(ConsentRequest, i64)> {
        let request_id = RequestId::from_bytes(self.request_id.try_into().map_err(|_| {
            StoreError::InvalidData("request_id is not 16 bytes".into())
        })?);
        let status = Status::from_u8(self.status)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown status {}", self.status)))?;
        let documents = self
            .documents
            .map(|bytes| decode_cbor::<Vec<DocumentRef>>(&bytes))
            .transpose()?;

        let record = ConsentRequest {
            request_id,
            requester: parse_identity(self.requester)?,
            grantor: parse_identity(self.grantor)?,
            requested_document_kinds: decode_cbor::<Vec<DocumentKind>>(&self.document_kinds)?,
            reason: self.reason,
            status,
            permissions: self.permissions.map(PermissionSet::from_bits),
            documents,
            granted_at: self.granted_at,
            expires_at: self.expires_at,
            revoked_at: self.revoked_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        Ok((record, self.version))
    }
}

fn parse_identity(raw: String) -> Result<IdentityRef> {
    IdentityRef::parse(raw).map_err(|e| StoreError::InvalidData(e.to_string()))
}

fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn load_request(conn: &Connection, id: &RequestId) -> Result<Option<(ConsentRequest, i64)>> {
    let raw = conn
        .query_row(
            &format!("{SELECT_REQUEST} WHERE request_id = ?1"),
            params![id.as_bytes().as_slice()],
            RawRequest::from_row,
        )
        .optional()?;
    raw.map(RawRequest::decode).transpose()
}

fn query_requests(
    conn: &Connection,
    sql: &str,
    param: &dyn rusqlite::ToSql,
) -> Result<Vec<ConsentRequest>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([param], RawRequest::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.decode()?.0);
    }
    Ok(out)
}

fn insert_request(conn: &Connection, record: &ConsentRequest) -> Result<()> {
    let documents = record.documents.as_ref().map(encode_cbor).transpose()?;
    conn.execute(
        "INSERT INTO consent_requests (
            request_id, requester, grantor, document_kinds, reason, status,
            permissions, documents, granted_at, expires_at, revoked_at,
            created_at, updated_at, version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0)",
        params![
            record.request_id.as_bytes().as_slice(),
            record.requester.as_str(),
            record.grantor.as_str(),
            encode_cbor(&record.requested_document_kinds)?,
            record.reason,
            record.status.to_u8(),
            record.permissions.map(|p| p.to_bits()),
            documents,
            record.granted_at,
            record.expires_at,
            record.revoked_at,
            record.created_at,
            record.updated_at,
        ],
    )?;
    Ok(())
}

/// Write `record` only if the row is still at `version`. Returns false on a
/// lost race; nothing is written in that case.
fn compare_and_swap(
    conn: &mut Connection,
    record: &ConsentRequest,
    entry: &AuditEntry,
    version: i64,
) -> Result<bool> {
    let documents = record.documents.as_ref().map(encode_cbor).transpose()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let updated = tx.execute(
        "UPDATE consent_requests SET
            status = ?1, permissions = ?2, documents = ?3, granted_at = ?4,
            expires_at = ?5, revoked_at = ?6, updated_at = ?7, version = version + 1
         WHERE request_id = ?8 AND version = ?9",
        params![
            record.status.to_u8(),
            record.permissions.map(|p| p.to_bits()),
            documents,
            record.granted_at,
            record.expires_at,
            record.revoked_at,
            record.updated_at,
            record.request_id.as_bytes().as_slice(),
            version,
        ],
    )?;
    if updated == 0 {
        return Ok(false);
    }
    insert_audit(&tx, entry)?;
    tx.commit()?;
    Ok(true)
}

fn insert_audit(conn: &Connection, entry: &AuditEntry) -> Result<()> {
    let (actor_kind, actor) = match &entry.actor {
        Actor::Party(id) => ("party", Some(id.as_str())),
        Actor::Sweeper => ("sweeper", None),
    };
    conn.execute(
        "INSERT INTO audit_trail (request_id, action, actor_kind, actor, at, note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.request_id.as_bytes().as_slice(),
            entry.action.as_str(),
            actor_kind,
            actor,
            entry.at,
            entry.note,
        ],
    )?;
    Ok(())
}

fn row_to_audit(
    request_id: RequestId,
    action: String,
    actor_kind: String,
    actor: Option<String>,
    at: i64,
    note: Option<String>,
) -> Result<AuditEntry> {
    let action = AuditAction::parse(&action)
        .ok_or_else(|| StoreError::InvalidData(format!("unknown audit action {action}")))?;
    let actor = match (actor_kind.as_str(), actor) {
        ("party", Some(identity)) => Actor::Party(parse_identity(identity)?),
        ("sweeper", _) => Actor::Sweeper,
        (kind, _) => return Err(StoreError::InvalidData(format!("bad audit actor {kind}"))),
    };
    Ok(AuditEntry {
        request_id,
        action,
        actor,
        at,
        note,
    })
}

fn row_to_document(
    content_address: String,
    owner: String,
    name: String,
    media_type: String,
    size: i64,
    registered_at: i64,
) -> Result<DocumentRecord> {
    let content_address =
        ContentAddress::parse(content_address).map_err(|e| StoreError::InvalidData(e.to_string()))?;
    let size = u64::try_from(size)
        .map_err(|_| StoreError::InvalidData(format!("negative document size {size}")))?;
    Ok(DocumentRecord {
        owner: parse_identity(owner)?,
        document: DocumentRef::new(content_address, name, media_type, size),
        registered_at,
    })
}

type DocumentRow = (String, String, String, String, i64, i64);

fn document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

const SELECT_DOCUMENT: &str =
    "SELECT content_address, owner, name, media_type, size, registered_at FROM documents";

#[async_trait]
impl Store for SqliteStore {
    async fn create(&self, new: NewConsentRequest, now: i64) -> Result<ConsentRequest> {
        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let mut request_id = RequestId::generate();
            while load_request(&tx, &request_id)?.is_some() {
                request_id = RequestId::generate();
            }

            let actor = Actor::Party(new.requester.clone());
            let record = new.into_request(request_id, now);
            insert_request(&tx, &record)?;
            insert_audit(&tx, &AuditEntry::created(request_id, actor, now))?;
            tx.commit()?;
            Ok(record)
        })
        .await
    }

    async fn get(&self, id: &RequestId) -> Result<Option<ConsentRequest>> {
        let id = *id;
        self.blocking(move |conn| Ok(load_request(conn, &id)?.map(|(record, _)| record)))
            .await
    }

    async fn transition(
        &self,
        id: &RequestId,
        transition: &Transition,
        actor: &Actor,
        now: i64,
    ) -> Result<TransitionOutcome> {
        let id = *id;
        let transition = transition.clone();
        let actor = actor.clone();
        let max_retries = self.config.max_cas_retries;

        self.blocking(move |conn| {
            for attempt in 0..=max_retries {
                let (current, version) =
                    load_request(conn, &id)?.ok_or(StoreError::NotFound(id))?;
                let outcome = apply_transition(&current, &transition, &actor, now)?;

                if let TransitionOutcome::Applied { record, entry } = &outcome {
                    record.check_invariants().map_err(StoreError::InvalidData)?;
                    if !compare_and_swap(conn, record, entry, version)? {
                        debug!(request_id = %id, attempt, "version moved under us, retrying");
                        continue;
                    }
                }
                return Ok(outcome);
            }
            Err(StoreError::Conflict(id))
        })
        .await
    }

    async fn list_by_party(
        &self,
        identity: &IdentityRef,
        role: PartyRole,
    ) -> Result<Vec<ConsentRequest>> {
        let identity = identity.as_str().to_string();
        let column = match role {
            PartyRole::Requester => "requester",
            PartyRole::Grantor => "grantor",
        };
        self.blocking(move |conn| {
            let sql = format!("{SELECT_REQUEST} WHERE {column} = ?1 ORDER BY created_at, rowid");
            query_requests(conn, &sql, &identity)
        })
        .await
    }

    async fn list_by_status(&self, status: Status) -> Result<Vec<ConsentRequest>> {
        self.blocking(move |conn| {
            let sql = format!("{SELECT_REQUEST} WHERE status = ?1 ORDER BY created_at, rowid");
            query_requests(conn, &sql, &status.to_u8())
        })
        .await
    }

    async fn audit_trail(&self, id: &RequestId) -> Result<Vec<AuditEntry>> {
        let id = *id;
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT action, actor_kind, actor, at, note FROM audit_trail
                 WHERE request_id = ?1 ORDER BY seq",
            )?;
            let rows = stmt.query_map(params![id.as_bytes().as_slice()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?;

            let mut entries = Vec::new();
            for row in rows {
                let (action, actor_kind, actor, at, note) = row?;
                entries.push(row_to_audit(id, action, actor_kind, actor, at, note)?);
            }
            Ok(entries)
        })
        .await
    }

    async fn register_document(
        &self,
        owner: &IdentityRef,
        document: &DocumentRef,
        now: i64,
    ) -> Result<DocumentRecord> {
        let owner = owner.clone();
        let document = document.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let existing = tx
                .query_row(
                    &format!("{SELECT_DOCUMENT} WHERE content_address = ?1"),
                    params![document.content_address.as_str()],
                    document_row,
                )
                .optional()?;
            if let Some((addr, existing_owner, name, media_type, size, registered_at)) = existing
            {
                let existing =
                    row_to_document(addr, existing_owner, name, media_type, size, registered_at)?;
                if existing.owner != owner {
                    return Err(StoreError::DocumentOwned {
                        content_address: document.content_address.to_string(),
                        owner: existing.owner,
                    });
                }
                return Ok(existing);
            }

            let size = i64::try_from(document.size).map_err(|_| {
                StoreError::InvalidData(format!("document size {} too large", document.size))
            })?;
            tx.execute(
                "INSERT INTO documents (content_address, owner, name, media_type, size, registered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    document.content_address.as_str(),
                    owner.as_str(),
                    document.name,
                    document.media_type,
                    size,
                    now,
                ],
            )?;
            tx.commit()?;

            Ok(DocumentRecord {
                owner,
                document,
                registered_at: now,
            })
        })
        .await
    }

    async fn documents_of(&self, owner: &IdentityRef) -> Result<Vec<DocumentRecord>> {
        let owner = owner.as_str().to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_DOCUMENT} WHERE owner = ?1 ORDER BY registered_at DESC, rowid DESC"
            ))?;
            let rows = stmt.query_map(params![owner], document_row)?;
            let mut docs = Vec::new();
            for row in rows {
                let (addr, owner, name, media_type, size, registered_at) = row?;
                docs.push(row_to_document(addr, owner, name, media_type, size, registered_at)?);
            }
            Ok(docs)
        })
        .await
    }

    async fn document_owner(
        &self,
        content_address: &ContentAddress,
    ) -> Result<Option<IdentityRef>> {
        let addr = content_address.as_str().to_string();
        self.blocking(move |conn| {
            let owner: Option<String> = conn
                .query_row(
                    "SELECT owner FROM documents WHERE content_address = ?1",
                    params![addr],
                    |row| row.get(0),
                )
                .optional()?;
            owner.map(parse_identity).transpose()
        })
        .await
    }
}
