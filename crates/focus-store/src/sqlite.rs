//! SQLite-based store implementation
//!
//! Each session document is a single row in `documents`, so replacing a
//! document is one UPSERT and SQLite guarantees readers in the other process
//! never see half of it. Both processes open the same file; `busy_timeout`
//! makes a writer wait for the other context instead of failing.

use chrono::{DateTime, Local, NaiveDate};
use focus_api::{ActiveSession, EnforcementLedger, ScheduledSession, SessionSnapshot};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{AuditEvent, AuditEventType, SessionStore, StoreError, StoreResult, check_snapshot};

/// Document holding the ordered list of scheduled sessions
pub const SCHEDULED_DOCUMENT: &str = "scheduled_sessions";

/// Document holding the active slot (`null` when empty)
pub const ACTIVE_DOCUMENT: &str = "active_session";

/// Document holding the enforcement ledger
pub const ENFORCEMENT_DOCUMENT: &str = "enforcement_ledger";

/// How long a writer waits for the other process to finish its transaction
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets the other context keep reading while one writes
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("store lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Whole documents, replaced atomically
            CREATE TABLE IF NOT EXISTS documents (
                name TEXT PRIMARY KEY,
                body_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Sessions created per day
            CREATE TABLE IF NOT EXISTS daily_usage (
                day TEXT PRIMARY KEY,
                sessions_created INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

/// A document as found in the database
enum Stored<T> {
    Parsed(T),
    Corrupt(serde_json::Error),
}

impl<T: Default> Stored<T> {
    /// The value, or the empty default for a body that does not parse.
    ///
    /// Used inside write transactions that replace or check the document
    /// without needing its exact contents.
    fn or_default(self, name: &str) -> T {
        match self {
            Stored::Parsed(value) => value,
            Stored::Corrupt(e) => {
                warn!(document = name, error = %e, "Corrupt document, treating as empty");
                T::default()
            }
        }
    }
}

/// Read a document without writing anything. A missing row is the default
/// value.
fn read_document<T>(conn: &Connection, name: &str) -> StoreResult<Stored<T>>
where
    T: DeserializeOwned + Default,
{
    let body: Option<String> = conn
        .query_row(
            "SELECT body_json FROM documents WHERE name = ?",
            [name],
            |row| row.get(0),
        )
        .optional()?;

    let Some(body) = body else {
        return Ok(Stored::Parsed(T::default()));
    };

    Ok(match serde_json::from_str(&body) {
        Ok(value) => Stored::Parsed(value),
        Err(e) => Stored::Corrupt(e),
    })
}

/// Replace an unparsable document with its empty value and record the
/// recovery, in one write transaction.
///
/// The body is re-read under the write lock, so when both contexts find the
/// same corrupt document only the first repairs it and only one
/// `StoreRecovered` row is written.
fn repair_document<T>(conn: &mut Connection, name: &str) -> StoreResult<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = match read_document(&tx, name)? {
        Stored::Parsed(value) => value,
        Stored::Corrupt(e) => {
            warn!(document = name, error = %e, "Corrupt document, resetting to empty");
            let value = T::default();
            write_document(&tx, name, &value)?;
            insert_audit(
                &tx,
                &AuditEvent::new(AuditEventType::StoreRecovered {
                    document: name.to_string(),
                }),
            )?;
            value
        }
    };
    tx.commit()?;
    Ok(value)
}

/// Read a single document, repairing it first if it is corrupt
fn load_document<T>(conn: &mut Connection, name: &str) -> StoreResult<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    match read_document(conn, name)? {
        Stored::Parsed(value) => Ok(value),
        Stored::Corrupt(_) => repair_document(conn, name),
    }
}

/// Both session documents from one read transaction, or `None` if either is
/// corrupt
fn try_read_sessions(conn: &mut Connection) -> StoreResult<Option<SessionSnapshot>> {
    let tx = conn.transaction()?;
    let scheduled: Stored<Vec<ScheduledSession>> = read_document(&tx, SCHEDULED_DOCUMENT)?;
    let active: Stored<Option<ActiveSession>> = read_document(&tx, ACTIVE_DOCUMENT)?;
    tx.commit()?;

    Ok(match (scheduled, active) {
        (Stored::Parsed(scheduled), Stored::Parsed(active)) => {
            Some(SessionSnapshot { scheduled, active })
        }
        _ => None,
    })
}

fn write_document<T>(conn: &Connection, name: &str, value: &T) -> StoreResult<()>
where
    T: Serialize + ?Sized,
{
    // Serialize before touching the database so a failure commits nothing
    let body = serde_json::to_string(value)?;

    conn.execute(
        r#"
        INSERT INTO documents (name, body_json, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(name)
        DO UPDATE SET body_json = excluded.body_json, updated_at = excluded.updated_at
        "#,
        params![name, body, focus_util::now().to_rfc3339()],
    )?;

    debug!(document = name, bytes = body.len(), "Document replaced");
    Ok(())
}

fn insert_audit(conn: &Connection, event: &AuditEvent) -> StoreResult<i64> {
    let event_json = serde_json::to_string(&event.event)?;
    conn.execute(
        "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
        params![event.timestamp.to_rfc3339(), event_json],
    )?;
    Ok(conn.last_insert_rowid())
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

impl SessionStore for SqliteStore {
    fn read_scheduled(&self) -> StoreResult<Vec<ScheduledSession>> {
        let mut conn = self.conn()?;
        load_document(&mut conn, SCHEDULED_DOCUMENT)
    }

    fn read_active(&self) -> StoreResult<Option<ActiveSession>> {
        let mut conn = self.conn()?;
        load_document(&mut conn, ACTIVE_DOCUMENT)
    }

    fn write_scheduled(&self, sessions: &[ScheduledSession]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let active: Option<ActiveSession> =
            read_document(&tx, ACTIVE_DOCUMENT)?.or_default(ACTIVE_DOCUMENT);
        check_snapshot(&SessionSnapshot {
            scheduled: sessions.to_vec(),
            active,
        })?;
        write_document(&tx, SCHEDULED_DOCUMENT, sessions)?;
        tx.commit()?;
        Ok(())
    }

    fn write_active(&self, session: Option<&ActiveSession>) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let scheduled: Vec<ScheduledSession> =
            read_document(&tx, SCHEDULED_DOCUMENT)?.or_default(SCHEDULED_DOCUMENT);
        check_snapshot(&SessionSnapshot {
            scheduled,
            active: session.cloned(),
        })?;
        write_document(&tx, ACTIVE_DOCUMENT, &session)?;
        tx.commit()?;
        Ok(())
    }

    fn read_snapshot(&self) -> StoreResult<SessionSnapshot> {
        let mut conn = self.conn()?;
        if let Some(snapshot) = try_read_sessions(&mut conn)? {
            return Ok(snapshot);
        }

        repair_document::<Vec<ScheduledSession>>(&mut conn, SCHEDULED_DOCUMENT)?;
        repair_document::<Option<ActiveSession>>(&mut conn, ACTIVE_DOCUMENT)?;
        try_read_sessions(&mut conn)?
            .ok_or_else(|| StoreError::Database("session documents corrupt after repair".into()))
    }

    fn commit(&self, snapshot: &SessionSnapshot) -> StoreResult<()> {
        check_snapshot(snapshot)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_document(&tx, SCHEDULED_DOCUMENT, &snapshot.scheduled)?;
        write_document(&tx, ACTIVE_DOCUMENT, &snapshot.active)?;
        tx.commit()?;

        debug!(
            scheduled = snapshot.scheduled.len(),
            active = snapshot.active.is_some(),
            "Snapshot committed"
        );
        Ok(())
    }

    fn commit_if_current(
        &self,
        expected: &SessionSnapshot,
        next: &SessionSnapshot,
    ) -> StoreResult<bool> {
        check_snapshot(next)?;

        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front so the compare and the
        // write see the same state
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = SessionSnapshot {
            scheduled: read_document(&tx, SCHEDULED_DOCUMENT)?.or_default(SCHEDULED_DOCUMENT),
            active: read_document(&tx, ACTIVE_DOCUMENT)?.or_default(ACTIVE_DOCUMENT),
        };
        if &current != expected {
            debug!("Snapshot changed since it was read, not committing");
            return Ok(false);
        }

        write_document(&tx, SCHEDULED_DOCUMENT, &next.scheduled)?;
        write_document(&tx, ACTIVE_DOCUMENT, &next.active)?;
        tx.commit()?;
        Ok(true)
    }

    fn read_enforcement(&self) -> StoreResult<EnforcementLedger> {
        let mut conn = self.conn()?;
        load_document(&mut conn, ENFORCEMENT_DOCUMENT)
    }

    fn write_enforcement(&self, ledger: &EnforcementLedger) -> StoreResult<()> {
        let conn = self.conn()?;
        write_document(&conn, ENFORCEMENT_DOCUMENT, ledger)
    }

    fn write_enforcement_if_current(
        &self,
        expected: &EnforcementLedger,
        next: &EnforcementLedger,
    ) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: EnforcementLedger =
            read_document(&tx, ENFORCEMENT_DOCUMENT)?.or_default(ENFORCEMENT_DOCUMENT);
        if &current != expected {
            debug!("Enforcement ledger changed since it was read, not recording");
            return Ok(false);
        }

        write_document(&tx, ENFORCEMENT_DOCUMENT, next)?;
        tx.commit()?;
        Ok(true)
    }

    fn append_audit(&self, event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let id = insert_audit(&conn, &event)?;
        debug!(event_id = id, "Audit event appended");
        Ok(())
    }

    fn recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Local))
                .unwrap_or_else(|_| focus_util::now());
            let event: AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn sessions_created_on(&self, day: NaiveDate) -> StoreResult<u32> {
        let conn = self.conn()?;

        let count: Option<i64> = conn
            .query_row(
                "SELECT sessions_created FROM daily_usage WHERE day = ?",
                [day_key(day)],
                |row| row.get(0),
            )
            .optional()?;

        Ok(count.unwrap_or(0).clamp(0, u32::MAX as i64) as u32)
    }

    fn record_session_created(&self, day: NaiveDate) -> StoreResult<()> {
        let conn = self.conn()?;
        let day_str = day_key(day);

        conn.execute(
            r#"
            INSERT INTO daily_usage (day, sessions_created)
            VALUES (?, 1)
            ON CONFLICT(day)
            DO UPDATE SET sessions_created = sessions_created + 1
            "#,
            [&day_str],
        )?;

        debug!(day = %day_str, "Session creation counted");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
