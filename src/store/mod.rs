//! Persistence collaborator backed by SQLite.
//!
//! The reconciliation engine sees the store only through [`Repository`]:
//! find trackers with their identity and tickets eager-loaded, and save or
//! delete single rows. Each call is one statement, so an entity is either
//! fully written or untouched.
//!
//! # Schema
//! ```sql
//! identity    (id, name, username, username_nonce, password, password_nonce)
//! application (id, name UNIQUE)
//! tracker     (id, kind, name UNIQUE, url, identity_id -> identity,
//!              metadata JSON, message, connected, last_updated)
//! ticket      (id, kind, parent, fields JSON, created, reference, link, status,
//!              error, message, last_updated,
//!              tracker_id -> tracker ON DELETE CASCADE,
//!              application_id -> application ON DELETE CASCADE)
//! ```

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, ToSql};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::credentials::Sealed;
use crate::model::{Application, Identity, Ticket, Tracker};


const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS identity (
    id             INTEGER PRIMARY KEY,
    name           TEXT NOT NULL,
    username       TEXT NOT NULL,
    username_nonce TEXT NOT NULL,
    password       TEXT NOT NULL,
    password_nonce TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS application (
    id   INTEGER PRIMARY KEY,
    name TEXT UNIQUE NOT NULL
);
CREATE TABLE IF NOT EXISTS tracker (
    id           INTEGER PRIMARY KEY,
    kind         TEXT NOT NULL,
    name         TEXT UNIQUE NOT NULL,
    url          TEXT NOT NULL,
    identity_id  INTEGER NOT NULL REFERENCES identity(id),
    metadata     TEXT NOT NULL DEFAULT 'null',
    message      TEXT NOT NULL DEFAULT '',
    connected    INTEGER NOT NULL DEFAULT 0,
    last_updated TEXT
);
CREATE TABLE IF NOT EXISTS ticket (
    id             INTEGER PRIMARY KEY,
    kind           TEXT NOT NULL,
    parent         TEXT NOT NULL,
    fields         TEXT NOT NULL DEFAULT '{}',
    created        INTEGER NOT NULL DEFAULT 0,
    reference      TEXT NOT NULL DEFAULT '',
    link           TEXT NOT NULL DEFAULT '',
    status         TEXT NOT NULL DEFAULT '',
    error          INTEGER NOT NULL DEFAULT 0,
    message        TEXT NOT NULL DEFAULT '',
    last_updated   TEXT,
    tracker_id     INTEGER NOT NULL REFERENCES tracker(id) ON DELETE CASCADE,
    application_id INTEGER NOT NULL REFERENCES application(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_ticket_tracker ON ticket(tracker_id);
"#;

const TRACKER_COLUMNS: &str = "t.id, t.kind, t.name, t.url, t.metadata, t.message, t.connected, \
     t.last_updated, i.id, i.name, i.username, i.username_nonce, i.password, i.password_nonce \
     FROM tracker t JOIN identity i ON i.id = t.identity_id";

const TICKET_COLUMNS: &str = "k.id, k.kind, k.parent, k.fields, k.created, k.reference, k.link, \
     k.status, k.error, k.message, k.last_updated, k.tracker_id, a.id, a.name \
     FROM ticket k JOIN application a ON a.id = k.application_id";

/// What the reconciliation engine needs from persistence.
pub trait Repository: Send + Sync {
    /// Trackers with the given connection state, identity and tickets loaded.
    fn find_trackers(&self, connected: bool) -> Result<Vec<Tracker>>;

    /// Upserts a tracker row by id. Tickets are not written.
    fn save_tracker(&self, tracker: &Tracker) -> Result<()>;

    /// Upserts a ticket row by id.
    fn save_ticket(&self, ticket: &Ticket) -> Result<()>;

    /// Deletes a ticket row. Deleting a missing row is not an error.
    fn delete_ticket(&self, ticket: &Ticket) -> Result<()>;
}

/// SQLite store for identities, applications, trackers and tickets.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (or creates) the database and ensures the schema exists.
    ///
    /// Pass `":memory:"` for a throwaway database.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create schema")?;

        debug!(path = %db_path, "Store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("Store connection lock poisoned"))
    }

    /// Inserts a sealed identity and returns its id.
    pub fn insert_identity(&self, identity: &Identity) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO identity (name, username, username_nonce, password, password_nonce)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                identity.name,
                identity.user.ciphertext,
                identity.user.nonce,
                identity.password.ciphertext,
                identity.password.nonce,
            ],
        )
        .context("Failed to insert identity")?;
        Ok(conn.last_insert_rowid())
    }

    /// Inserts an application by name.
    pub fn insert_application(&self, name: &str) -> Result<Application> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO application (name) VALUES (?1)", params![name])
            .context("Failed to insert application")?;
        Ok(Application {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    /// Inserts (or replaces) a tracker and returns its id.
    pub fn insert_tracker(&self, tracker: &Tracker) -> Result<i64> {
        self.upsert_tracker(tracker)
    }

    /// Inserts (or replaces) a ticket and returns its id.
    pub fn insert_ticket(&self, ticket: &Ticket) -> Result<i64> {
        self.upsert_ticket(ticket)
    }

    /// Loads one tracker with its tickets.
    pub fn get_tracker(&self, id: i64) -> Result<Option<Tracker>> {
        let conn = self.conn()?;
        let mut trackers = load_trackers(&conn, "WHERE t.id = ?1", params![id])?;
        Ok(trackers.pop())
    }

    /// Loads all trackers with their tickets.
    pub fn list_trackers(&self) -> Result<Vec<Tracker>> {
        let conn = self.conn()?;
        load_trackers(&conn, "", params![])
    }

    /// Loads one ticket.
    pub fn get_ticket(&self, id: i64) -> Result<Option<Ticket>> {
        let conn = self.conn()?;
        let mut tickets = load_tickets(&conn, "WHERE k.id = ?1", params![id])?;
        Ok(tickets.pop())
    }

    /// Deletes a tracker and, by cascade, its tickets.
    pub fn delete_tracker(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()?
            .execute("DELETE FROM tracker WHERE id = ?1", params![id])
            .context("Failed to delete tracker")?;
        Ok(rows > 0)
    }

    fn upsert_tracker(&self, tracker: &Tracker) -> Result<i64> {
        let conn = self.conn()?;
        let id = (tracker.id != 0).then_some(tracker.id);
        conn.execute(
            r#"
            INSERT INTO tracker (
                id, kind, name, url, identity_id,
                metadata, message, connected, last_updated
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                name = excluded.name,
                url = excluded.url,
                identity_id = excluded.identity_id,
                metadata = excluded.metadata,
                message = excluded.message,
                connected = excluded.connected,
                last_updated = excluded.last_updated
            "#,
            params![
                id,
                tracker.kind,
                tracker.name,
                tracker.url,
                tracker.identity.id,
                tracker.metadata.to_string(),
                tracker.message,
                tracker.connected,
                tracker.last_updated.map(|dt| dt.to_rfc3339()),
            ],
        )
        .with_context(|| format!("Failed to save tracker '{}'", tracker.name))?;
        Ok(id.unwrap_or_else(|| conn.last_insert_rowid()))
    }

    fn upsert_ticket(&self, ticket: &Ticket) -> Result<i64> {
        let conn = self.conn()?;
        let id = (ticket.id != 0).then_some(ticket.id);
        conn.execute(
            r#"
            INSERT INTO ticket (
                id, kind, parent, fields, created, reference, link, status,
                error, message, last_updated, tracker_id, application_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                parent = excluded.parent,
                fields = excluded.fields,
                created = excluded.created,
                reference = excluded.reference,
                link = excluded.link,
                status = excluded.status,
                error = excluded.error,
                message = excluded.message,
                last_updated = excluded.last_updated,
                tracker_id = excluded.tracker_id,
                application_id = excluded.application_id
            "#,
            params![
                id,
                ticket.kind,
                ticket.parent,
                ticket.fields.to_string(),
                ticket.created,
                ticket.reference,
                ticket.link,
                ticket.status,
                ticket.error,
                ticket.message,
                ticket.last_updated.map(|dt| dt.to_rfc3339()),
                ticket.tracker_id,
                ticket.application.id,
            ],
        )
        .with_context(|| format!("Failed to save ticket {}", ticket.id))?;
        Ok(id.unwrap_or_else(|| conn.last_insert_rowid()))
    }
}

impl Repository for Store {
    fn find_trackers(&self, connected: bool) -> Result<Vec<Tracker>> {
        let conn = self.conn()?;
        load_trackers(&conn, "WHERE t.connected = ?1", params![connected])
    }

    fn save_tracker(&self, tracker: &Tracker) -> Result<()> {
        self.upsert_tracker(tracker).map(|_| ())
    }

    fn save_ticket(&self, ticket: &Ticket) -> Result<()> {
        self.upsert_ticket(ticket).map(|_| ())
    }

    fn delete_ticket(&self, ticket: &Ticket) -> Result<()> {
        let rows = self
            .conn()?
            .execute("DELETE FROM ticket WHERE id = ?1", params![ticket.id])
            .with_context(|| format!("Failed to delete ticket {}", ticket.id))?;
        if rows == 0 {
            debug!(ticket_id = ticket.id, "Ticket already deleted");
        }
        Ok(())
    }
}

fn load_trackers(conn: &Connection, filter: &str, args: &[&dyn ToSql]) -> Result<Vec<Tracker>> {
    let sql = format!("SELECT {} {} ORDER BY t.id", TRACKER_COLUMNS, filter);
    let mut stmt = conn
        .prepare(&sql)
        .context("Failed to prepare tracker query")?;
    let mut trackers = stmt
        .query_map(args, tracker_from_row)
        .context("Failed to query trackers")?
        .collect::<rusqlite::Result<Vec<Tracker>>>()
        .context("Failed to read tracker rows")?;

    for tracker in &mut trackers {
        tracker.tickets = load_tickets(conn, "WHERE k.tracker_id = ?1", params![tracker.id])?;
    }
    Ok(trackers)
}

fn load_tickets(conn: &Connection, filter: &str, args: &[&dyn ToSql]) -> Result<Vec<Ticket>> {
    let sql = format!("SELECT {} {} ORDER BY k.id", TICKET_COLUMNS, filter);
    let mut stmt = conn
        .prepare(&sql)
        .context("Failed to prepare ticket query")?;
    let tickets = stmt
        .query_map(args, ticket_from_row)
        .context("Failed to query tickets")?
        .collect::<rusqlite::Result<Vec<Ticket>>>()
        .context("Failed to read ticket rows")?;
    Ok(tickets)
}

fn tracker_from_row(row: &Row<'_>) -> rusqlite::Result<Tracker> {
    Ok(Tracker {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        metadata: parse_json(4, row.get(4)?)?,
        message: row.get(5)?,
        connected: row.get(6)?,
        last_updated: parse_time(7, row.get(7)?)?,
        identity: Identity {
            id: row.get(8)?,
            name: row.get(9)?,
            user: Sealed {
                ciphertext: row.get(10)?,
                nonce: row.get(11)?,
            },
            password: Sealed {
                ciphertext: row.get(12)?,
                nonce: row.get(13)?,
            },
        },
        tickets: Vec::new(),
    })
}

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        kind: row.get(1)?,
        parent: row.get(2)?,
        fields: parse_json(3, row.get(3)?)?,
        created: row.get(4)?,
        reference: row.get(5)?,
        link: row.get(6)?,
        status: row.get(7)?,
        error: row.get(8)?,
        message: row.get(9)?,
        last_updated: parse_time(10, row.get(10)?)?,
        tracker_id: row.get(11)?,
        application: Application {
            id: row.get(12)?,
            name: row.get(13)?,
        },
    })
}

fn parse_json(idx: usize, raw: String) -> rusqlite::Result<Value> {
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_time(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}
