use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::schema::SCHEMA;
use super::{CatalogEntry, Change, Document, DocumentStore, RepositoryCatalog};
use crate::error::{Error, Result};
use crate::types::{Revision, UserAndTimestamp};

/// A landed change as recorded in the commit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub revision: Revision,
    pub author: String,
    pub summary: String,
    pub committed_at: DateTime<Utc>,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Records a physical repository without touching any metadata document.
    pub fn register_repository(
        &self,
        project: &str,
        repo: &str,
        creation: &UserAndTimestamp,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO repositories (project, name, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (project, name) DO NOTHING",
            params![
                project,
                repo,
                creation.user,
                format_datetime(&creation.timestamp)
            ],
        )?;
        Ok(())
    }

    /// Returns the commit log of a document, oldest first.
    pub fn commit_log(&self, key: &str) -> Result<Vec<CommitRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT revision, author, summary, committed_at
             FROM commits WHERE key = ?1 ORDER BY revision",
        )?;

        let rows = stmt.query_map(params![key], |row| {
            Ok(CommitRecord {
                revision: read_revision(row.get(0)?, 0)?,
                author: row.get(1)?,
                summary: row.get(2)?,
                committed_at: parse_datetime(&row.get::<_, String>(3)?),
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn read_revision(value: i64, column: usize) -> rusqlite::Result<Revision> {
    u64::try_from(value)
        .map(Revision::new)
        .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(column, value))
}

fn write_revision(revision: Revision) -> Result<i64> {
    i64::try_from(revision.major())
        .map_err(|e| Error::Database(rusqlite::Error::ToSqlConversionFailure(Box::new(e))))
}

fn head_revision(tx: &rusqlite::Transaction<'_>, key: &str) -> Result<Revision> {
    tx.query_row(
        "SELECT revision FROM documents WHERE key = ?1",
        params![key],
        |row| read_revision(row.get(0)?, 0),
    )
    .optional()?
    .ok_or_else(|| Error::DocumentNotFound(key.to_string()))
}

impl DocumentStore for SqliteStore {
    fn create(&self, key: &str, change: &Change) -> Result<Revision> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE key = ?1)",
            params![key],
            |row| row.get(0),
        )?;
        if exists {
            return Err(Error::DocumentExists(key.to_string()));
        }

        let now = format_datetime(&Utc::now());
        let revision = Revision::INIT;
        tx.execute(
            "INSERT INTO documents (key, revision, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![
                key,
                write_revision(revision)?,
                serde_json::to_string(&change.content)?,
                now
            ],
        )?;
        tx.execute(
            "INSERT INTO commits (key, revision, author, summary, committed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, write_revision(revision)?, change.author, change.summary, now],
        )?;
        tx.commit()?;

        Ok(revision)
    }

    fn fetch_latest(&self, key: &str) -> Result<Option<Document>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT content, revision FROM documents WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, read_revision(row.get(1)?, 1)?)),
            )
            .optional()?;

        row.map(|(content, revision)| {
            Ok(Document {
                content: serde_json::from_str(&content)?,
                revision,
            })
        })
        .transpose()
    }

    fn commit(&self, key: &str, base: Revision, change: &Change) -> Result<Revision> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let head = head_revision(&tx, key)?;

        if head != base {
            return Err(Error::ChangeConflict {
                key: key.to_string(),
                base,
                head,
            });
        }

        let next = head.forward(1);
        let now = format_datetime(&Utc::now());
        tx.execute(
            "UPDATE documents SET revision = ?1, content = ?2, updated_at = ?3 WHERE key = ?4",
            params![
                write_revision(next)?,
                serde_json::to_string(&change.content)?,
                now,
                key
            ],
        )?;
        tx.execute(
            "INSERT INTO commits (key, revision, author, summary, committed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, write_revision(next)?, change.author, change.summary, now],
        )?;
        tx.commit()?;

        Ok(next)
    }

    fn delete(&self, key: &str, base: Revision) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let head = match head_revision(&tx, key) {
            Ok(head) => head,
            Err(Error::DocumentNotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        if head != base {
            return Err(Error::ChangeConflict {
                key: key.to_string(),
                base,
                head,
            });
        }

        let rows = tx.execute("DELETE FROM documents WHERE key = ?1", params![key])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT key FROM documents WHERE substr(key, 1, ?2) = ?1 ORDER BY key")?;

        let rows = stmt.query_map(params![prefix, prefix.len() as i64], |row| row.get(0))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

impl RepositoryCatalog for SqliteStore {
    fn list_repositories(&self, project: &str) -> Result<Vec<CatalogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name, created_by, created_at FROM repositories
             WHERE project = ?1 ORDER BY name",
        )?;

        let rows = stmt.query_map(params![project], |row| {
            Ok(CatalogEntry {
                name: row.get(0)?,
                creation: UserAndTimestamp::new(
                    row.get::<_, String>(1)?,
                    parse_datetime(&row.get::<_, String>(2)?),
                ),
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn purge_repository(&self, project: &str, repo: &str) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM repositories WHERE project = ?1 AND name = ?2",
            params![project, repo],
        )?;
        Ok(rows > 0)
    }

    fn purge_project(&self, project: &str) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM repositories WHERE project = ?1",
            params![project],
        )?;
        Ok(rows > 0)
    }
}
