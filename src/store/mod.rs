mod memory;
mod schema;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use serde_json::Value;

use crate::error::Result;
use crate::types::{Revision, UserAndTimestamp};

/// A document together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub content: Value,
    pub revision: Revision,
}

/// Full replacement content for a document, plus who made it and why.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub author: String,
    pub summary: String,
    pub content: Value,
}

impl Change {
    #[must_use]
    pub fn new(author: impl Into<String>, summary: impl Into<String>, content: Value) -> Self {
        Self {
            author: author.into(),
            summary: summary.into(),
            content,
        }
    }
}

/// Versioned document storage with compare-and-commit semantics.
///
/// Implementations must make `commit` atomic: either the head is still `base`
/// and the change lands as `base + 1`, or nothing is written and
/// [`Error::ChangeConflict`](crate::error::Error::ChangeConflict) is returned.
pub trait DocumentStore: Send + Sync {
    /// Creates a document at [`Revision::INIT`]. Fails with `DocumentExists`.
    fn create(&self, key: &str, change: &Change) -> Result<Revision>;

    fn fetch_latest(&self, key: &str) -> Result<Option<Document>>;

    /// Fails with `DocumentNotFound` or `ChangeConflict`.
    fn commit(&self, key: &str, base: Revision, change: &Change) -> Result<Revision>;

    /// Deletes the document if its head is still `base`. Returns false when
    /// it is already gone, `ChangeConflict` when it moved on.
    fn delete(&self, key: &str, base: Revision) -> Result<bool>;

    /// Lists keys starting with `prefix`, sorted.
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// A repository that physically exists in a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub creation: UserAndTimestamp,
}

/// Knows which repositories physically exist, independent of their metadata.
pub trait RepositoryCatalog: Send + Sync {
    fn list_repositories(&self, project: &str) -> Result<Vec<CatalogEntry>>;
    fn purge_repository(&self, project: &str, repo: &str) -> Result<bool>;
    fn purge_project(&self, project: &str) -> Result<bool>;
}
