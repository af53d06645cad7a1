use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use super::{CatalogEntry, Change, Document, DocumentStore, RepositoryCatalog};
use crate::error::{Error, Result};
use crate::types::{Revision, UserAndTimestamp};

type Catalog = BTreeMap<String, BTreeMap<String, CatalogEntry>>;

/// Process-local store, used by tests and embedders that bring their own persistence.
#[derive(Default)]
pub struct InMemoryStore {
    documents: Mutex<HashMap<String, (Value, Revision)>>,
    catalog: Mutex<Catalog>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn documents(&self) -> MutexGuard<'_, HashMap<String, (Value, Revision)>> {
        self.documents.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a physical repository without touching any metadata document.
    pub fn register_repository(&self, project: &str, repo: &str, creation: UserAndTimestamp) {
        self.catalog().entry(project.to_string()).or_default().insert(
            repo.to_string(),
            CatalogEntry {
                name: repo.to_string(),
                creation,
            },
        );
    }
}

impl DocumentStore for InMemoryStore {
    fn create(&self, key: &str, change: &Change) -> Result<Revision> {
        let mut documents = self.documents();
        if documents.contains_key(key) {
            return Err(Error::DocumentExists(key.to_string()));
        }
        documents.insert(key.to_string(), (change.content.clone(), Revision::INIT));
        Ok(Revision::INIT)
    }

    fn fetch_latest(&self, key: &str) -> Result<Option<Document>> {
        Ok(self
            .documents()
            .get(key)
            .map(|(content, revision)| Document {
                content: content.clone(),
                revision: *revision,
            }))
    }

    fn commit(&self, key: &str, base: Revision, change: &Change) -> Result<Revision> {
        let mut documents = self.documents();
        let (content, head) = documents
            .get_mut(key)
            .ok_or_else(|| Error::DocumentNotFound(key.to_string()))?;

        if *head != base {
            return Err(Error::ChangeConflict {
                key: key.to_string(),
                base,
                head: *head,
            });
        }

        *content = change.content.clone();
        *head = head.forward(1);
        Ok(*head)
    }

    fn delete(&self, key: &str, base: Revision) -> Result<bool> {
        let mut documents = self.documents();
        let Some((_, head)) = documents.get(key) else {
            return Ok(false);
        };
        if *head != base {
            return Err(Error::ChangeConflict {
                key: key.to_string(),
                base,
                head: *head,
            });
        }
        documents.remove(key);
        Ok(true)
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .documents()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

impl RepositoryCatalog for InMemoryStore {
    fn list_repositories(&self, project: &str) -> Result<Vec<CatalogEntry>> {
        Ok(self
            .catalog()
            .get(project)
            .map(|repos| repos.values().cloned().collect())
            .unwrap_or_default())
    }

    fn purge_repository(&self, project: &str, repo: &str) -> Result<bool> {
        Ok(self
            .catalog()
            .get_mut(project)
            .is_some_and(|repos| repos.remove(repo).is_some()))
    }

    fn purge_project(&self, project: &str) -> Result<bool> {
        Ok(self.catalog().remove(project).is_some())
    }
}
