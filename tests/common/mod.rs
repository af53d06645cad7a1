#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use repometa::error::Result;
use repometa::metadata::MetadataService;
use repometa::store::{
    CatalogEntry, Change, Document, DocumentStore, InMemoryStore, RepositoryCatalog,
};
use repometa::types::{Revision, User, UserAndTimestamp};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub struct TestContext {
    pub store: Arc<InMemoryStore>,
    pub service: MetadataService,
    pub author: User,
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let service = MetadataService::new(store.clone()).with_catalog(store.clone());
        Self {
            store,
            service,
            author: User::new("author@localhost.localdomain").expect("valid login"),
        }
    }

    /// Creates a project the way a repository manager would, without any
    /// repository metadata.
    pub async fn project(&self, name: &str) {
        self.service
            .create_project(&self.author, name)
            .await
            .expect("create project");
    }

    /// Records a repository in the catalog only, leaving its metadata missing.
    pub fn physical_repo(&self, project: &str, repo: &str) {
        self.store.register_repository(
            project,
            repo,
            UserAndTimestamp::new(self.author.id(), Utc::now()),
        );
    }
}

pub fn user(login: &str) -> User {
    User::new(login).expect("valid login")
}

type Hook = Box<dyn FnOnce(&InMemoryStore) + Send>;

/// In-memory store that lets a test land a competing write right before the
/// next commit or delete of a given key.
#[derive(Default)]
pub struct InterceptingStore {
    pub inner: InMemoryStore,
    before_commit: Mutex<HashMap<String, Hook>>,
    before_delete: Mutex<HashMap<String, Hook>>,
}

impl InterceptingStore {
    pub fn before_next_commit(
        &self,
        key: &str,
        hook: impl FnOnce(&InMemoryStore) + Send + 'static,
    ) {
        self.before_commit
            .lock()
            .unwrap()
            .insert(key.to_string(), Box::new(hook));
    }

    pub fn before_next_delete(
        &self,
        key: &str,
        hook: impl FnOnce(&InMemoryStore) + Send + 'static,
    ) {
        self.before_delete
            .lock()
            .unwrap()
            .insert(key.to_string(), Box::new(hook));
    }
}

impl DocumentStore for InterceptingStore {
    fn create(&self, key: &str, change: &Change) -> Result<Revision> {
        self.inner.create(key, change)
    }

    fn fetch_latest(&self, key: &str) -> Result<Option<Document>> {
        self.inner.fetch_latest(key)
    }

    fn commit(&self, key: &str, base: Revision, change: &Change) -> Result<Revision> {
        let hook = self.before_commit.lock().unwrap().remove(key);
        if let Some(hook) = hook {
            hook(&self.inner);
        }
        self.inner.commit(key, base, change)
    }

    fn delete(&self, key: &str, base: Revision) -> Result<bool> {
        let hook = self.before_delete.lock().unwrap().remove(key);
        if let Some(hook) = hook {
            hook(&self.inner);
        }
        self.inner.delete(key, base)
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_keys(prefix)
    }
}

impl RepositoryCatalog for InterceptingStore {
    fn list_repositories(&self, project: &str) -> Result<Vec<CatalogEntry>> {
        self.inner.list_repositories(project)
    }

    fn purge_repository(&self, project: &str, repo: &str) -> Result<bool> {
        self.inner.purge_repository(project, repo)
    }

    fn purge_project(&self, project: &str) -> Result<bool> {
        self.inner.purge_project(project)
    }
}

pub fn intercepted() -> (Arc<InterceptingStore>, MetadataService) {
    let store = Arc::new(InterceptingStore::default());
    let service = MetadataService::new(store.clone()).with_catalog(store.clone());
    (store, service)
}

/// Commits `edit` to a stored document directly, bypassing the service.
pub fn edit_document<T, F>(store: &dyn DocumentStore, key: &str, edit: F) -> Revision
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&mut T),
{
    let doc = store.fetch_latest(key).unwrap().expect("document exists");
    let mut content: T = serde_json::from_value(doc.content).unwrap();
    edit(&mut content);
    let change = Change::new(
        "other@localhost.localdomain",
        "Concurrent change",
        serde_json::to_value(&content).unwrap(),
    );
    store.commit(key, doc.revision, &change).unwrap()
}
