//! The metadata facade.
//!
//! Every mutation follows the same protocol: fetch the latest document, apply
//! the change to a copy, and commit the copy against the revision it was read
//! at. A change that leaves the document as it was is not committed and yields
//! the current revision. When the store reports that the document moved on in
//! the meantime, the change is applied once more to the newest document; if it
//! is a no-op there, somebody already did the same thing and the newest
//! revision is returned, otherwise the conflict is reported to the caller.

pub mod lifecycle;
pub mod membership;
pub mod resolver;
pub mod validation;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::auth::TokenGenerator;
use crate::error::{Error, Result};
use crate::store::{CatalogEntry, Change, DocumentStore, RepositoryCatalog};
use crate::types::{
    DEFAULT_PROJECT_ROLES, Identity, Member, ProjectMetadata, ProjectRole, ProjectRoles,
    QuotaConfig, RepositoryMetadata, RepositoryRole, Revision, Token, Tokens, User,
    UserAndTimestamp,
};

pub use lifecycle::{INTERNAL_REPO, METADATA_REPO, RESERVED_REPOS, is_reserved};
pub use membership::Grantee;

const PROJECTS_PREFIX: &str = "projects/";
const TOKENS_KEY: &str = "tokens";
/// Attempts made by steps that must land despite unrelated concurrent writers.
const RETRY_ATTEMPTS: usize = 8;

fn project_key(project: &str) -> String {
    format!("{PROJECTS_PREFIX}{project}")
}

/// A token that was just created. `secret` is not stored anywhere.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub revision: Revision,
    pub secret: String,
}

pub struct MetadataService {
    store: Arc<dyn DocumentStore>,
    catalog: Option<Arc<dyn RepositoryCatalog>>,
    generator: TokenGenerator,
}

impl MetadataService {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            catalog: None,
            generator: TokenGenerator::new(),
        }
    }

    /// Enables metadata back-fill and physical purges through `catalog`.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn RepositoryCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    #[must_use]
    pub fn with_token_generator(mut self, generator: TokenGenerator) -> Self {
        self.generator = generator;
        self
    }

    // Commit protocol

    fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, Revision)>> {
        self.store
            .fetch_latest(key)?
            .map(|doc| Ok((serde_json::from_value(doc.content)?, doc.revision)))
            .transpose()
    }

    fn apply<T, F>(&self, key: &str, author: &User, summary: &str, mutation: F) -> Result<Revision>
    where
        T: Serialize + DeserializeOwned + Clone + PartialEq,
        F: Fn(&mut T) -> Result<()>,
    {
        let (current, base) = self
            .fetch::<T>(key)?
            .ok_or_else(|| Error::DocumentNotFound(key.to_string()))?;

        let mut next = current.clone();
        mutation(&mut next)?;
        if next == current {
            debug!(key, %base, summary, "Change already applied");
            return Ok(base);
        }

        let change = Change::new(author.id(), summary, serde_json::to_value(&next)?);
        match self.store.commit(key, base, &change) {
            Ok(revision) => {
                info!(key, %revision, author = author.id(), summary, "Committed change");
                Ok(revision)
            }
            Err(conflict @ Error::ChangeConflict { .. }) => {
                self.reconcile::<T, F>(key, summary, &mutation, conflict)
            }
            Err(e) => Err(e),
        }
    }

    fn reconcile<T, F>(&self, key: &str, summary: &str, mutation: &F, conflict: Error) -> Result<Revision>
    where
        T: Serialize + DeserializeOwned + Clone + PartialEq,
        F: Fn(&mut T) -> Result<()>,
    {
        let Some((latest, head)) = self.fetch::<T>(key)? else {
            return Err(conflict);
        };

        let mut next = latest.clone();
        mutation(&mut next)?;
        if next == latest {
            debug!(key, %head, summary, "Concurrent duplicate change, keeping existing revision");
            return Ok(head);
        }

        warn!(key, summary, "Conflicting concurrent change: {conflict}");
        Err(conflict)
    }

    fn apply_project<F>(&self, project: &str, author: &User, summary: &str, mutation: F) -> Result<Revision>
    where
        F: Fn(&mut ProjectMetadata) -> Result<()>,
    {
        self.apply(&project_key(project), author, summary, mutation)
            .map_err(|e| match e {
                Error::DocumentNotFound(_) => Error::ProjectNotFound(project.to_string()),
                e => e,
            })
    }

    fn apply_tokens<F>(&self, author: &User, summary: &str, mutation: F) -> Result<Revision>
    where
        F: Fn(&mut Tokens) -> Result<()>,
    {
        self.ensure_tokens_document()?;
        self.apply(TOKENS_KEY, author, summary, mutation)
    }

    fn ensure_tokens_document(&self) -> Result<()> {
        if self.store.fetch_latest(TOKENS_KEY)?.is_some() {
            return Ok(());
        }
        let change = Change::new(
            User::system().id(),
            "Create the token registry",
            serde_json::to_value(Tokens::default())?,
        );
        match self.store.create(TOKENS_KEY, &change) {
            Ok(_) | Err(Error::DocumentExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn fetch_project(&self, project: &str) -> Result<(ProjectMetadata, Revision)> {
        self.fetch(&project_key(project))?
            .ok_or_else(|| Error::ProjectNotFound(project.to_string()))
    }

    fn fetch_tokens(&self) -> Result<Tokens> {
        Ok(self
            .fetch::<Tokens>(TOKENS_KEY)?
            .map(|(tokens, _)| tokens)
            .unwrap_or_default())
    }

    // Projects

    pub async fn list_projects(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_keys(PROJECTS_PREFIX)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(PROJECTS_PREFIX).map(str::to_string))
            .collect())
    }

    /// Returns a project's metadata, first adding default metadata for any
    /// catalog repository that has none yet.
    pub async fn get_project(&self, project: &str) -> Result<ProjectMetadata> {
        let (metadata, _) = self.fetch_project(project)?;
        let Some(catalog) = &self.catalog else {
            return Ok(metadata);
        };

        let missing: Vec<CatalogEntry> = catalog
            .list_repositories(project)?
            .into_iter()
            .filter(|entry| entry.name != INTERNAL_REPO && metadata.repo(&entry.name).is_none())
            .collect();
        if missing.is_empty() {
            return Ok(metadata);
        }

        let names: Vec<&str> = missing.iter().map(|e| e.name.as_str()).collect();
        let summary = format!("Add the metadata of repositories: {}", names.join(", "));
        self.apply_project(project, &User::system(), &summary, |p| {
            lifecycle::backfill_repos(p, &missing);
            Ok(())
        })?;

        Ok(self.fetch_project(project)?.0)
    }

    pub async fn create_project(&self, author: &User, project: &str) -> Result<Revision> {
        validation::validate_project_name(project)?;

        let metadata = lifecycle::new_project(project, UserAndTimestamp::now(author));
        let change = Change::new(
            author.id(),
            format!("Create a new project: {project}"),
            serde_json::to_value(&metadata)?,
        );
        let revision = self
            .store
            .create(&project_key(project), &change)
            .map_err(|e| match e {
                Error::DocumentExists(_) => Error::ProjectExists(project.to_string()),
                e => e,
            })?;

        info!(project, author = author.id(), "Created project");
        Ok(revision)
    }

    pub async fn remove_project(&self, author: &User, project: &str) -> Result<Revision> {
        let removal = UserAndTimestamp::now(author);
        self.apply_project(project, author, &format!("Remove the project: {project}"), |p| {
            lifecycle::remove_project(p, &removal)
        })
    }

    pub async fn restore_project(&self, author: &User, project: &str) -> Result<Revision> {
        self.apply_project(project, author, &format!("Restore the project: {project}"), |p| {
            lifecycle::restore_project(p)
        })
    }

    /// Destroys a removed project's document. Nothing can be done with the
    /// project afterwards, but its name may be used again.
    pub async fn purge_project(&self, author: &User, project: &str) -> Result<()> {
        let key = project_key(project);
        let mut attempt = 1;
        loop {
            let (metadata, revision) = self.fetch_project(project)?;
            if !metadata.is_removed() {
                return Err(Error::ProjectNotFound(project.to_string()));
            }

            match self.store.delete(&key, revision) {
                Ok(true) => break,
                Ok(false) => return Err(Error::ProjectNotFound(project.to_string())),
                Err(Error::ChangeConflict { .. }) if attempt < RETRY_ATTEMPTS => {
                    debug!(project, %revision, "Project changed before purge, checking again");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(catalog) = &self.catalog {
            catalog.purge_project(project)?;
        }
        info!(project, author = author.id(), "Purged project");
        Ok(())
    }

    // Repositories

    pub async fn get_repo(&self, project: &str, repo: &str) -> Result<RepositoryMetadata> {
        self.get_project(project)
            .await?
            .repos
            .remove(repo)
            .ok_or_else(|| Error::RepositoryNotFound {
                project: project.to_string(),
                repo: repo.to_string(),
            })
    }

    /// Adds a repository with the default roles: members may write, guests have no access.
    pub async fn add_repo_with_defaults(
        &self,
        author: &User,
        project: &str,
        repo: &str,
    ) -> Result<Revision> {
        self.add_repo(author, project, repo, DEFAULT_PROJECT_ROLES)
            .await
    }

    pub async fn add_repo(
        &self,
        author: &User,
        project: &str,
        repo: &str,
        roles: ProjectRoles,
    ) -> Result<Revision> {
        validation::validate_repo_name(repo)?;
        lifecycle::reject_reserved(repo, "add")?;

        let creation = UserAndTimestamp::now(author);
        self.apply_project(project, author, &format!("Add a repository: {repo}"), |p| {
            lifecycle::add_repo(p, repo, &creation, roles)
        })
    }

    pub async fn remove_repo(&self, author: &User, project: &str, repo: &str) -> Result<Revision> {
        lifecycle::reject_reserved(repo, "remove")?;

        let removal = UserAndTimestamp::now(author);
        self.apply_project(project, author, &format!("Remove the repository: {repo}"), |p| {
            lifecycle::remove_repo(p, repo, &removal)
        })
    }

    pub async fn restore_repo(&self, author: &User, project: &str, repo: &str) -> Result<Revision> {
        lifecycle::reject_reserved(repo, "restore")?;

        self.apply_project(project, author, &format!("Restore the repository: {repo}"), |p| {
            lifecycle::restore_repo(p, repo)
        })
    }

    pub async fn purge_repo(&self, author: &User, project: &str, repo: &str) -> Result<Revision> {
        lifecycle::reject_reserved(repo, "purge")?;

        let revision =
            self.apply_project(project, author, &format!("Purge the repository: {repo}"), |p| {
                lifecycle::purge_repo(p, repo)
            })?;
        if let Some(catalog) = &self.catalog {
            catalog.purge_repository(project, repo)?;
        }
        Ok(revision)
    }

    pub async fn update_repository_project_roles(
        &self,
        author: &User,
        project: &str,
        repo: &str,
        roles: ProjectRoles,
    ) -> Result<Revision> {
        lifecycle::check_project_roles(repo, &roles)?;

        let summary = format!("Update the project roles of the repository: {repo}");
        self.apply_project(project, author, &summary, |p| {
            lifecycle::update_project_roles(p, repo, roles)
        })
    }

    pub async fn update_write_quota(
        &self,
        author: &User,
        project: &str,
        repo: &str,
        quota: QuotaConfig,
    ) -> Result<Revision> {
        let summary = format!(
            "Update the write quota of the repository {repo}: {} requests per {}s",
            quota.request_quota, quota.time_window_seconds
        );
        self.apply_project(project, author, &summary, |p| {
            lifecycle::update_write_quota(p, repo, quota)
        })
    }

    // Members

    pub async fn get_member(&self, project: &str, member: &User) -> Result<Member> {
        self.fetch_project(project)?
            .0
            .members
            .remove(member.id())
            .ok_or_else(|| Error::MemberNotFound {
                project: project.to_string(),
                member: member.id().to_string(),
            })
    }

    pub async fn add_member(
        &self,
        author: &User,
        project: &str,
        member: &User,
        role: ProjectRole,
    ) -> Result<Revision> {
        let creation = UserAndTimestamp::now(author);
        let summary = format!("Add a member to the project {project}: {}", member.id());
        self.apply_project(project, author, &summary, |p| {
            membership::add_member(p, member.id(), role, &creation)
        })
    }

    pub async fn update_member_role(
        &self,
        author: &User,
        project: &str,
        member: &User,
        role: ProjectRole,
    ) -> Result<Revision> {
        let summary = format!("Update the role of the member {} to {role}", member.id());
        self.apply_project(project, author, &summary, |p| {
            membership::update_member_role(p, member.id(), role)
        })
    }

    /// Removes a member and, in the same commit, every repository grant it had.
    pub async fn remove_member(&self, author: &User, project: &str, member: &User) -> Result<Revision> {
        let summary = format!("Remove the member {} from the project {project}", member.id());
        self.apply_project(project, author, &summary, |p| {
            membership::remove_member(p, member.id())
        })
    }

    // Per-repository grants

    async fn add_repository_role(
        &self,
        author: &User,
        project: &str,
        repo: &str,
        grantee: Grantee,
        id: &str,
        role: RepositoryRole,
    ) -> Result<Revision> {
        let summary = format!("Add the {role} role of {id} for the repository {repo}");
        self.apply_project(project, author, &summary, |p| {
            membership::add_repository_role(p, repo, grantee, id, role)
        })
    }

    async fn update_repository_role(
        &self,
        author: &User,
        project: &str,
        repo: &str,
        grantee: Grantee,
        id: &str,
        role: RepositoryRole,
    ) -> Result<Revision> {
        let summary = format!("Update the role of {id} for the repository {repo} to {role}");
        self.apply_project(project, author, &summary, |p| {
            membership::update_repository_role(p, repo, grantee, id, role)
        })
    }

    async fn remove_repository_role(
        &self,
        author: &User,
        project: &str,
        repo: &str,
        grantee: Grantee,
        id: &str,
    ) -> Result<Revision> {
        let summary = format!("Remove the role of {id} for the repository {repo}");
        self.apply_project(project, author, &summary, |p| {
            membership::remove_repository_role(p, repo, grantee, id)
        })
    }

    pub async fn add_user_repository_role(
        &self,
        author: &User,
        project: &str,
        repo: &str,
        member: &User,
        role: RepositoryRole,
    ) -> Result<Revision> {
        self.add_repository_role(author, project, repo, Grantee::User, member.id(), role)
            .await
    }

    pub async fn update_user_repository_role(
        &self,
        author: &User,
        project: &str,
        repo: &str,
        member: &User,
        role: RepositoryRole,
    ) -> Result<Revision> {
        self.update_repository_role(author, project, repo, Grantee::User, member.id(), role)
            .await
    }

    pub async fn remove_user_repository_role(
        &self,
        author: &User,
        project: &str,
        repo: &str,
        member: &User,
    ) -> Result<Revision> {
        self.remove_repository_role(author, project, repo, Grantee::User, member.id())
            .await
    }

    pub async fn add_token_repository_role(
        &self,
        author: &User,
        project: &str,
        repo: &str,
        app_id: &str,
        role: RepositoryRole,
    ) -> Result<Revision> {
        self.add_repository_role(author, project, repo, Grantee::Token, app_id, role)
            .await
    }

    pub async fn update_token_repository_role(
        &self,
        author: &User,
        project: &str,
        repo: &str,
        app_id: &str,
        role: RepositoryRole,
    ) -> Result<Revision> {
        self.update_repository_role(author, project, repo, Grantee::Token, app_id, role)
            .await
    }

    pub async fn remove_token_repository_role(
        &self,
        author: &User,
        project: &str,
        repo: &str,
        app_id: &str,
    ) -> Result<Revision> {
        self.remove_repository_role(author, project, repo, Grantee::Token, app_id)
            .await
    }

    pub async fn find_repository_role(
        &self,
        project: &str,
        repo: &str,
        identity: &Identity,
    ) -> Result<Option<RepositoryRole>> {
        let (metadata, _) = self.fetch_project(project)?;
        resolver::find_repository_role(&metadata, repo, identity)
    }

    // Tokens

    pub async fn get_tokens(&self) -> Result<Tokens> {
        self.fetch_tokens()
    }

    pub async fn find_token_by_app_id(&self, app_id: &str) -> Result<Token> {
        self.fetch_tokens()?
            .app_ids
            .remove(app_id)
            .ok_or_else(|| Error::TokenNotFound(app_id.to_string()))
    }

    /// Finds the token a raw secret belongs to. Destroyed tokens are never found;
    /// deactivated ones are, so the caller can tell the two apart.
    pub async fn find_token_by_secret(&self, secret: &str) -> Result<Token> {
        let lookup = self.generator.parse(secret)?;
        let tokens = self.fetch_tokens()?;
        let token = tokens
            .find_by_lookup(&lookup)
            .filter(|t| !t.is_deleted())
            .ok_or_else(|| Error::TokenNotFound(lookup.clone()))?;

        if !self.generator.verify(secret, &token.secret_hash)? {
            return Err(Error::TokenNotFound(lookup));
        }
        Ok(token.clone())
    }

    pub async fn create_token(
        &self,
        author: &User,
        app_id: &str,
        system_admin: bool,
    ) -> Result<IssuedToken> {
        validation::validate_app_id(app_id)?;

        let secret = self.generator.generate()?;
        let token = Token {
            app_id: app_id.to_string(),
            secret_lookup: secret.lookup,
            secret_hash: secret.hash,
            system_admin,
            creation: UserAndTimestamp::now(author),
            activation: None,
            deactivation: None,
            deletion: None,
        };

        let revision = self.apply_tokens(author, &format!("Add a token: {app_id}"), |t| {
            membership::create_token(t, token.clone())
        })?;
        Ok(IssuedToken {
            revision,
            secret: secret.raw,
        })
    }

    /// Destroys a token and removes it from every project it was registered to.
    pub async fn destroy_token(&self, author: &User, app_id: &str) -> Result<Revision> {
        let deletion = UserAndTimestamp::now(author);
        let revision = self.apply_tokens(author, &format!("Destroy the token: {app_id}"), |t| {
            membership::destroy_token(t, app_id, &deletion)
        })?;
        self.forget_token_everywhere(author, app_id)?;
        Ok(revision)
    }

    /// Erases a destroyed token. Registrations a previous destroy left behind
    /// are removed first.
    pub async fn purge_token(&self, author: &User, app_id: &str) -> Result<Revision> {
        let deleted = self
            .fetch_tokens()?
            .get(app_id)
            .is_some_and(Token::is_deleted);
        if deleted {
            self.forget_token_everywhere(author, app_id)?;
        }
        self.apply_tokens(author, &format!("Purge the token: {app_id}"), |t| {
            membership::purge_token(t, app_id)
        })
    }

    fn forget_token_everywhere(&self, author: &User, app_id: &str) -> Result<()> {
        for key in self.store.list_keys(PROJECTS_PREFIX)? {
            if let Some(project) = key.strip_prefix(PROJECTS_PREFIX) {
                self.forget_token_in(author, project, app_id)?;
            }
        }
        Ok(())
    }

    /// Drops a token's registration and grants from one project, retrying
    /// over concurrent writes to it.
    fn forget_token_in(&self, author: &User, project: &str, app_id: &str) -> Result<()> {
        let summary = format!("Remove the token {app_id} from the project {project}");
        let mut attempt = 1;
        loop {
            match self.apply_project(project, author, &summary, |p| {
                membership::forget_token(p, app_id);
                Ok(())
            }) {
                // Purged while we were iterating.
                Ok(_) | Err(Error::ProjectNotFound(_)) => return Ok(()),
                Err(Error::ChangeConflict { .. }) if attempt < RETRY_ATTEMPTS => {
                    debug!(project, app_id, attempt, "Retrying token removal");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn activate_token(&self, author: &User, app_id: &str) -> Result<Revision> {
        let activation = UserAndTimestamp::now(author);
        self.apply_tokens(author, &format!("Activate the token: {app_id}"), |t| {
            membership::activate_token(t, app_id, &activation)
        })
    }

    pub async fn deactivate_token(&self, author: &User, app_id: &str) -> Result<Revision> {
        let deactivation = UserAndTimestamp::now(author);
        self.apply_tokens(author, &format!("Deactivate the token: {app_id}"), |t| {
            membership::deactivate_token(t, app_id, &deactivation)
        })
    }

    pub async fn update_token_level(
        &self,
        author: &User,
        app_id: &str,
        system_admin: bool,
    ) -> Result<Revision> {
        let level = if system_admin { "system admin" } else { "user" };
        self.apply_tokens(author, &format!("Update the level of {app_id} to {level}"), |t| {
            membership::update_token_level(t, app_id, system_admin)
        })
    }

    /// Registers a token to a project.
    pub async fn add_token(
        &self,
        author: &User,
        project: &str,
        app_id: &str,
        role: ProjectRole,
    ) -> Result<Revision> {
        if self.fetch_tokens()?.get_live(app_id).is_none() {
            return Err(Error::TokenNotFound(app_id.to_string()));
        }

        let creation = UserAndTimestamp::now(author);
        let summary = format!("Add the token {app_id} to the project {project}");
        let revision = self.apply_project(project, author, &summary, |p| {
            membership::add_token(p, app_id, role, &creation)
        })?;

        // A destroy that ran in between may have swept this project already.
        if self.fetch_tokens()?.get_live(app_id).is_some() {
            return Ok(revision);
        }
        warn!(project, app_id, "Token destroyed while being registered, rolling back");
        self.forget_token_in(author, project, app_id)?;
        Err(Error::TokenNotFound(app_id.to_string()))
    }

    pub async fn update_token_role(
        &self,
        author: &User,
        project: &str,
        app_id: &str,
        role: ProjectRole,
    ) -> Result<Revision> {
        let summary = format!("Update the role of the token {app_id} to {role}");
        self.apply_project(project, author, &summary, |p| {
            membership::update_token_role(p, app_id, role)
        })
    }

    /// Unregisters a token from a project and, in the same commit, drops its
    /// repository grants there.
    pub async fn remove_token(&self, author: &User, project: &str, app_id: &str) -> Result<Revision> {
        let summary = format!("Remove the token {app_id} from the project {project}");
        self.apply_project(project, author, &summary, |p| {
            membership::remove_token(p, app_id)
        })
    }
}
