//! Project and repository state transitions.
//!
//! Every function here edits a [`ProjectMetadata`] in place and fails before
//! touching it when the transition is not allowed. Running the same function
//! on a document that already reflects its effect either leaves the document
//! untouched or fails, never both.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::store::CatalogEntry;
use crate::types::{
    DEFAULT_PROJECT_ROLES, Member, ProjectMetadata, ProjectRole, ProjectRoles, QuotaConfig,
    RepositoryMetadata, RepositoryRole, UserAndTimestamp,
};

/// Internal history repository. Never carries metadata of its own.
pub const INTERNAL_REPO: &str = "dogma";
/// Repository holding the project's own metadata.
pub const METADATA_REPO: &str = "meta";

pub const RESERVED_REPOS: [&str; 2] = [INTERNAL_REPO, METADATA_REPO];

#[must_use]
pub fn is_reserved(repo: &str) -> bool {
    RESERVED_REPOS.contains(&repo)
}

pub(crate) fn reject_reserved(repo: &str, action: &str) -> Result<()> {
    if is_reserved(repo) {
        return Err(Error::Unsupported(format!(
            "Can't {action} internal repository: {repo}"
        )));
    }
    Ok(())
}

/// Builds the initial document of a project: the metadata repository plus the
/// creator registered as owner.
#[must_use]
pub fn new_project(name: &str, creation: UserAndTimestamp) -> ProjectMetadata {
    let mut repos = BTreeMap::new();
    repos.insert(
        METADATA_REPO.to_string(),
        RepositoryMetadata::new(METADATA_REPO, creation.clone(), ProjectRoles::none()),
    );

    let mut members = BTreeMap::new();
    members.insert(
        creation.user.clone(),
        Member {
            id: creation.user.clone(),
            role: ProjectRole::Owner,
            creation: creation.clone(),
        },
    );

    ProjectMetadata {
        name: name.to_string(),
        repos,
        members,
        tokens: BTreeMap::new(),
        creation,
        removal: None,
    }
}

pub fn remove_project(project: &mut ProjectMetadata, removal: &UserAndTimestamp) -> Result<()> {
    if project.is_removed() {
        return Err(Error::Conflict(format!(
            "project already removed: {}",
            project.name
        )));
    }
    project.removal = Some(removal.clone());
    Ok(())
}

pub fn restore_project(project: &mut ProjectMetadata) -> Result<()> {
    if !project.is_removed() {
        return Err(Error::ProjectNotFound(project.name.clone()));
    }
    project.removal = None;
    Ok(())
}

pub(crate) fn repo_mut<'a>(
    project: &'a mut ProjectMetadata,
    repo: &str,
) -> Result<&'a mut RepositoryMetadata> {
    let name = project.name.clone();
    project
        .repos
        .get_mut(repo)
        .ok_or_else(|| Error::RepositoryNotFound {
            project: name,
            repo: repo.to_string(),
        })
}

pub fn add_repo(
    project: &mut ProjectMetadata,
    repo: &str,
    creation: &UserAndTimestamp,
    roles: ProjectRoles,
) -> Result<()> {
    if project.repos.contains_key(repo) {
        return Err(Error::RepositoryExists {
            project: project.name.clone(),
            repo: repo.to_string(),
        });
    }
    project.repos.insert(
        repo.to_string(),
        RepositoryMetadata::new(repo, creation.clone(), roles),
    );
    Ok(())
}

pub fn remove_repo(
    project: &mut ProjectMetadata,
    repo: &str,
    removal: &UserAndTimestamp,
) -> Result<()> {
    let metadata = repo_mut(project, repo)?;
    if metadata.is_removed() {
        return Err(Error::Conflict(format!("repository already removed: {repo}")));
    }
    metadata.removal = Some(removal.clone());
    Ok(())
}

pub fn restore_repo(project: &mut ProjectMetadata, repo: &str) -> Result<()> {
    let not_found = Error::RepositoryNotFound {
        project: project.name.clone(),
        repo: repo.to_string(),
    };
    let metadata = repo_mut(project, repo)?;
    if !metadata.is_removed() {
        return Err(not_found);
    }
    metadata.removal = None;
    Ok(())
}

/// Drops a removed repository and every grant it carried.
pub fn purge_repo(project: &mut ProjectMetadata, repo: &str) -> Result<()> {
    if !repo_mut(project, repo)?.is_removed() {
        return Err(Error::RepositoryNotFound {
            project: project.name.clone(),
            repo: repo.to_string(),
        });
    }
    project.repos.remove(repo);
    Ok(())
}

/// Adds default metadata for catalog repositories that have none.
pub fn backfill_repos(project: &mut ProjectMetadata, entries: &[CatalogEntry]) {
    for entry in entries {
        if entry.name == INTERNAL_REPO {
            continue;
        }
        project
            .repos
            .entry(entry.name.clone())
            .or_insert_with(|| {
                RepositoryMetadata::new(&entry.name, entry.creation.clone(), DEFAULT_PROJECT_ROLES)
            });
    }
}

/// Rejects role configurations that reserved repositories must never carry.
pub fn check_project_roles(repo: &str, roles: &ProjectRoles) -> Result<()> {
    match repo {
        INTERNAL_REPO => Err(Error::Unsupported(format!(
            "Can't update role for internal repository: {repo}"
        ))),
        METADATA_REPO if roles.guest.is_some() => Err(Error::Unsupported(format!(
            "Can't give a role to guest for internal repository: {repo}"
        ))),
        METADATA_REPO if roles.member > Some(RepositoryRole::Read) => {
            Err(Error::Unsupported(format!(
                "Can't give a write role to members for internal repository: {repo}"
            )))
        }
        _ => Ok(()),
    }
}

pub fn update_project_roles(
    project: &mut ProjectMetadata,
    repo: &str,
    roles: ProjectRoles,
) -> Result<()> {
    check_project_roles(repo, &roles)?;
    repo_mut(project, repo)?.roles.projects = roles;
    Ok(())
}

pub fn update_write_quota(
    project: &mut ProjectMetadata,
    repo: &str,
    quota: QuotaConfig,
) -> Result<()> {
    quota.validate()?;
    repo_mut(project, repo)?.write_quota = Some(quota);
    Ok(())
}
