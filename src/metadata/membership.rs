//! Members, token registrations and their per-repository grants.

use std::collections::BTreeMap;

use super::lifecycle::{INTERNAL_REPO, repo_mut};
use crate::error::{Error, Result};
use crate::types::{
    Member, ProjectMetadata, ProjectRole, RepositoryMetadata, RepositoryRole, Token,
    TokenRegistration, Tokens, UserAndTimestamp,
};

/// Who a per-repository grant is for. User grants and token grants follow the
/// same rules and differ only in which maps they live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grantee {
    User,
    Token,
}

impl Grantee {
    fn grants(self, repo: &mut RepositoryMetadata) -> &mut BTreeMap<String, RepositoryRole> {
        match self {
            Grantee::User => &mut repo.roles.users,
            Grantee::Token => &mut repo.roles.tokens,
        }
    }

    fn is_registered(self, project: &ProjectMetadata, id: &str) -> bool {
        match self {
            Grantee::User => project.members.contains_key(id),
            Grantee::Token => project.tokens.contains_key(id),
        }
    }

    fn not_found(self, project: &ProjectMetadata, id: &str) -> Error {
        match self {
            Grantee::User => Error::MemberNotFound {
                project: project.name.clone(),
                member: id.to_string(),
            },
            Grantee::Token => Error::TokenNotFound(id.to_string()),
        }
    }
}

pub fn add_member(
    project: &mut ProjectMetadata,
    member_id: &str,
    role: ProjectRole,
    creation: &UserAndTimestamp,
) -> Result<()> {
    if project.members.contains_key(member_id) {
        return Err(Error::Conflict(format!(
            "{member_id} is already a member of {}",
            project.name
        )));
    }
    project.members.insert(
        member_id.to_string(),
        Member {
            id: member_id.to_string(),
            role,
            creation: creation.clone(),
        },
    );
    Ok(())
}

pub fn update_member_role(
    project: &mut ProjectMetadata,
    member_id: &str,
    role: ProjectRole,
) -> Result<()> {
    let not_found = Grantee::User.not_found(project, member_id);
    project.members.get_mut(member_id).ok_or(not_found)?.role = role;
    Ok(())
}

/// Removes a member together with every repository grant it holds.
pub fn remove_member(project: &mut ProjectMetadata, member_id: &str) -> Result<()> {
    if project.members.remove(member_id).is_none() {
        return Err(Grantee::User.not_found(project, member_id));
    }
    revoke_everywhere(project, Grantee::User, member_id);
    Ok(())
}

/// Registers a globally existing token to the project.
pub fn add_token(
    project: &mut ProjectMetadata,
    app_id: &str,
    role: ProjectRole,
    creation: &UserAndTimestamp,
) -> Result<()> {
    if project.tokens.contains_key(app_id) {
        return Err(Error::Conflict(format!(
            "token {app_id} is already registered to {}",
            project.name
        )));
    }
    project.tokens.insert(
        app_id.to_string(),
        TokenRegistration {
            app_id: app_id.to_string(),
            role,
            creation: creation.clone(),
        },
    );
    Ok(())
}

pub fn update_token_role(
    project: &mut ProjectMetadata,
    app_id: &str,
    role: ProjectRole,
) -> Result<()> {
    project
        .tokens
        .get_mut(app_id)
        .ok_or_else(|| Error::TokenNotFound(app_id.to_string()))?
        .role = role;
    Ok(())
}

/// Unregisters a token from the project together with its repository grants.
pub fn remove_token(project: &mut ProjectMetadata, app_id: &str) -> Result<()> {
    if project.tokens.remove(app_id).is_none() {
        return Err(Error::TokenNotFound(app_id.to_string()));
    }
    revoke_everywhere(project, Grantee::Token, app_id);
    Ok(())
}

/// Like [`remove_token`], but a project that never knew the token is left as is.
pub fn forget_token(project: &mut ProjectMetadata, app_id: &str) {
    project.tokens.remove(app_id);
    revoke_everywhere(project, Grantee::Token, app_id);
}

fn revoke_everywhere(project: &mut ProjectMetadata, grantee: Grantee, id: &str) {
    for repo in project.repos.values_mut() {
        grantee.grants(repo).remove(id);
    }
}

fn grant_target<'a>(
    project: &'a mut ProjectMetadata,
    repo: &str,
    grantee: Grantee,
    id: &str,
) -> Result<&'a mut BTreeMap<String, RepositoryRole>> {
    if repo == INTERNAL_REPO {
        return Err(Error::Unsupported(format!(
            "Can't grant a role for internal repository: {repo}"
        )));
    }
    if !grantee.is_registered(project, id) {
        return Err(grantee.not_found(project, id));
    }
    Ok(grantee.grants(repo_mut(project, repo)?))
}

pub fn add_repository_role(
    project: &mut ProjectMetadata,
    repo: &str,
    grantee: Grantee,
    id: &str,
    role: RepositoryRole,
) -> Result<()> {
    let grants = grant_target(project, repo, grantee, id)?;
    if grants.contains_key(id) {
        return Err(Error::Conflict(format!(
            "{id} already has a role for repository {repo}"
        )));
    }
    grants.insert(id.to_string(), role);
    Ok(())
}

pub fn update_repository_role(
    project: &mut ProjectMetadata,
    repo: &str,
    grantee: Grantee,
    id: &str,
    role: RepositoryRole,
) -> Result<()> {
    let not_found = grantee.not_found(project, id);
    let grants = grant_target(project, repo, grantee, id)?;
    *grants.get_mut(id).ok_or(not_found)? = role;
    Ok(())
}

pub fn remove_repository_role(
    project: &mut ProjectMetadata,
    repo: &str,
    grantee: Grantee,
    id: &str,
) -> Result<()> {
    let not_found = grantee.not_found(project, id);
    if repo == INTERNAL_REPO {
        return Err(Error::Unsupported(format!(
            "Can't revoke a role for internal repository: {repo}"
        )));
    }
    grantee
        .grants(repo_mut(project, repo)?)
        .remove(id)
        .map(|_| ())
        .ok_or(not_found)
}

// Global token registry

fn live_token_mut<'a>(tokens: &'a mut Tokens, app_id: &str) -> Result<&'a mut Token> {
    tokens
        .app_ids
        .get_mut(app_id)
        .filter(|t| !t.is_deleted())
        .ok_or_else(|| Error::TokenNotFound(app_id.to_string()))
}

pub fn create_token(tokens: &mut Tokens, token: Token) -> Result<()> {
    if tokens.app_ids.contains_key(&token.app_id) {
        return Err(Error::Conflict(format!(
            "token already exists: {}",
            token.app_id
        )));
    }
    if tokens.secrets.contains_key(&token.secret_lookup) {
        return Err(Error::Conflict(format!(
            "token secret collision for {}",
            token.app_id
        )));
    }
    tokens
        .secrets
        .insert(token.secret_lookup.clone(), token.app_id.clone());
    tokens.app_ids.insert(token.app_id.clone(), token);
    Ok(())
}

/// Soft-deletes a token. Its registrations are removed separately, per project.
pub fn destroy_token(tokens: &mut Tokens, app_id: &str, deletion: &UserAndTimestamp) -> Result<()> {
    live_token_mut(tokens, app_id)?.deletion = Some(deletion.clone());
    Ok(())
}

/// Erases a destroyed token for good.
pub fn purge_token(tokens: &mut Tokens, app_id: &str) -> Result<()> {
    let token = tokens
        .app_ids
        .get(app_id)
        .ok_or_else(|| Error::TokenNotFound(app_id.to_string()))?;
    if !token.is_deleted() {
        return Err(Error::Conflict(format!(
            "token must be destroyed before it is purged: {app_id}"
        )));
    }
    let lookup = token.secret_lookup.clone();
    tokens.secrets.remove(&lookup);
    tokens.app_ids.remove(app_id);
    Ok(())
}

pub fn activate_token(
    tokens: &mut Tokens,
    app_id: &str,
    activation: &UserAndTimestamp,
) -> Result<()> {
    let token = live_token_mut(tokens, app_id)?;
    if token.deactivation.is_some() {
        token.deactivation = None;
        token.activation = Some(activation.clone());
    }
    Ok(())
}

pub fn deactivate_token(
    tokens: &mut Tokens,
    app_id: &str,
    deactivation: &UserAndTimestamp,
) -> Result<()> {
    let token = live_token_mut(tokens, app_id)?;
    if token.deactivation.is_none() {
        token.deactivation = Some(deactivation.clone());
    }
    Ok(())
}

pub fn update_token_level(tokens: &mut Tokens, app_id: &str, system_admin: bool) -> Result<()> {
    live_token_mut(tokens, app_id)?.system_admin = system_admin;
    Ok(())
}
