use crate::error::{Error, Result};
use crate::types::{Identity, ProjectMetadata, ProjectRole, RepositoryRole};

/// Resolves the effective role of `identity` on `repo`.
///
/// Precedence, highest first:
/// 1. system administrators and project owners get ADMIN;
/// 2. an explicit per-repository grant;
/// 3. the repository's member default, for members and registered tokens;
/// 4. the repository's guest default, for everybody else.
pub fn find_repository_role(
    project: &ProjectMetadata,
    repo: &str,
    identity: &Identity,
) -> Result<Option<RepositoryRole>> {
    let metadata = project
        .repo(repo)
        .ok_or_else(|| Error::RepositoryNotFound {
            project: project.name.clone(),
            repo: repo.to_string(),
        })?;
    let roles = &metadata.roles;

    let (project_role, grant) = match identity {
        Identity::User(user) => {
            if user.system_admin {
                return Ok(Some(RepositoryRole::Admin));
            }
            (
                project.member(user.id()).map(|m| m.role),
                roles.users.get(user.id()),
            )
        }
        Identity::Token(app_id) => (
            project.token(app_id).map(|t| t.role),
            roles.tokens.get(app_id.as_str()),
        ),
        Identity::Anonymous => (None, None),
    };

    Ok(match project_role {
        Some(ProjectRole::Owner) => Some(RepositoryRole::Admin),
        Some(ProjectRole::Member) => grant.copied().or(roles.projects.member),
        None => roles.projects.guest,
    })
}
