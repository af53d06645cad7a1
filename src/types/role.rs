use std::fmt;

use serde::{Deserialize, Serialize};

/// Access level on a single repository.
///
/// Variants are declared in ascending order so that `Ord` follows the
/// `READ < WRITE < ADMIN` hierarchy. "No access" is represented as `None`
/// wherever a role is optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryRole {
    Read,
    Write,
    Admin,
}

impl RepositoryRole {
    /// Returns true if this role includes everything `required` grants.
    #[must_use]
    pub fn has(self, required: RepositoryRole) -> bool {
        self >= required
    }

    pub fn parse(s: &str) -> Option<RepositoryRole> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for RepositoryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standing of a member or token within a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectRole {
    Owner,
    Member,
}

impl ProjectRole {
    pub fn parse(s: &str) -> Option<ProjectRole> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Some(Self::Owner),
            "member" => Some(Self::Member),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "OWNER",
            Self::Member => "MEMBER",
        }
    }
}

impl fmt::Display for ProjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default repository roles granted by project standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectRoles {
    /// Role granted to every member (and registered token) of the project.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub member: Option<RepositoryRole>,
    /// Role granted to everyone else, including anonymous callers.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub guest: Option<RepositoryRole>,
}

/// Roles applied to repositories created without an explicit configuration.
pub const DEFAULT_PROJECT_ROLES: ProjectRoles = ProjectRoles {
    member: Some(RepositoryRole::Write),
    guest: None,
};

impl ProjectRoles {
    #[must_use]
    pub const fn of(member: Option<RepositoryRole>, guest: Option<RepositoryRole>) -> Self {
        Self { member, guest }
    }

    /// No access by default for anybody.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            member: None,
            guest: None,
        }
    }
}
