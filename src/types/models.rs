use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ProjectRole, ProjectRoles, RepositoryRole};
use crate::error::{Error, Result};

const DEFAULT_EMAIL_DOMAIN: &str = "localhost.localdomain";

/// Who did something, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAndTimestamp {
    pub user: String,
    pub timestamp: DateTime<Utc>,
}

impl UserAndTimestamp {
    #[must_use]
    pub fn new(user: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            user: user.into(),
            timestamp,
        }
    }

    #[must_use]
    pub fn now(user: &User) -> Self {
        Self::new(user.id(), Utc::now())
    }
}

/// An authenticated human. The id of a user is its email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub system_admin: bool,
}

impl User {
    pub fn new(login: &str) -> Result<Self> {
        Self::with_level(login, false)
    }

    pub fn system_admin(login: &str) -> Result<Self> {
        Self::with_level(login, true)
    }

    fn with_level(login: &str, system_admin: bool) -> Result<Self> {
        let login = login.trim();
        if login.is_empty() {
            return Err(Error::BadRequest("login cannot be empty".to_string()));
        }
        if login.contains(char::is_whitespace) {
            return Err(Error::BadRequest(format!(
                "login cannot contain whitespace: {login}"
            )));
        }

        let email = if login.contains('@') {
            login.to_string()
        } else {
            format!("{login}@{DEFAULT_EMAIL_DOMAIN}")
        };
        let name = match email.split_once('@') {
            Some((local, _)) if !local.is_empty() => local.to_string(),
            _ => {
                return Err(Error::BadRequest(format!("invalid login: {login}")));
            }
        };

        Ok(Self {
            login: login.to_string(),
            name,
            email,
            system_admin,
        })
    }

    /// The account used for changes made by the system itself.
    #[must_use]
    pub fn system() -> Self {
        Self {
            login: format!("system@{DEFAULT_EMAIL_DOMAIN}"),
            name: "system".to_string(),
            email: format!("system@{DEFAULT_EMAIL_DOMAIN}"),
            system_admin: true,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.email
    }
}

/// The subject a repository role is resolved for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User(User),
    Token(String),
    Anonymous,
}

impl From<User> for Identity {
    fn from(user: User) -> Self {
        Identity::User(user)
    }
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Identity::User(user.clone())
    }
}

/// Write rate limit for a repository: `request_quota` permits per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub request_quota: u32,
    pub time_window_seconds: u32,
}

impl QuotaConfig {
    pub fn new(request_quota: u32, time_window_seconds: u32) -> Result<Self> {
        let quota = Self {
            request_quota,
            time_window_seconds,
        };
        quota.validate()?;
        Ok(quota)
    }

    /// Both values must be positive.
    pub fn validate(&self) -> Result<()> {
        if self.request_quota == 0 {
            return Err(Error::BadRequest(
                "request quota must be greater than zero".to_string(),
            ));
        }
        if self.time_window_seconds == 0 {
            return Err(Error::BadRequest(
                "time window must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn permits_per_second(&self) -> f64 {
        f64::from(self.request_quota) / f64::from(self.time_window_seconds)
    }
}

/// Role configuration of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Roles {
    pub projects: ProjectRoles,
    #[serde(default)]
    pub users: BTreeMap<String, RepositoryRole>,
    #[serde(default)]
    pub tokens: BTreeMap<String, RepositoryRole>,
}

impl Roles {
    #[must_use]
    pub fn new(projects: ProjectRoles) -> Self {
        Self {
            projects,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub name: String,
    pub roles: Roles,
    pub creation: UserAndTimestamp,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub removal: Option<UserAndTimestamp>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub write_quota: Option<QuotaConfig>,
}

impl RepositoryMetadata {
    #[must_use]
    pub fn new(name: impl Into<String>, creation: UserAndTimestamp, roles: ProjectRoles) -> Self {
        Self {
            name: name.into(),
            roles: Roles::new(roles),
            creation,
            removal: None,
            write_quota: None,
        }
    }

    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removal.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub role: ProjectRole,
    pub creation: UserAndTimestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRegistration {
    pub app_id: String,
    pub role: ProjectRole,
    pub creation: UserAndTimestamp,
}

/// Metadata document of a single project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    #[serde(default)]
    pub repos: BTreeMap<String, RepositoryMetadata>,
    #[serde(default)]
    pub members: BTreeMap<String, Member>,
    #[serde(default)]
    pub tokens: BTreeMap<String, TokenRegistration>,
    pub creation: UserAndTimestamp,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub removal: Option<UserAndTimestamp>,
}

impl ProjectMetadata {
    #[must_use]
    pub fn repo(&self, name: &str) -> Option<&RepositoryMetadata> {
        self.repos.get(name)
    }

    #[must_use]
    pub fn member(&self, id: &str) -> Option<&Member> {
        self.members.get(id)
    }

    #[must_use]
    pub fn token(&self, app_id: &str) -> Option<&TokenRegistration> {
        self.tokens.get(app_id)
    }

    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removal.is_some()
    }
}

/// Global record of an application token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub app_id: String,
    pub secret_lookup: String,
    pub secret_hash: String,
    #[serde(default)]
    pub system_admin: bool,
    pub creation: UserAndTimestamp,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub activation: Option<UserAndTimestamp>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deactivation: Option<UserAndTimestamp>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deletion: Option<UserAndTimestamp>,
}

impl Token {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.deactivation.is_none() && self.deletion.is_none()
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deletion.is_some()
    }
}

/// The global token registry document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tokens {
    #[serde(default)]
    pub app_ids: BTreeMap<String, Token>,
    /// Secret lookup key to app id.
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
}

impl Tokens {
    #[must_use]
    pub fn get(&self, app_id: &str) -> Option<&Token> {
        self.app_ids.get(app_id)
    }

    /// Returns the token unless it is absent or destroyed.
    #[must_use]
    pub fn get_live(&self, app_id: &str) -> Option<&Token> {
        self.app_ids.get(app_id).filter(|t| !t.is_deleted())
    }

    #[must_use]
    pub fn find_by_lookup(&self, lookup: &str) -> Option<&Token> {
        self.secrets
            .get(lookup)
            .and_then(|app_id| self.app_ids.get(app_id))
    }
}
