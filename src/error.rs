use thiserror::Error;

use crate::types::Revision;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("project already exists: {0}")]
    ProjectExists(String),

    #[error("repository already exists: {project}/{repo}")]
    RepositoryExists { project: String, repo: String },

    #[error("document already exists: {0}")]
    DocumentExists(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("repository not found: {project}/{repo}")]
    RepositoryNotFound { project: String, repo: String },

    #[error("member not found: {member} (project: {project})")]
    MemberNotFound { project: String, member: String },

    #[error("token not found: {0}")]
    TokenNotFound(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("change conflict on {key}: expected base {base}, head is {head}")]
    ChangeConflict {
        key: String,
        base: Revision,
        head: Revision,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    Unsupported(String),
}

impl Error {
    /// Returns true for every "entity does not exist" variant.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ProjectNotFound(_)
                | Error::RepositoryNotFound { .. }
                | Error::MemberNotFound { .. }
                | Error::TokenNotFound(_)
                | Error::DocumentNotFound(_)
        )
    }

    /// Returns true for store races and non-idempotent re-operations alike.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::ChangeConflict { .. } | Error::Conflict(_))
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::ProjectExists(_) | Error::RepositoryExists { .. } | Error::DocumentExists(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
