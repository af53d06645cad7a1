mod models;
mod revision;
mod role;

pub use models::*;
pub use revision::Revision;
pub use role::{DEFAULT_PROJECT_ROLES, ProjectRole, ProjectRoles, RepositoryRole};
