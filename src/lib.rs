//! # repometa
//!
//! Versioned metadata for projects and their repositories: membership, token
//! registration, per-repository roles, soft-delete/restore/purge lifecycle and
//! write quotas. Usable both as a library and through the `repometa` binary.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! repometa = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use repometa::metadata::MetadataService;
//! use repometa::store::SqliteStore;
//! use repometa::types::{Identity, User};
//!
//! let store = Arc::new(SqliteStore::new("./data/repometa.db")?);
//! store.initialize()?;
//!
//! let service = MetadataService::new(store.clone()).with_catalog(store);
//! let owner = User::new("alice@example.com")?;
//! service.create_project(&owner, "foo").await?;
//! service.add_repo_with_defaults(&owner, "foo", "apple").await?;
//! let role = service
//!     .find_repository_role("foo", "apple", &Identity::from(&owner))
//!     .await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `repometa` binary. Disable with `default-features = false`.

pub mod auth;
pub mod config;
pub mod error;
pub mod metadata;
pub mod store;
pub mod types;
