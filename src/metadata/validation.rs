//! Name rules for projects, repositories and application ids.
//!
//! Names end up as document keys and as keys of role maps, so they are kept to
//! `[A-Za-z0-9][A-Za-z0-9._-]*`.

use crate::error::{Error, Result};

const MAX_NAME_LEN: usize = 100;

fn validate(kind: &str, name: &str) -> Result<()> {
    let Some(first) = name.chars().next() else {
        return Err(Error::BadRequest(format!("{kind} cannot be empty")));
    };
    if name.len() > MAX_NAME_LEN {
        return Err(Error::BadRequest(format!(
            "{kind} cannot exceed {MAX_NAME_LEN} characters: {name}"
        )));
    }
    if !first.is_ascii_alphanumeric() {
        return Err(Error::BadRequest(format!(
            "{kind} must start with a letter or a digit: {name}"
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(Error::BadRequest(format!(
            "{kind} contains an invalid character '{c}': {name}"
        )));
    }
    Ok(())
}

pub fn validate_project_name(name: &str) -> Result<()> {
    validate("project name", name)
}

pub fn validate_repo_name(name: &str) -> Result<()> {
    validate("repository name", name)
}

pub fn validate_app_id(app_id: &str) -> Result<()> {
    validate("application id", app_id)
}
