//! Credential resolution: turns a declarative descriptor into secret material.

use std::path::{Path, PathBuf};

use crate::application::ports::Secret;
use crate::domain::config::{CredentialDescriptor, CredentialKind};
use crate::domain::error::CredentialError;

/// Resolve `desc` against the process environment and the local home directory.
///
/// # Errors
///
/// Returns a [`CredentialError`] if a key path cannot be expanded or made absolute.
pub fn resolve(desc: &CredentialDescriptor) -> Result<Secret, CredentialError> {
    let home = dirs::home_dir();
    resolve_with(desc, |name| std::env::var(name).ok(), home.as_deref())
}

/// Resolve `desc` with explicit lookups.
///
/// An unset environment variable yields an empty password; the remote end
/// rejects it at authentication time. Key paths have a leading `~` expanded
/// against `local_home` and are made absolute. The key file itself is not
/// read here.
///
/// # Errors
///
/// Returns [`CredentialError::HomeDirUnavailable`] when a `~` path meets an
/// unknown home, or [`CredentialError::InvalidKeyPath`] for an empty or
/// unresolvable path.
pub fn resolve_with(
    desc: &CredentialDescriptor,
    env_lookup: impl Fn(&str) -> Option<String>,
    local_home: Option<&Path>,
) -> Result<Secret, CredentialError> {
    match desc.kind {
        CredentialKind::EnvVar => Ok(Secret::Password(
            env_lookup(&desc.value).unwrap_or_default(),
        )),
        CredentialKind::KeyFile => key_path(&desc.value, local_home).map(Secret::KeyFile),
    }
}

fn key_path(raw: &str, local_home: Option<&Path>) -> Result<PathBuf, CredentialError> {
    if raw.trim().is_empty() {
        return Err(CredentialError::InvalidKeyPath {
            path: raw.to_string(),
            reason: "path is empty".to_string(),
        });
    }
    let expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            let home = local_home.ok_or_else(|| CredentialError::HomeDirUnavailable {
                path: raw.to_string(),
            })?;
            home.join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(raw),
    };
    std::path::absolute(&expanded).map_err(|e| CredentialError::InvalidKeyPath {
        path: raw.to_string(),
        reason: e.to_string(),
    })
}
