//! Secret resolution for OCR service credentials.
//!
//! An API key can be supplied three ways, checked in this order:
//!
//! 1. **Direct value** in the config (`api_key`), for local testing
//! 2. **File reference** (`api_key_file`), for mounted secrets
//! 3. **Env var reference** (`api_key_env_var`), for container deployments

use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from the first non-empty source. Values read from files
/// and environment variables are trimmed.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    if let Some(path) = file_path {
        if !path.is_empty() {
            let expanded = expand_home(path);
            return match fs::read_to_string(&expanded) {
                Ok(content) => Ok(SecretString::from(content.trim().to_string())),
                Err(e) => Err(SecretError::FileReadError {
                    path: expanded,
                    source: e,
                }),
            };
        }
    }

    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            return match std::env::var(var_name) {
                Ok(value) => Ok(SecretString::from(value.trim())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: var_name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: var_name.to_string(),
                }),
            };
        }
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but a missing source is `Ok(None)`.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Checks if at least one secret source is configured (non-empty).
pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    direct.is_some_and(|s| !s.is_empty())
        || file_path.is_some_and(|s| !s.is_empty())
        || env_var.is_some_and(|s| !s.is_empty())
}

/// Expands a leading `~` to the user's home directory. `~user/path` is not
/// supported.
pub(crate) fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
