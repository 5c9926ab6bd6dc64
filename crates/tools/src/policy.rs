//! Filesystem policy — path validation for the file tools.
//!
//! File tools may only touch paths inside the allowed roots (when any are
//! configured) and never inside forbidden prefixes (~/.ssh, /etc, ...).

use std::path::{Path, PathBuf};

/// The path policy shared by the file tools.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    /// Allowed root directories. Empty = allow all.
    pub allowed_roots: Vec<String>,
    /// Forbidden path prefixes.
    pub forbidden_paths: Vec<String>,
}

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is outside allowed roots")]
    OutsideAllowedRoots { path: String },

    #[error("Path '{path}' matches forbidden prefix '{prefix}'")]
    ForbiddenPath { path: String, prefix: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Failed to resolve path '{path}': {reason}")]
    ResolveFailed { path: String, reason: String },
}

impl ToolPolicy {
    /// Validate that a path is safe to access under this policy.
    ///
    /// Rejects raw `..` traversal, canonicalizes the path (or its parent for
    /// not-yet-existing files), then checks forbidden prefixes and allowed
    /// roots. Returns the resolved path on success.
    pub fn validate(&self, path: &str) -> Result<PathBuf, PathValidationError> {
        let input = Path::new(path);

        let normalized = path.replace('\\', "/");
        if normalized.contains("../") || normalized.ends_with("/..") || normalized == ".." {
            return Err(PathValidationError::PathTraversal { path: path.into() });
        }

        // Resolve symlinks and relative components. For paths that don't
        // exist yet (writes), resolve the parent instead.
        let resolved = if input.exists() {
            input
                .canonicalize()
                .map_err(|e| PathValidationError::ResolveFailed {
                    path: path.into(),
                    reason: e.to_string(),
                })?
        } else if let Some(parent) = input.parent()
            && parent.exists()
        {
            let parent = parent
                .canonicalize()
                .map_err(|e| PathValidationError::ResolveFailed {
                    path: path.into(),
                    reason: format!("parent dir: {e}"),
                })?;
            parent.join(input.file_name().unwrap_or_default())
        } else {
            input.to_path_buf()
        };

        let resolved_str = resolved.to_string_lossy().replace('\\', "/");

        for forbidden in &self.forbidden_paths {
            let prefix = expand_tilde(forbidden).replace('\\', "/");
            if resolved_str.starts_with(&prefix) {
                return Err(PathValidationError::ForbiddenPath {
                    path: path.into(),
                    prefix: forbidden.clone(),
                });
            }
        }

        if !self.allowed_roots.is_empty() {
            let allowed = self.allowed_roots.iter().any(|root| {
                let root = expand_tilde(root).replace('\\', "/");
                resolved_str.starts_with(&root)
            });
            if !allowed {
                return Err(PathValidationError::OutsideAllowedRoots { path: path.into() });
            }
        }

        Ok(resolved)
    }
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Ok(home) = std::env::var("HOME")
    {
        return path.replacen('~', &home, 1);
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_policy_allows_tmp() {
        let policy = ToolPolicy::default();
        assert!(policy.validate("/tmp").is_ok());
    }

    #[test]
    fn traversal_rejected() {
        let policy = ToolPolicy::default();
        let err = policy.validate("../../../etc/passwd").unwrap_err();
        assert!(matches!(err, PathValidationError::PathTraversal { .. }));
    }

    #[test]
    fn forbidden_prefix_rejected() {
        let policy = ToolPolicy {
            allowed_roots: vec![],
            forbidden_paths: vec!["/etc".into()],
        };
        let err = policy.validate("/etc/hosts").unwrap_err();
        assert!(matches!(err, PathValidationError::ForbiddenPath { .. }));
    }

    #[test]
    fn outside_allowed_roots_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let policy = ToolPolicy {
            allowed_roots: vec![dir.path().to_string_lossy().into_owned()],
            forbidden_paths: vec![],
        };
        assert!(policy.validate("/tmp").is_err());
        assert!(
            policy
                .validate(&dir.path().to_string_lossy())
                .is_ok()
        );
    }

    #[test]
    fn nonexistent_file_in_existing_dir_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("new_file.txt");
        let policy = ToolPolicy::default();
        let resolved = policy.validate(&target.to_string_lossy()).unwrap();
        assert!(resolved.ends_with("new_file.txt"));
    }
}
