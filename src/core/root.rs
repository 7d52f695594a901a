//! Notes directory validation

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use super::error::{VaultError, VaultResult};

/// System directories that can never hold a vault
pub const PROTECTED_DIRS: &[&str] = &[
    "/bin",
    "/boot",
    "/dev",
    "/etc",
    "/lib",
    "/lib64",
    "/proc",
    "/root",
    "/run",
    "/sbin",
    "/sys",
    "/tmp",
    "/usr",
    "/var",
    "/opt",
    "/lost+found",
];

const FORBIDDEN_CHARS: &[char] = &['\\', '*', '?', '"', '<', '>', '|', ';', '&'];

const WRITE_CHECK_FILE: &str = ".mdnotes-write-check";

/// Make a path absolute without touching the filesystem.
///
/// Relative paths hang off the current directory; `.` and `..` are folded
/// lexically.
pub fn absolute(path: &Path) -> VaultResult<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir().map_err(|e| VaultError::io(".", e))?;
        cwd.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Resolve symlinks when the path exists, otherwise fall back to [`absolute`]
fn resolved(path: &Path) -> VaultResult<PathBuf> {
    match fs::canonicalize(path) {
        Ok(canonical) => Ok(canonical),
        Err(_) => absolute(path),
    }
}

/// Outcome of a dry-run root check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootCheck {
    pub path: PathBuf,
    pub exists: bool,
    pub can_read: bool,
    pub can_write: bool,
}

fn can_read(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok()
}

fn can_write(dir: &Path) -> bool {
    let marker = dir.join(WRITE_CHECK_FILE);
    match fs::OpenOptions::new().write(true).create_new(true).open(&marker) {
        Ok(_) => {
            if let Err(e) = fs::remove_file(&marker) {
                tracing::warn!("Failed to remove write check file {}: {}", marker.display(), e);
            }
            true
        }
        Err(_) => false,
    }
}

/// Validates candidate notes directories against a denylist of absolute prefixes
#[derive(Debug, Clone)]
pub struct RootGuard {
    protected: Vec<String>,
}

impl Default for RootGuard {
    fn default() -> Self {
        Self::with_protected(PROTECTED_DIRS.iter().copied())
    }
}

impl RootGuard {
    /// Guard with a custom denylist
    pub fn with_protected<I>(dirs: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            protected: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Reject protected locations and suspicious spellings
    pub fn check_security(&self, path: &Path) -> VaultResult<PathBuf> {
        let abs = resolved(path)?;
        let text = abs.to_string_lossy();

        for dir in &self.protected {
            if text == dir.as_str() || text.starts_with(&format!("{dir}/")) {
                return Err(VaultError::InvalidRoot(format!(
                    "cannot use system directory: {dir}"
                )));
            }
        }
        if text.contains(FORBIDDEN_CHARS) {
            return Err(VaultError::InvalidRoot(
                "path contains invalid characters".to_string(),
            ));
        }
        if text.len() < 2 {
            return Err(VaultError::InvalidRoot("path is too short".to_string()));
        }
        Ok(abs)
    }

    /// Check whether a directory could serve as the notes directory, without changing anything
    pub fn check_root(&self, candidate: &Path) -> VaultResult<RootCheck> {
        let path = self.check_security(candidate)?;

        if !path.exists() {
            // Creatable when the nearest existing ancestor is a writable directory
            let creatable = path
                .ancestors()
                .skip(1)
                .find(|p| p.exists())
                .map(|p| p.is_dir() && can_write(p))
                .unwrap_or(false);
            if !creatable {
                return Err(VaultError::InvalidRoot(
                    "cannot create directory at this location".to_string(),
                ));
            }
            return Ok(RootCheck {
                path,
                exists: false,
                can_read: true,
                can_write: true,
            });
        }

        if !path.is_dir() {
            return Err(VaultError::InvalidRoot(
                "path exists but is not a directory".to_string(),
            ));
        }

        let check = RootCheck {
            can_read: can_read(&path),
            can_write: can_write(&path),
            exists: true,
            path,
        };
        if !(check.can_read && check.can_write) {
            return Err(VaultError::InvalidRoot(
                "directory is not both readable and writable".to_string(),
            ));
        }
        Ok(check)
    }

    /// Validate a notes directory, creating it when missing; returns the canonical path
    pub fn prepare_root(&self, candidate: &Path) -> VaultResult<PathBuf> {
        let path = self.check_security(candidate)?;
        if !path.exists() {
            fs::create_dir_all(&path).map_err(|e| VaultError::io(&path, e))?;
            tracing::info!("Created notes directory {}", path.display());
        }
        if !path.is_dir() {
            return Err(VaultError::InvalidRoot(
                "path exists but is not a directory".to_string(),
            ));
        }
        if !(can_read(&path) && can_write(&path)) {
            return Err(VaultError::InvalidRoot(
                "directory is not both readable and writable".to_string(),
            ));
        }
        fs::canonicalize(&path).map_err(|e| VaultError::io(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Scratch directories usually live under a protected prefix such as /tmp,
    // so filesystem checks run against a guard with an empty denylist.
    fn open_guard() -> RootGuard {
        RootGuard::with_protected(Vec::<String>::new())
    }

    #[test]
    fn test_absolute_folds_dots() {
        assert_eq!(
            absolute(Path::new("/srv/notes/./a/../b")).unwrap(),
            PathBuf::from("/srv/notes/b")
        );
    }

    #[test]
    fn test_protected_dirs_rejected() {
        let guard = RootGuard::default();
        for dir in ["/etc", "/etc/notes", "/usr/share/notes", "/var"] {
            assert!(
                matches!(guard.check_security(Path::new(dir)), Err(VaultError::InvalidRoot(_))),
                "{dir} should be rejected"
            );
        }
        assert!(guard.check_security(Path::new("/etcetera/notes")).is_ok());
    }

    #[test]
    fn test_forbidden_characters_rejected() {
        let guard = RootGuard::default();
        assert!(guard.check_security(Path::new("/srv/notes;rm")).is_err());
        assert!(guard.check_security(Path::new("/srv/no*tes")).is_err());
    }

    #[test]
    fn test_check_root_existing_and_missing() {
        let tmp = TempDir::new().unwrap();
        let guard = open_guard();
        let check = guard.check_root(tmp.path()).unwrap();
        assert!(check.exists && check.can_read && check.can_write);

        let missing = guard.check_root(&tmp.path().join("new/notes")).unwrap();
        assert!(!missing.exists);
        assert!(!tmp.path().join("new").exists());
    }

    #[test]
    fn test_check_root_rejects_files() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            open_guard().check_root(&file),
            Err(VaultError::InvalidRoot(_))
        ));
    }

    #[test]
    fn test_prepare_root_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("vault");
        let root = open_guard().prepare_root(&target).unwrap();
        assert!(root.is_dir());
        assert_eq!(root, fs::canonicalize(&target).unwrap());
        assert!(!root.join(WRITE_CHECK_FILE).exists());
    }
}
