//! Resolution of untrusted, slash-separated paths against the notes directory
//!
//! Every path that arrives from a request goes through [`PathResolver`] before
//! anything touches the disk. Containment is decided on the canonical string
//! form: a candidate is inside the root only if it equals the root or starts
//! with the root followed by a separator, so `/notes-archive` never passes as
//! part of `/notes`.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

use super::config::ExclusionPolicy;
use super::error::{VaultError, VaultResult};

/// Reject paths that try to choose their own base
fn reject_absolute(user_path: &str) -> VaultResult<()> {
    if user_path.contains('\0') {
        return Err(VaultError::InvalidName(
            "path contains a NUL byte".to_string(),
        ));
    }
    let path = Path::new(user_path);
    let drive_letter = {
        let bytes = user_path.as_bytes();
        bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
    };
    if path.is_absolute()
        || path.has_root()
        || user_path.starts_with(['/', '\\'])
        || drive_letter
    {
        return Err(VaultError::PathEscape(user_path.to_string()));
    }
    Ok(())
}

/// Whether `candidate` lies inside `root`; both must already be canonical
pub fn is_within(root: &Path, candidate: &Path) -> bool {
    let root = root.to_string_lossy();
    let candidate = candidate.to_string_lossy();
    if candidate == root {
        return true;
    }
    let prefix = if root.ends_with(MAIN_SEPARATOR) {
        root.to_string()
    } else {
        format!("{root}{MAIN_SEPARATOR}")
    };
    candidate.starts_with(&prefix)
}

/// Reject `..` segments that climb above the base, before touching the disk
fn reject_lexical_escape(user_path: &str) -> VaultResult<()> {
    let mut depth = 0usize;
    for component in Path::new(user_path).components() {
        match component {
            Component::ParentDir => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| VaultError::PathEscape(user_path.to_string()))?;
            }
            Component::Normal(_) => depth += 1,
            _ => {}
        }
    }
    Ok(())
}

fn canonicalize(path: &Path, user_path: &str) -> VaultResult<PathBuf> {
    fs::canonicalize(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => VaultError::NotFound(user_path.to_string()),
        _ => VaultError::io(path, e),
    })
}

/// Canonicalize `user_path` under a canonical `root` and check containment.
///
/// A missing target is `PathEscape` rather than `NotFound` when its deepest
/// existing ancestor already lies outside the root.
fn canonicalize_within(root: &Path, user_path: &str) -> VaultResult<PathBuf> {
    reject_absolute(user_path)?;
    reject_lexical_escape(user_path)?;
    let candidate = root.join(user_path);
    match fs::canonicalize(&candidate) {
        Ok(resolved) if is_within(root, &resolved) => Ok(resolved),
        Ok(_) => Err(VaultError::PathEscape(user_path.to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let escapes = candidate
                .ancestors()
                .skip(1)
                .find(|p| fs::symlink_metadata(p).is_ok())
                .and_then(|p| fs::canonicalize(p).ok())
                .map(|anchor| !is_within(root, &anchor))
                .unwrap_or(false);
            if escapes {
                Err(VaultError::PathEscape(user_path.to_string()))
            } else {
                Err(VaultError::NotFound(user_path.to_string()))
            }
        }
        Err(e) => Err(VaultError::io(&candidate, e)),
    }
}

/// Join `user_path` onto `root` and canonicalize, rejecting anything outside `root`.
///
/// The empty string resolves to the root itself. The target must exist.
pub fn resolve(root: &Path, user_path: &str) -> VaultResult<PathBuf> {
    let root = canonicalize(root, "")?;
    canonicalize_within(&root, user_path)
}

/// Render a root-relative path with forward slashes
pub fn to_slash(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Path resolver bound to one canonical notes directory and its exclusions
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    exclusions: ExclusionPolicy,
}

impl PathResolver {
    /// Create a resolver; the root must exist
    pub fn new(root: &Path, exclusions: ExclusionPolicy) -> VaultResult<Self> {
        let root = canonicalize(root, &root.to_string_lossy())?;
        Ok(Self { root, exclusions })
    }

    /// Canonical notes directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exclusions(&self) -> &ExclusionPolicy {
        &self.exclusions
    }

    /// Escape check only; the target must exist
    pub fn resolve(&self, user_path: &str) -> VaultResult<PathBuf> {
        canonicalize_within(&self.root, user_path)
    }

    /// Resolve an existing path for reading; skipped directories are refused
    pub fn resolve_read(&self, user_path: &str) -> VaultResult<PathBuf> {
        let resolved = self.resolve(user_path)?;
        self.check_skipped(&resolved)?;
        Ok(resolved)
    }

    /// Resolve a path that is about to be created or written.
    ///
    /// The deepest existing ancestor is canonicalized and must be inside the
    /// root; the remainder may only contain plain names.
    pub fn resolve_write(&self, user_path: &str) -> VaultResult<PathBuf> {
        reject_absolute(user_path)?;
        reject_lexical_escape(user_path)?;
        let candidate = self.root.join(user_path);

        // symlink_metadata so a dangling link counts as existing and fails canonicalization
        let existing = candidate
            .ancestors()
            .find(|p| fs::symlink_metadata(p).is_ok())
            .ok_or_else(|| VaultError::NotFound(user_path.to_string()))?;
        let remainder = candidate
            .strip_prefix(existing)
            .map_err(|_| VaultError::PathEscape(user_path.to_string()))?;
        if remainder
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(VaultError::PathEscape(user_path.to_string()));
        }

        let anchor = canonicalize(existing, user_path)?;
        if !is_within(&self.root, &anchor) {
            return Err(VaultError::PathEscape(user_path.to_string()));
        }

        let resolved = anchor.join(remainder);
        self.check_skipped(&resolved)?;
        Ok(resolved)
    }

    /// Fail when any component below the root is a skipped directory name
    pub fn check_skipped(&self, resolved: &Path) -> VaultResult<()> {
        let relative = resolved.strip_prefix(&self.root).unwrap_or(resolved);
        let names = relative.components().filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        });
        match self.exclusions.skipped_component(names) {
            Some(name) => Err(VaultError::SkippedDirectory(name.to_string())),
            None => Ok(()),
        }
    }

    /// Root-relative, forward-slash form of a resolved path
    pub fn relative(&self, resolved: &Path) -> String {
        to_slash(resolved.strip_prefix(&self.root).unwrap_or(resolved))
    }
}
