//! Attachment placement policy
//!
//! [`StoragePolicy`] is the single place that knows what each [`StorageMode`]
//! means. Uploads ask it where to write ([`StoragePolicy::place`]) and what to
//! embed ([`StoragePolicy::reference_for`]); serving and rendering ask it the
//! inverse questions ([`StoragePolicy::reference_from_markup`] and
//! [`StoragePolicy::resolve_for_serving`]). Keeping both directions here keeps
//! them in lockstep.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use super::config::StorageMode;
use super::error::{VaultError, VaultResult};
use super::paths::{is_within, PathResolver};

/// URL prefix for files addressed relative to the notes directory
pub const ATTACHMENT_ROUTE: &str = "/attachments";
/// URL prefix for files in the fixed storage folder
pub const STORED_ROUTE: &str = "/stored";

/// Where an attachment for a given document goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    /// Absolute directory the file is written to
    pub dir: PathBuf,
    /// Root-relative directory that embeds are relative to
    pub base: String,
    /// Subfolder prefix embedded in the markup, subfolder mode only
    pub subpath: Option<String>,
}

/// How a stored attachment is looked up when served
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "route", content = "path", rename_all = "snake_case")]
pub enum ServableReference {
    /// Path relative to the notes directory
    Attached(String),
    /// Bare file name inside the fixed storage folder
    Stored(String),
}

impl ServableReference {
    /// URL with every path segment percent-encoded
    pub fn url(&self) -> String {
        match self {
            ServableReference::Attached(path) => {
                let encoded: Vec<String> = path
                    .split('/')
                    .map(|segment| urlencoding::encode(segment).into_owned())
                    .collect();
                format!("{ATTACHMENT_ROUTE}/{}", encoded.join("/"))
            }
            ServableReference::Stored(name) => {
                format!("{STORED_ROUTE}/{}", urlencoding::encode(name))
            }
        }
    }
}

/// Join slash paths, ignoring empty parts
fn join_slash<'s>(parts: impl IntoIterator<Item = &'s str>) -> String {
    parts
        .into_iter()
        .flat_map(|part| part.split('/'))
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Directory part of a document path; a path without `.md` is taken as a folder
pub fn note_dir(note_path: &str) -> String {
    let note = note_path.trim_matches('/');
    if note.ends_with(".md") {
        note.rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default()
    } else {
        note.to_string()
    }
}

/// Strip an `![[...]]` wrapper and normalize separators
pub fn clean_reference(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("![[")
        .and_then(|rest| rest.strip_suffix("]]"))
        .unwrap_or(trimmed);
    let inner = inner.split('|').next().unwrap_or(inner);
    join_slash([inner.replace('\\', "/").as_str()])
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// The storage mode bound to one vault
#[derive(Debug, Clone, Copy)]
pub struct StoragePolicy<'a> {
    mode: &'a StorageMode,
    resolver: &'a PathResolver,
}

impl<'a> StoragePolicy<'a> {
    pub fn new(mode: &'a StorageMode, resolver: &'a PathResolver) -> Self {
        Self { mode, resolver }
    }

    pub fn mode(&self) -> &StorageMode {
        self.mode
    }

    /// Absolute fixed storage folder; relative settings hang off the notes directory
    fn fixed_dir(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.resolver.root().join(path)
        }
    }

    fn usable_note<'n>(note_path: Option<&'n str>) -> Option<&'n str> {
        note_path
            .map(|note| note.trim_matches('/'))
            .filter(|note| !note.is_empty())
    }

    /// Compute where attachments for `note_path` are stored.
    ///
    /// Co-located and subfolder modes fall back to the notes directory when no
    /// document is given. A document under a skipped directory is refused in
    /// every mode.
    pub fn place(&self, note_path: Option<&str>) -> VaultResult<Placement> {
        let note = Self::usable_note(note_path);
        if let Some(note) = note {
            if let Some(name) = self.resolver.exclusions().skipped_component(note.split('/')) {
                return Err(VaultError::SkippedDirectory(name.to_string()));
            }
        }

        let root_placement = || Placement {
            dir: self.resolver.root().to_path_buf(),
            base: String::new(),
            subpath: None,
        };

        let placement = match (self.mode, note) {
            (StorageMode::Root, _) => root_placement(),
            (StorageMode::FixedFolder { path }, _) => Placement {
                dir: self.fixed_dir(path),
                base: String::new(),
                subpath: None,
            },
            (StorageMode::CoLocated, Some(note)) => {
                let base = note_dir(note);
                Placement {
                    dir: self.resolver.resolve_write(&base)?,
                    base,
                    subpath: None,
                }
            }
            (StorageMode::Subfolder { name }, Some(note)) => {
                let base = note_dir(note);
                Placement {
                    dir: self.resolver.resolve_write(&join_slash([base.as_str(), name.as_str()]))?,
                    base,
                    subpath: Some(name.clone()),
                }
            }
            (StorageMode::CoLocated | StorageMode::Subfolder { .. }, None) => root_placement(),
        };
        Ok(placement)
    }

    /// Markup fragment and servable reference for a file just stored at `placement`
    pub fn reference_for(&self, placement: &Placement, filename: &str) -> (String, ServableReference) {
        let embed = join_slash([placement.subpath.as_deref().unwrap_or(""), filename]);
        let markup = format!("![[{embed}]]");
        let reference = match self.mode {
            StorageMode::FixedFolder { .. } => ServableReference::Stored(filename.to_string()),
            _ => ServableReference::Attached(join_slash([placement.base.as_str(), embed.as_str()])),
        };
        (markup, reference)
    }

    /// Map an image reference found in a document back to how it is served
    pub fn reference_from_markup(&self, note_path: Option<&str>, raw: &str) -> ServableReference {
        let clean = clean_reference(raw);
        match (self.mode, Self::usable_note(note_path)) {
            (StorageMode::FixedFolder { .. }, _) => {
                ServableReference::Stored(basename(&clean).to_string())
            }
            (StorageMode::CoLocated | StorageMode::Subfolder { .. }, Some(note)) => {
                ServableReference::Attached(join_slash([note_dir(note).as_str(), clean.as_str()]))
            }
            _ => ServableReference::Attached(clean),
        }
    }

    /// Absolute location of the file behind a servable reference
    pub fn resolve_for_serving(&self, reference: &ServableReference) -> VaultResult<PathBuf> {
        match reference {
            ServableReference::Attached(path) => self.resolver.resolve_read(path),
            ServableReference::Stored(name) => {
                let StorageMode::FixedFolder { path } = self.mode else {
                    return Err(VaultError::NotFound(name.clone()));
                };
                let mut components = Path::new(name).components();
                match (components.next(), components.next()) {
                    (Some(Component::Normal(_)), None) => {}
                    _ => return Err(VaultError::PathEscape(name.clone())),
                }

                let dir = self.fixed_dir(path);
                let dir = fs::canonicalize(&dir).map_err(|e| VaultError::io(&dir, e))?;
                let file = dir.join(name);
                let file = fs::canonicalize(&file)
                    .map_err(|_| VaultError::NotFound(name.clone()))?;
                if !is_within(&dir, &file) {
                    return Err(VaultError::PathEscape(name.clone()));
                }
                Ok(file)
            }
        }
    }
}
