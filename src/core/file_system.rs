//! Vault tree, folder listings and folder pickers

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::config::{AllowedTypes, ExclusionPolicy, FileType};
use super::error::{VaultError, VaultResult};
use super::paths::{to_slash, PathResolver};

/// Document extension, without the dot
pub const DOCUMENT_EXTENSION: &str = "md";

/// Guard against symlink cycles
const MAX_DEPTH: usize = 32;

/// Whether a file name is a document
pub fn is_document_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| ext == DOCUMENT_EXTENSION)
        .unwrap_or(false)
}

/// Strip the document extension from a file name
pub fn display_name(name: &str) -> String {
    name.strip_suffix(".md").unwrap_or(name).to_string()
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Kind of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Directory,
    Document,
    Other,
}

/// Represents a directory or document in the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileNode {
    /// Raw file name
    pub name: String,
    /// Root-relative path with forward slashes
    pub relative_path: String,
    /// 0 for the root's direct children
    pub depth: usize,
    pub kind: NodeKind,
    /// File name without `.md`, documents only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileNode>,
}

impl FileNode {
    fn directory(name: String, relative_path: String, depth: usize) -> Self {
        Self {
            name,
            relative_path,
            depth,
            kind: NodeKind::Directory,
            display_name: None,
            children: Vec::new(),
        }
    }

    fn document(name: String, relative_path: String, depth: usize) -> Self {
        Self {
            display_name: Some(display_name(&name)),
            name,
            relative_path,
            depth,
            kind: NodeKind::Document,
            children: Vec::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn is_markdown(&self) -> bool {
        self.kind == NodeKind::Document
    }

    /// Sort children: directories first, then files, alphabetically ignoring case
    pub fn sort_children(&mut self) {
        self.children.sort_by(|a, b| match (a.is_dir(), b.is_dir()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });
        for child in &mut self.children {
            child.sort_children();
        }
    }

    /// Find a node by its root-relative path
    pub fn find(&self, relative_path: &str) -> Option<&FileNode> {
        if self.relative_path == relative_path {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|child| child.find(relative_path))
    }

    /// Number of documents in this subtree
    pub fn document_count(&self) -> usize {
        let own = usize::from(self.is_markdown());
        own + self
            .children
            .iter()
            .map(FileNode::document_count)
            .sum::<usize>()
    }
}

/// A directory that could not be listed while building the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeDiagnostic {
    pub relative_path: String,
    pub message: String,
}

/// Navigation tree of a vault
#[derive(Debug, Clone, Serialize)]
pub struct FileTree {
    /// Container node for the notes directory itself
    pub root: FileNode,
    #[serde(skip)]
    pub root_path: PathBuf,
    /// Partial failures; the affected subtrees are empty
    pub diagnostics: Vec<TreeDiagnostic>,
}

/// Builds the sidebar tree, applying directory exclusions
#[derive(Debug, Clone, Copy)]
pub struct TreeBuilder<'a> {
    exclusions: &'a ExclusionPolicy,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(exclusions: &'a ExclusionPolicy) -> Self {
        Self { exclusions }
    }

    /// Scan `root` fresh; listing failures become diagnostics instead of errors
    pub fn build(&self, root: &Path) -> FileTree {
        let name = root
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut node = FileNode::directory(name, String::new(), 0);
        let mut diagnostics = Vec::new();

        node.children = self.scan(root, root, 0, &mut diagnostics);
        node.sort_children();

        FileTree {
            root: node,
            root_path: root.to_path_buf(),
            diagnostics,
        }
    }

    fn scan(
        &self,
        root: &Path,
        dir: &Path,
        depth: usize,
        diagnostics: &mut Vec<TreeDiagnostic>,
    ) -> Vec<FileNode> {
        let relative = to_slash(dir.strip_prefix(root).unwrap_or(dir));
        let mut report = |message: String| {
            tracing::warn!("Error reading directory {}: {}", dir.display(), message);
            diagnostics.push(TreeDiagnostic {
                relative_path: relative.clone(),
                message,
            });
        };

        if depth >= MAX_DEPTH {
            report(format!("maximum depth of {MAX_DEPTH} reached"));
            return Vec::new();
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                report(e.to_string());
                return Vec::new();
            }
        };

        let mut children = Vec::new();
        let mut subdirs = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    report(e.to_string());
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if is_hidden(&name) {
                continue;
            }

            let entry_path = entry.path();
            let relative_path = to_slash(entry_path.strip_prefix(root).unwrap_or(&entry_path));
            // file_type() does not follow links, so symlinked directories are never descended
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                if self.exclusions.hides(&name) {
                    continue;
                }
                subdirs.push((FileNode::directory(name, relative_path, depth), entry_path));
            } else if is_document_name(&name) {
                children.push(FileNode::document(name, relative_path, depth));
            }
        }

        for (mut node, path) in subdirs {
            node.children = self.scan(root, &path, depth + 1, diagnostics);
            children.push(node);
        }
        children
    }
}

/// Kind of an entry in a folder listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Directory,
    Document,
    Image,
    Text,
}

/// One immediate entry of a folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderEntry {
    pub name: String,
    pub relative_path: String,
    pub kind: EntryKind,
    pub display_name: String,
}

/// List the immediate contents of a folder for display.
///
/// Directories, documents, and files whose extension is in the allowed image
/// or text lists are shown. Images are omitted when `hide_images` is set.
/// Order: directories, then non-image files, then images, by lowercase name.
pub fn list_folder(
    resolver: &PathResolver,
    allowed: &AllowedTypes,
    hide_images: bool,
    folder_path: &str,
) -> VaultResult<Vec<FolderEntry>> {
    let folder = resolver.resolve_read(folder_path)?;
    if !folder.is_dir() {
        return Err(VaultError::NotFound(folder_path.to_string()));
    }

    let entries = fs::read_dir(&folder).map_err(|e| VaultError::io(&folder, e))?;
    let mut listing = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Error reading entry in {}: {}", folder.display(), e);
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if is_hidden(&name) {
            continue;
        }
        let path = entry.path();
        let relative_path = resolver.relative(&path);

        let kind = if path.is_dir() {
            if resolver.exclusions().is_skipped(&name) {
                continue;
            }
            EntryKind::Directory
        } else if is_document_name(&name) {
            EntryKind::Document
        } else {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default();
            match allowed.file_type(&ext) {
                Some(FileType::Image) if hide_images => continue,
                Some(FileType::Image) => EntryKind::Image,
                Some(FileType::Text) => EntryKind::Text,
                None => continue,
            }
        };

        let display_name = match kind {
            EntryKind::Document => display_name(&name),
            _ => name.clone(),
        };
        listing.push(FolderEntry {
            name,
            relative_path,
            kind,
            display_name,
        });
    }

    listing.sort_by_key(|entry| {
        (
            entry.kind != EntryKind::Directory,
            entry.kind == EntryKind::Image,
            entry.name.to_lowercase(),
        )
    });
    Ok(listing)
}

/// Content of a non-document file opened for viewing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "encoding", content = "data", rename_all = "snake_case")]
pub enum FileBody {
    Text(String),
    Bytes(Vec<u8>),
}

/// A file opened from a folder listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenedFile {
    pub name: String,
    pub relative_path: String,
    pub file_type: FileType,
    pub body: FileBody,
}

/// Open a file shown in a folder listing.
///
/// Only extensions in the allowed image or text lists can be opened; text
/// files must be valid UTF-8.
pub fn read_file(
    resolver: &PathResolver,
    allowed: &AllowedTypes,
    file_path: &str,
) -> VaultResult<OpenedFile> {
    let path = resolver.resolve_read(file_path)?;
    if !path.is_file() {
        return Err(VaultError::NotFound(file_path.to_string()));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_type = allowed
        .file_type(&ext)
        .ok_or_else(|| VaultError::UnsupportedType(file_path.to_string()))?;

    let body = match file_type {
        FileType::Text => {
            FileBody::Text(fs::read_to_string(&path).map_err(|e| VaultError::io(&path, e))?)
        }
        FileType::Image => FileBody::Bytes(fs::read(&path).map_err(|e| VaultError::io(&path, e))?),
    };
    Ok(OpenedFile {
        name,
        relative_path: resolver.relative(&path),
        file_type,
        body,
    })
}

/// A folder in the flat picker list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderInfo {
    pub name: String,
    pub relative_path: String,
    pub level: usize,
}

/// Every folder of the vault, depth-first, sorted by lowercase name at each level.
///
/// Hidden folders, skipped folders and the attachment subfolder are left out.
pub fn all_folders(resolver: &PathResolver, attachment_subfolder: &str) -> Vec<FolderInfo> {
    let mut folders = Vec::new();
    collect_folders(resolver, attachment_subfolder, resolver.root(), 0, &mut folders);
    folders
}

fn collect_folders(
    resolver: &PathResolver,
    attachment_subfolder: &str,
    dir: &Path,
    level: usize,
    folders: &mut Vec<FolderInfo>,
) {
    if level >= MAX_DEPTH {
        return;
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Error reading directory {}: {}", dir.display(), e);
            return;
        }
    };

    let mut subdirs: Vec<(String, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Error reading entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if is_hidden(&name)
            || name == attachment_subfolder
            || resolver.exclusions().is_skipped(&name)
        {
            continue;
        }
        subdirs.push((name, entry.path()));
    }
    subdirs.sort_by_key(|(name, _)| name.to_lowercase());

    for (name, path) in subdirs {
        folders.push(FolderInfo {
            relative_path: resolver.relative(&path),
            name,
            level,
        });
        collect_folders(resolver, attachment_subfolder, &path, level + 1, folders);
    }
}
