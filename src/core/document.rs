//! Document management for markdown files

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::SystemTime;

use serde::Serialize;

use super::error::{VaultError, VaultResult};
use super::file_system::{is_document_name, DOCUMENT_EXTENSION};
use super::paths::PathResolver;

/// Device names Windows refuses as file names
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// A markdown document
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// Absolute file path
    #[serde(skip)]
    pub path: PathBuf,
    /// Root-relative path with forward slashes
    pub relative_path: String,
    /// Document content
    pub content: String,
    /// Last modification time
    #[serde(skip)]
    pub last_modified: Option<SystemTime>,
}

impl Document {
    /// Open an existing document
    pub fn open(resolver: &PathResolver, note_path: &str) -> VaultResult<Self> {
        if !is_document_name(note_path) {
            return Err(VaultError::NotFound(note_path.to_string()));
        }
        let path = resolver.resolve_read(note_path)?;
        if !path.is_file() {
            return Err(VaultError::NotFound(note_path.to_string()));
        }

        let content = fs::read_to_string(&path).map_err(|e| VaultError::io(&path, e))?;
        let last_modified = fs::metadata(&path).ok().and_then(|m| m.modified().ok());

        Ok(Self {
            relative_path: resolver.relative(&path),
            path,
            content,
            last_modified,
        })
    }

    /// Create a document named `title` in `folder`, creating the folder if needed.
    ///
    /// Never overwrites: an existing file of the same name is an error.
    pub fn create(
        resolver: &PathResolver,
        folder: &str,
        title: &str,
        content: &str,
    ) -> VaultResult<Self> {
        let title = validate_title(title)?;
        let dir = resolver.resolve_write(folder)?;
        fs::create_dir_all(&dir).map_err(|e| VaultError::io(&dir, e))?;

        let path = dir.join(format!("{title}.{DOCUMENT_EXTENSION}"));
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => VaultError::AlreadyExists(path.clone()),
                _ => VaultError::io(&path, e),
            })?;
        file.write_all(content.as_bytes())
            .map_err(|e| VaultError::io(&path, e))?;
        tracing::info!("Created document: {}", path.display());

        Ok(Self {
            relative_path: resolver.relative(&path),
            path,
            content: content.to_string(),
            last_modified: Some(SystemTime::now()),
        })
    }

    /// Save the document to disk
    pub fn save(&mut self) -> VaultResult<()> {
        fs::write(&self.path, &self.content).map_err(|e| VaultError::io(&self.path, e))?;
        self.last_modified = Some(SystemTime::now());
        tracing::info!("Saved document: {}", self.path.display());
        Ok(())
    }

    /// Update content; returns whether it changed
    pub fn set_content(&mut self, content: String) -> bool {
        if self.content != content {
            self.content = content;
            true
        } else {
            false
        }
    }

    /// Remove an existing document
    pub fn delete(resolver: &PathResolver, note_path: &str) -> VaultResult<PathBuf> {
        let doc = Self::open(resolver, note_path)?;
        fs::remove_file(&doc.path).map_err(|e| VaultError::io(&doc.path, e))?;
        tracing::info!("Deleted document: {}", doc.path.display());
        Ok(doc.path)
    }

    /// Title shown for the document, its file stem
    pub fn title(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Untitled".to_string())
    }

    /// Get content without frontmatter for preview
    pub fn content_without_frontmatter(&self) -> &str {
        strip_frontmatter(&self.content)
    }
}

/// Drop a leading `---` delimited block
pub fn strip_frontmatter(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("---") else {
        return content;
    };
    match rest.find("\n---") {
        Some(end) => {
            let after = &rest[end + 4..];
            after.trim_start_matches(['\r', '\n'])
        }
        None => content,
    }
}

/// Check a new document title and return it trimmed
pub fn validate_title(title: &str) -> VaultResult<&str> {
    let title = title.trim();
    let invalid = |reason: &str| Err(VaultError::InvalidName(format!("{title:?}: {reason}")));

    if title.is_empty() {
        return invalid("title is required");
    }
    if title.contains(['/', '\\']) {
        return invalid("slashes are not allowed");
    }
    if !title
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '))
    {
        return invalid("only letters, digits, spaces, '_', '-' and '.' are allowed");
    }
    if title.starts_with('.') || title.ends_with('.') {
        return invalid("cannot start or end with a dot");
    }
    let upper = title.to_uppercase();
    let stem = upper.split('.').next().unwrap_or(&upper);
    if RESERVED_NAMES.contains(&stem) {
        return invalid("reserved name");
    }
    Ok(title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ExclusionPolicy;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, PathResolver) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("notes");
        fs::create_dir_all(root.join("private")).unwrap();
        fs::write(root.join("private/secret.md"), "secret").unwrap();
        fs::write(root.join("data.txt"), "text").unwrap();
        let resolver =
            PathResolver::new(&root, ExclusionPolicy::new(["private"], Vec::<String>::new()))
                .unwrap();
        (tmp, resolver)
    }

    #[test]
    fn test_create_never_overwrites() {
        let (_tmp, resolver) = fixture();
        let doc = Document::create(&resolver, "", "My Notes", "## My Notes\n").unwrap();
        assert_eq!(doc.path, resolver.root().join("My Notes.md"));
        assert_eq!(doc.relative_path, "My Notes.md");
        assert_eq!(doc.title(), "My Notes");

        assert!(matches!(
            Document::create(&resolver, "", "My Notes", "other"),
            Err(VaultError::AlreadyExists(_))
        ));
        assert_eq!(fs::read_to_string(&doc.path).unwrap(), "## My Notes\n");
    }

    #[test]
    fn test_create_makes_folder() {
        let (_tmp, resolver) = fixture();
        let doc = Document::create(&resolver, "journal/2024", "day-1", "").unwrap();
        assert_eq!(doc.relative_path, "journal/2024/day-1.md");
        assert!(doc.path.is_file());

        assert!(matches!(
            Document::create(&resolver, "private", "x", ""),
            Err(VaultError::SkippedDirectory(_))
        ));
        assert!(matches!(
            Document::create(&resolver, "../elsewhere", "x", ""),
            Err(VaultError::PathEscape(_))
        ));
    }

    #[test]
    fn test_open_save_delete() {
        let (_tmp, resolver) = fixture();
        Document::create(&resolver, "a", "note", "first").unwrap();

        let mut doc = Document::open(&resolver, "a/note.md").unwrap();
        assert_eq!(doc.content, "first");
        assert!(doc.set_content("second".to_string()));
        assert!(!doc.set_content("second".to_string()));
        doc.save().unwrap();
        assert_eq!(Document::open(&resolver, "a/note.md").unwrap().content, "second");

        Document::delete(&resolver, "a/note.md").unwrap();
        assert!(matches!(
            Document::open(&resolver, "a/note.md"),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_rejections() {
        let (_tmp, resolver) = fixture();
        assert!(matches!(
            Document::open(&resolver, "data.txt"),
            Err(VaultError::NotFound(_))
        ));
        assert!(matches!(
            Document::open(&resolver, "private/secret.md"),
            Err(VaultError::SkippedDirectory(_))
        ));
        assert!(matches!(
            Document::open(&resolver, "../notes.md"),
            Err(VaultError::PathEscape(_))
        ));
    }

    #[test]
    fn test_validate_title() {
        assert_eq!(validate_title("  Meeting notes 2024-01 ").unwrap(), "Meeting notes 2024-01");
        assert!(validate_title("v1.2 plan").is_ok());
        for bad in ["", "  ", "a/b", "a\\b", ".hidden", "trailing.", "what?", "con", "LPT1", "aux.txt"] {
            assert!(
                matches!(validate_title(bad), Err(VaultError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_strip_frontmatter() {
        let content = "---\ntitle: x\n---\n\n# Body\n";
        assert_eq!(strip_frontmatter(content), "# Body\n");
        assert_eq!(strip_frontmatter("# Plain"), "# Plain");
        assert_eq!(strip_frontmatter("---\nunterminated"), "---\nunterminated");
    }
}
