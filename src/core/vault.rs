//! The vault: every operation the server exposes, over one settings store
//!
//! Nothing here is cached. Each call loads a fresh [`VaultConfig`] and builds a
//! [`PathResolver`] from it, so settings changes apply to the next request.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::attachments::{self, AttachmentIngestor, IngestedAttachment, StoredFile};
use super::breadcrumbs::{self, Breadcrumb};
use super::config::{self, AppSettingsUpdate, SettingsBackend, StorageMode, VaultConfig};
use super::document::Document;
use super::error::{VaultError, VaultResult};
use super::file_system::{self, FileTree, FolderEntry, FolderInfo, OpenedFile, TreeBuilder};
use super::paths::PathResolver;
use super::render::{self, AttachmentLinks};
use super::root::{RootCheck, RootGuard};
use super::search::{self, SearchHit};
use super::storage::{ServableReference, StoragePolicy};

/// A folder as displayed
#[derive(Debug, Clone, Serialize)]
pub struct FolderView {
    pub relative_path: String,
    pub entries: Vec<FolderEntry>,
    pub breadcrumbs: Vec<Breadcrumb>,
}

/// A document as displayed
#[derive(Debug, Clone, Serialize)]
pub struct NoteView {
    pub title: String,
    pub document: Document,
    pub breadcrumbs: Vec<Breadcrumb>,
    /// Folders to expand in the sidebar
    pub active_path: Vec<String>,
    pub html: String,
}

/// Note server core bound to a settings store
pub struct Vault<B: SettingsBackend> {
    settings: B,
    guard: RootGuard,
}

impl<B: SettingsBackend> Vault<B> {
    pub fn new(settings: B) -> Self {
        Self::with_guard(settings, RootGuard::default())
    }

    /// Use a custom root denylist
    pub fn with_guard(settings: B, guard: RootGuard) -> Self {
        Self { settings, guard }
    }

    pub fn settings(&self) -> &B {
        &self.settings
    }

    /// Write defaults for missing settings; returns the keys added
    pub fn ensure_defaults(&self) -> VaultResult<Vec<&'static str>> {
        config::ensure_defaults(&self.settings)
    }

    /// Fill missing settings and make sure the notes directory exists
    pub fn init(&self) -> VaultResult<PathBuf> {
        self.ensure_defaults()?;
        let config = self.config()?;
        let root = self.guard.prepare_root(&config.root)?;
        tracing::info!("Using notes directory: {}", root.display());
        Ok(root)
    }

    /// Current configuration, read fresh
    pub fn config(&self) -> VaultResult<VaultConfig> {
        VaultConfig::load(&self.settings)
    }

    fn resolver(config: &VaultConfig) -> VaultResult<PathResolver> {
        PathResolver::new(&config.root, config.exclusions.clone())
    }

    /// Load settings and bind a resolver, refusing a denylisted root on every call
    fn open(&self) -> VaultResult<(VaultConfig, PathResolver)> {
        let config = self.config()?;
        self.guard.check_security(&config.root)?;
        let resolver = Self::resolver(&config)?;
        Ok((config, resolver))
    }

    /// Sidebar tree
    pub fn tree(&self) -> VaultResult<FileTree> {
        let (_, resolver) = self.open()?;
        Ok(TreeBuilder::new(resolver.exclusions()).build(resolver.root()))
    }

    /// Immediate contents of a folder
    pub fn folder(&self, folder_path: &str) -> VaultResult<FolderView> {
        let (config, resolver) = self.open()?;
        let entries =
            file_system::list_folder(&resolver, &config.allowed, config.hide_images, folder_path)?;
        let relative_path = folder_path.trim_matches('/').to_string();
        Ok(FolderView {
            breadcrumbs: breadcrumbs::build(&relative_path, None),
            relative_path,
            entries,
        })
    }

    /// Flat folder list for pickers
    pub fn folders(&self) -> VaultResult<Vec<FolderInfo>> {
        let (config, resolver) = self.open()?;
        Ok(file_system::all_folders(&resolver, &config.subfolder_name))
    }

    /// Open a document with its rendered body and navigation
    pub fn note(&self, note_path: &str) -> VaultResult<NoteView> {
        let (config, resolver) = self.open()?;
        let document = Document::open(&resolver, note_path)?;
        let relative = document.relative_path.clone();

        let policy = StoragePolicy::new(&config.storage, &resolver);
        let hook = AttachmentLinks::new(policy, Some(relative.as_str()));
        let html = render::render_html(document.content_without_frontmatter(), &hook);

        Ok(NoteView {
            title: document.title(),
            breadcrumbs: breadcrumbs::build(&relative, None),
            active_path: breadcrumbs::ancestor_paths(&relative),
            html,
            document,
        })
    }

    /// Read any allowed file for viewing or download
    pub fn file(&self, file_path: &str) -> VaultResult<OpenedFile> {
        let (config, resolver) = self.open()?;
        file_system::read_file(&resolver, &config.allowed, file_path)
    }

    /// Overwrite an existing document
    pub fn save_note(&self, note_path: &str, content: String) -> VaultResult<Document> {
        let (_, resolver) = self.open()?;
        let mut document = Document::open(&resolver, note_path)?;
        document.set_content(content);
        document.save()?;
        Ok(document)
    }

    /// Create a new document; never overwrites
    pub fn create_note(&self, folder: &str, title: &str, content: &str) -> VaultResult<Document> {
        let (_, resolver) = self.open()?;
        Document::create(&resolver, folder, title, content)
    }

    pub fn delete_note(&self, note_path: &str) -> VaultResult<PathBuf> {
        let (_, resolver) = self.open()?;
        Document::delete(&resolver, note_path)
    }

    /// Breadcrumbs for a path, without touching the disk
    pub fn breadcrumbs(&self, path: &str, override_last_label: Option<&str>) -> Vec<Breadcrumb> {
        breadcrumbs::build(path, override_last_label)
    }

    pub fn search(&self, query: &str) -> VaultResult<Vec<SearchHit>> {
        let (_, resolver) = self.open()?;
        Ok(search::search(&resolver, query))
    }

    /// Store a pasted image for `note_path` according to the storage mode
    pub fn upload_image(
        &self,
        filename: Option<&str>,
        bytes: &[u8],
        note_path: Option<&str>,
    ) -> VaultResult<IngestedAttachment> {
        let (config, resolver) = self.open()?;
        let policy = StoragePolicy::new(&config.storage, &resolver);
        AttachmentIngestor::new(policy, &config.allowed, config.max_upload_bytes)
            .ingest(filename, bytes, note_path)
    }

    /// Store an arbitrary allowed file into a folder
    pub fn upload_file(
        &self,
        folder: &str,
        filename: Option<&str>,
        bytes: &[u8],
    ) -> VaultResult<StoredFile> {
        let (config, resolver) = self.open()?;
        attachments::store_file(
            &resolver,
            &config.allowed,
            config.max_upload_bytes,
            folder,
            filename,
            bytes,
        )
    }

    /// Absolute file behind a servable reference
    pub fn serve(&self, reference: &ServableReference) -> VaultResult<PathBuf> {
        let (config, resolver) = self.open()?;
        let path = StoragePolicy::new(&config.storage, &resolver).resolve_for_serving(reference)?;
        if !path.is_file() {
            return Err(VaultError::NotFound(resolver.relative(&path)));
        }
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        if config.allowed.file_type(&ext).is_none() {
            return Err(VaultError::UnsupportedType(resolver.relative(&path)));
        }
        Ok(path)
    }

    /// Map an embed found in a document to how it is served
    pub fn reference_from_markup(
        &self,
        note_path: Option<&str>,
        raw: &str,
    ) -> VaultResult<ServableReference> {
        let (config, resolver) = self.open()?;
        Ok(StoragePolicy::new(&config.storage, &resolver).reference_from_markup(note_path, raw))
    }

    /// Dry-run validation of a notes directory candidate
    pub fn check_root(&self, candidate: &Path) -> VaultResult<RootCheck> {
        self.guard.check_root(candidate)
    }

    /// Switch to another notes directory, creating it if needed
    pub fn set_notes_dir(&self, candidate: &str) -> VaultResult<PathBuf> {
        config::update_notes_dir(&self.settings, &self.guard, candidate)
    }

    pub fn set_storage(&self, code: &str, path: &str, subfolder: &str) -> VaultResult<StorageMode> {
        config::update_storage(&self.settings, code, path, subfolder)
    }

    pub fn update_app_settings(&self, update: &AppSettingsUpdate) -> VaultResult<()> {
        config::update_app_settings(&self.settings, update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{keys, MemorySettings};
    use std::fs;
    use tempfile::TempDir;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0];

    fn vault() -> (TempDir, Vault<MemorySettings>) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("notes");
        let settings = MemorySettings::new()
            .with(keys::NOTES_DIR, root.to_string_lossy())
            .with(keys::NOTES_DIR_SKIP, "private");
        let vault = Vault::with_guard(settings, RootGuard::with_protected(Vec::<String>::new()));
        vault.init().unwrap();
        fs::create_dir_all(root.join("proj")).unwrap();
        fs::create_dir_all(root.join("private")).unwrap();
        fs::write(root.join("proj/readme.md"), "# Readme\n\n![[attatched/pic.png]]\n").unwrap();
        fs::write(root.join("private/secret.md"), "secret").unwrap();
        (tmp, vault)
    }

    #[test]
    fn test_system_root_refused_on_every_call() {
        let vault = Vault::new(MemorySettings::new().with(keys::NOTES_DIR, "/etc"));
        assert!(matches!(vault.tree(), Err(VaultError::InvalidRoot(_))));
        assert!(matches!(vault.folder(""), Err(VaultError::InvalidRoot(_))));
        assert!(matches!(vault.file("hostname"), Err(VaultError::InvalidRoot(_))));
    }

    #[test]
    fn test_root_switched_into_denylist_is_refused() {
        let tmp = TempDir::new().unwrap();
        let open = tmp.path().join("open");
        let locked = tmp.path().join("locked");
        fs::create_dir_all(&open).unwrap();
        fs::create_dir_all(&locked).unwrap();
        let locked = fs::canonicalize(&locked).unwrap();

        let settings = MemorySettings::new().with(keys::NOTES_DIR, open.to_string_lossy());
        let guard = RootGuard::with_protected([locked.to_string_lossy().to_string()]);
        let vault = Vault::with_guard(settings, guard);
        assert!(vault.tree().is_ok());

        vault
            .settings()
            .set_setting(config::SECTION, keys::NOTES_DIR, &locked.to_string_lossy())
            .unwrap();
        assert!(matches!(vault.tree(), Err(VaultError::InvalidRoot(_))));
        assert!(matches!(vault.search("x"), Err(VaultError::InvalidRoot(_))));
    }

    #[test]
    fn test_init_creates_root_and_defaults() {
        let (tmp, vault) = vault();
        assert!(tmp.path().join("notes").is_dir());
        assert_eq!(
            vault
                .settings()
                .get_setting(config::SECTION, keys::NOTE_APP_NAME)
                .as_deref(),
            Some("My Notes")
        );
    }

    #[test]
    fn test_tree_and_folder() {
        let (_tmp, vault) = vault();
        let tree = vault.tree().unwrap();
        assert!(tree.root.find("proj/readme.md").is_some());
        assert!(tree.root.find("private").is_none());

        let folder = vault.folder("proj").unwrap();
        assert_eq!(folder.entries.len(), 1);
        assert_eq!(folder.breadcrumbs.last().unwrap().target, None);
        assert!(matches!(
            vault.folder("private"),
            Err(VaultError::SkippedDirectory(_))
        ));
    }

    #[test]
    fn test_settings_apply_on_next_call() {
        let (_tmp, vault) = vault();
        vault.set_storage("4", "", "attatched").unwrap();
        let note = vault.note("proj/readme.md").unwrap();
        assert!(note.html.contains("/attachments/proj/attatched/pic.png"));
        assert_eq!(note.active_path, vec!["proj"]);
        assert_eq!(note.title, "readme");

        vault.set_storage("1", "", "").unwrap();
        let note = vault.note("proj/readme.md").unwrap();
        assert!(note.html.contains(r#"src="/attachments/attatched/pic.png""#));
    }

    #[test]
    fn test_note_lifecycle() {
        let (_tmp, vault) = vault();
        let created = vault.create_note("journal", "Day one", "hello").unwrap();
        assert_eq!(created.relative_path, "journal/Day one.md");

        vault
            .save_note("journal/Day one.md", "hello again".to_string())
            .unwrap();
        assert_eq!(
            vault.note("journal/Day one.md").unwrap().document.content,
            "hello again"
        );
        let hits = vault.search("AGAIN").unwrap();
        assert_eq!(hits.len(), 1);

        vault.delete_note("journal/Day one.md").unwrap();
        assert!(matches!(
            vault.note("journal/Day one.md"),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_upload_and_serve() {
        let (_tmp, vault) = vault();
        vault.set_storage("3", "", "").unwrap();
        let stored = vault
            .upload_image(Some("shot.png"), PNG, Some("proj/readme.md"))
            .unwrap();
        let served = vault.serve(&stored.servable_reference).unwrap();
        assert_eq!(served, fs::canonicalize(&stored.path).unwrap());

        let file = vault
            .upload_file("proj", Some("notes.txt"), b"plain text")
            .unwrap();
        assert_eq!(file.relative_path, "proj/notes.txt");

        assert!(matches!(
            vault.serve(&ServableReference::Attached("private/secret.md".to_string())),
            Err(VaultError::SkippedDirectory(_))
        ));
        assert!(matches!(
            vault.serve(&ServableReference::Attached("proj".to_string())),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_disallowed_types_are_neither_served_nor_viewed() {
        let (tmp, vault) = vault();
        let root = tmp.path().join("notes");
        fs::write(root.join("proj/run.sh"), "echo hi").unwrap();
        fs::write(root.join("proj/list.txt"), "one\ntwo").unwrap();

        assert!(matches!(
            vault.serve(&ServableReference::Attached("proj/run.sh".to_string())),
            Err(VaultError::UnsupportedType(_))
        ));
        assert!(matches!(
            vault.file("proj/run.sh"),
            Err(VaultError::UnsupportedType(_))
        ));
        assert!(matches!(
            vault.file("private/secret.md"),
            Err(VaultError::SkippedDirectory(_))
        ));
        assert!(matches!(
            vault.file("../outside.txt"),
            Err(VaultError::PathEscape(_))
        ));

        let opened = vault.file("proj/list.txt").unwrap();
        assert_eq!(opened.relative_path, "proj/list.txt");
        assert!(matches!(opened.body, file_system::FileBody::Text(ref t) if t == "one\ntwo"));
        assert!(vault
            .serve(&ServableReference::Attached("proj/list.txt".to_string()))
            .is_ok());
    }
}
