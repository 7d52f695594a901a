//! Vault configuration, read fresh from a settings collaborator on every operation
//!
//! The core never parses a configuration file itself. It only sees a
//! [`SettingsBackend`], a flat `(section, key) -> string` store, and turns those
//! strings into a typed [`VaultConfig`] each time an operation starts. A settings
//! update therefore takes effect on the next call without restarting anything.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::error::{VaultError, VaultResult};
use super::root::{self, RootGuard};

/// Settings section every vault key lives in
pub const SECTION: &str = "MD_NOTES_APP";

/// Setting keys understood by [`VaultConfig::load`]
pub mod keys {
    pub const NOTES_DIR: &str = "NOTES_DIR";
    pub const NOTE_APP_NAME: &str = "NOTE_APP_NAME";
    pub const IMAGE_STORAGE_MODE: &str = "IMAGE_STORAGE_MODE";
    pub const IMAGE_STORAGE_PATH: &str = "IMAGE_STORAGE_PATH";
    pub const IMAGE_SUBFOLDER_NAME: &str = "IMAGE_SUBFOLDER_NAME";
    pub const NOTES_DIR_SKIP: &str = "NOTES_DIR_SKIP";
    pub const NOTES_DIR_HIDE_SIDEPANE: &str = "NOTES_DIR_HIDE_SIDEPANE";
    pub const IMAGES_FS_HIDE: &str = "IMAGES_FS_HIDE";
    pub const ALLOWED_IMAGE_EXTENSIONS: &str = "ALLOWED_IMAGE_EXTENSIONS";
    pub const ALLOWED_FILE_EXTENSIONS: &str = "ALLOWED_FILE_EXTENSIONS";
    pub const MAX_CONTENT_LENGTH: &str = "MAX_CONTENT_LENGTH";
}

pub const DEFAULT_SUBFOLDER_NAME: &str = "attatched";
pub const DEFAULT_STORAGE_PATH: &str = "images";

/// Default value for every key, in the order they are written to a fresh store
pub const DEFAULTS: &[(&str, &str)] = &[
    (keys::NOTES_DIR, "notes"),
    (keys::NOTE_APP_NAME, "My Notes"),
    (keys::IMAGE_STORAGE_MODE, "1"),
    (keys::IMAGE_STORAGE_PATH, DEFAULT_STORAGE_PATH),
    (keys::IMAGE_SUBFOLDER_NAME, DEFAULT_SUBFOLDER_NAME),
    (keys::NOTES_DIR_SKIP, ""),
    (keys::NOTES_DIR_HIDE_SIDEPANE, ""),
    (keys::IMAGES_FS_HIDE, "False"),
    (keys::ALLOWED_IMAGE_EXTENSIONS, "jpg,jpeg,png,gif,bmp,webp"),
    (
        keys::ALLOWED_FILE_EXTENSIONS,
        "txt,csv,json,html,htm,xml,yaml,yml,ini,log,js,css,py,md",
    ),
    (keys::MAX_CONTENT_LENGTH, "16"),
];

fn default_for(key: &str) -> &'static str {
    DEFAULTS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .unwrap_or("")
}

/// Synchronous settings store consumed by the core
pub trait SettingsBackend: Send + Sync {
    /// Read a value, `None` when the key is absent
    fn get_setting(&self, section: &str, key: &str) -> Option<String>;

    /// Write a value
    fn set_setting(&self, section: &str, key: &str, value: &str) -> anyhow::Result<()>;
}

/// In-memory settings store
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<(String, String), String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert into the vault section
    pub fn with(self, key: &str, value: impl Into<String>) -> Self {
        self.values
            .write()
            .insert((SECTION.to_string(), key.to_string()), value.into());
        self
    }
}

impl SettingsBackend for MemorySettings {
    fn get_setting(&self, section: &str, key: &str) -> Option<String> {
        self.values
            .read()
            .get(&(section.to_string(), key.to_string()))
            .cloned()
    }

    fn set_setting(&self, section: &str, key: &str, value: &str) -> anyhow::Result<()> {
        self.values
            .write()
            .insert((section.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}

/// Write the default for every key the store does not have yet.
///
/// Existing values are never touched. Returns the keys that were added.
pub fn ensure_defaults(backend: &dyn SettingsBackend) -> VaultResult<Vec<&'static str>> {
    let mut added = Vec::new();
    for (key, value) in DEFAULTS {
        if backend.get_setting(SECTION, key).is_none() {
            backend
                .set_setting(SECTION, key, value)
                .map_err(VaultError::Settings)?;
            added.push(*key);
        }
    }
    if !added.is_empty() {
        tracing::info!("Added missing settings: {}", added.join(", "));
    }
    Ok(added)
}

/// Where newly uploaded images for a document are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StorageMode {
    /// Directly under the notes directory
    Root,
    /// One folder for every document; relative paths hang off the notes directory
    FixedFolder { path: PathBuf },
    /// Next to the referencing document
    CoLocated,
    /// A named subfolder beneath the referencing document's directory
    Subfolder { name: String },
}

impl StorageMode {
    /// Numeric code used in the settings store
    pub fn code(&self) -> &'static str {
        match self {
            StorageMode::Root => "1",
            StorageMode::FixedFolder { .. } => "2",
            StorageMode::CoLocated => "3",
            StorageMode::Subfolder { .. } => "4",
        }
    }

    /// Build a mode from its settings code, rejecting incomplete configurations
    pub fn from_code(code: &str, path: &str, subfolder: &str) -> VaultResult<Self> {
        match code.trim() {
            "1" => Ok(StorageMode::Root),
            "2" => {
                let path = path.trim();
                if path.is_empty() {
                    return Err(VaultError::InvalidConfig(
                        "storage path is required for the fixed folder mode".to_string(),
                    ));
                }
                Ok(StorageMode::FixedFolder {
                    path: PathBuf::from(path),
                })
            }
            "3" => Ok(StorageMode::CoLocated),
            "4" => {
                let name = subfolder.trim();
                validate_subfolder_name(name)?;
                Ok(StorageMode::Subfolder {
                    name: name.to_string(),
                })
            }
            other => Err(VaultError::InvalidConfig(format!(
                "invalid storage mode: {other:?}"
            ))),
        }
    }
}

fn validate_subfolder_name(name: &str) -> VaultResult<()> {
    if name.is_empty() {
        return Err(VaultError::InvalidConfig(
            "subfolder name is required for the subfolder mode".to_string(),
        ));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(VaultError::InvalidConfig(format!(
            "subfolder name must be a single folder name: {name:?}"
        )));
    }
    Ok(())
}

/// Directory names excluded from navigation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExclusionPolicy {
    /// Invisible and inaccessible
    pub skip: BTreeSet<String>,
    /// Left out of the sidebar tree only
    pub hide_from_sidebar: BTreeSet<String>,
}

impl ExclusionPolicy {
    /// Build a policy; a name in both sets is treated as skipped
    pub fn new<S, H>(skip: S, hide_from_sidebar: H) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        H: IntoIterator,
        H::Item: Into<String>,
    {
        let skip: BTreeSet<String> = skip.into_iter().map(Into::into).collect();
        let hide_from_sidebar = hide_from_sidebar
            .into_iter()
            .map(Into::into)
            .filter(|name| !skip.contains(name))
            .collect();
        Self {
            skip,
            hide_from_sidebar,
        }
    }

    /// Also hide the attachment subfolder from the sidebar
    pub fn with_attachment_subfolder(mut self, name: &str) -> Self {
        if !name.is_empty() && !self.skip.contains(name) {
            self.hide_from_sidebar.insert(name.to_string());
        }
        self
    }

    pub fn is_skipped(&self, name: &str) -> bool {
        self.skip.contains(name)
    }

    /// Whether a directory with this name stays out of the sidebar tree
    pub fn hides(&self, name: &str) -> bool {
        self.skip.contains(name) || self.hide_from_sidebar.contains(name)
    }

    /// First path component that names a skipped directory
    pub fn skipped_component<'a>(&self, components: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
        components.into_iter().find(|c| self.is_skipped(c))
    }
}

/// Broad classification of non-document files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Image,
    Text,
}

/// Extension allow-lists, lowercase and without the leading dot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllowedTypes {
    pub images: BTreeSet<String>,
    pub text: BTreeSet<String>,
}

impl AllowedTypes {
    pub fn from_lists(images: &str, text: &str) -> Self {
        Self {
            images: parse_extensions(images),
            text: parse_extensions(text),
        }
    }

    /// Classify an extension (with or without the dot, any case)
    pub fn file_type(&self, extension: &str) -> Option<FileType> {
        let ext = normalize_extension(extension);
        if ext.is_empty() {
            return None;
        }
        if self.images.contains(&ext) {
            Some(FileType::Image)
        } else if self.text.contains(&ext) {
            Some(FileType::Text)
        } else {
            None
        }
    }

    pub fn is_image(&self, extension: &str) -> bool {
        self.images.contains(&normalize_extension(extension))
    }
}

/// Lowercase an extension and strip a leading dot
pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_lowercase()
}

/// Parse a comma separated extension list, normalized
pub fn parse_extensions(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(normalize_extension)
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Parse a comma separated list of directory names
pub fn parse_name_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Typed snapshot of the vault settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultConfig {
    /// Notes directory, absolute
    pub root: PathBuf,
    pub app_name: String,
    pub storage: StorageMode,
    /// Configured attachment subfolder name, also hidden from the sidebar
    pub subfolder_name: String,
    pub exclusions: ExclusionPolicy,
    pub allowed: AllowedTypes,
    pub hide_images: bool,
    pub max_upload_bytes: usize,
}

impl VaultConfig {
    /// Read the current configuration from a settings store.
    ///
    /// Missing keys fall back to [`DEFAULTS`]. An unknown or incomplete storage
    /// mode falls back to [`StorageMode::Root`] with a warning.
    pub fn load(backend: &dyn SettingsBackend) -> VaultResult<Self> {
        let get = |key: &str| {
            backend
                .get_setting(SECTION, key)
                .unwrap_or_else(|| default_for(key).to_string())
        };

        let notes_dir = get(keys::NOTES_DIR);
        let notes_dir = notes_dir.trim();
        if notes_dir.is_empty() {
            return Err(VaultError::InvalidConfig(
                "notes directory is not configured".to_string(),
            ));
        }
        let root = root::absolute(Path::new(notes_dir))?;

        let subfolder_name = get(keys::IMAGE_SUBFOLDER_NAME).trim().to_string();
        let storage = match StorageMode::from_code(
            &get(keys::IMAGE_STORAGE_MODE),
            &get(keys::IMAGE_STORAGE_PATH),
            &subfolder_name,
        ) {
            Ok(mode) => mode,
            Err(e) => {
                tracing::warn!("Falling back to root image storage: {}", e);
                StorageMode::Root
            }
        };

        let exclusions = ExclusionPolicy::new(
            parse_name_list(&get(keys::NOTES_DIR_SKIP)),
            parse_name_list(&get(keys::NOTES_DIR_HIDE_SIDEPANE)),
        )
        .with_attachment_subfolder(&subfolder_name);

        let max_mb = get(keys::MAX_CONTENT_LENGTH)
            .trim()
            .parse::<usize>()
            .unwrap_or(16);

        Ok(Self {
            root,
            app_name: get(keys::NOTE_APP_NAME),
            storage,
            subfolder_name,
            exclusions,
            allowed: AllowedTypes::from_lists(
                &get(keys::ALLOWED_IMAGE_EXTENSIONS),
                &get(keys::ALLOWED_FILE_EXTENSIONS),
            ),
            hide_images: parse_bool(&get(keys::IMAGES_FS_HIDE)),
            max_upload_bytes: max_mb.saturating_mul(1024 * 1024),
        })
    }
}

/// Validate and persist a new image storage mode.
///
/// Mode 2 requires a storage path and mode 4 a subfolder name. Unused fields are
/// reset to their defaults, as the settings page does.
pub fn update_storage(
    backend: &dyn SettingsBackend,
    code: &str,
    path: &str,
    subfolder: &str,
) -> VaultResult<StorageMode> {
    let mode = StorageMode::from_code(code, path, subfolder)?;
    let (path, subfolder) = match &mode {
        StorageMode::FixedFolder { path } => (
            path.to_string_lossy().to_string(),
            DEFAULT_SUBFOLDER_NAME.to_string(),
        ),
        StorageMode::Subfolder { name } => (DEFAULT_STORAGE_PATH.to_string(), name.clone()),
        _ => (
            DEFAULT_STORAGE_PATH.to_string(),
            DEFAULT_SUBFOLDER_NAME.to_string(),
        ),
    };

    for (key, value) in [
        (keys::IMAGE_STORAGE_MODE, mode.code().to_string()),
        (keys::IMAGE_STORAGE_PATH, path),
        (keys::IMAGE_SUBFOLDER_NAME, subfolder),
    ] {
        backend
            .set_setting(SECTION, key, &value)
            .map_err(VaultError::Settings)?;
    }

    tracing::info!("Image storage mode set to {}", mode.code());
    Ok(mode)
}

/// Validate, create if needed, and persist a new notes directory
pub fn update_notes_dir(
    backend: &dyn SettingsBackend,
    guard: &RootGuard,
    candidate: &str,
) -> VaultResult<PathBuf> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return Err(VaultError::InvalidRoot(
            "notes directory is required".to_string(),
        ));
    }
    let root = guard.prepare_root(Path::new(candidate))?;
    backend
        .set_setting(SECTION, keys::NOTES_DIR, &root.to_string_lossy())
        .map_err(VaultError::Settings)?;
    tracing::info!("Notes directory set to {}", root.display());
    Ok(root)
}

/// Application-level settings edited together
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSettingsUpdate {
    pub app_name: String,
    pub hide_sidepane: String,
    pub skip_folders: String,
    pub hide_images: bool,
    pub allowed_image_extensions: String,
    pub allowed_file_extensions: String,
}

/// Persist application settings; extension lists are normalized to lowercase
pub fn update_app_settings(
    backend: &dyn SettingsBackend,
    update: &AppSettingsUpdate,
) -> VaultResult<()> {
    let app_name = update.app_name.trim();
    if app_name.is_empty() {
        return Err(VaultError::InvalidConfig(
            "application name is required".to_string(),
        ));
    }

    let join = |set: BTreeSet<String>| set.into_iter().collect::<Vec<_>>().join(",");
    let values = [
        (keys::NOTE_APP_NAME, app_name.to_string()),
        (
            keys::NOTES_DIR_HIDE_SIDEPANE,
            parse_name_list(&update.hide_sidepane).join(","),
        ),
        (
            keys::NOTES_DIR_SKIP,
            parse_name_list(&update.skip_folders).join(","),
        ),
        (
            keys::IMAGES_FS_HIDE,
            if update.hide_images { "True" } else { "False" }.to_string(),
        ),
        (
            keys::ALLOWED_IMAGE_EXTENSIONS,
            join(parse_extensions(&update.allowed_image_extensions)),
        ),
        (
            keys::ALLOWED_FILE_EXTENSIONS,
            join(parse_extensions(&update.allowed_file_extensions)),
        ),
    ];

    for (key, value) in values {
        backend
            .set_setting(SECTION, key, &value)
            .map_err(VaultError::Settings)?;
    }
    tracing::info!("Application settings updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_uses_defaults() {
        let settings = MemorySettings::new().with(keys::NOTES_DIR, "/srv/notes");
        let config = VaultConfig::load(&settings).unwrap();

        assert_eq!(config.root, PathBuf::from("/srv/notes"));
        assert_eq!(config.storage, StorageMode::Root);
        assert_eq!(config.max_upload_bytes, 16 * 1024 * 1024);
        assert!(config.allowed.is_image("PNG"));
        assert!(config.exclusions.hides(DEFAULT_SUBFOLDER_NAME));
        assert!(!config.hide_images);
    }

    #[test]
    fn test_storage_mode_codes() {
        assert_eq!(StorageMode::from_code("1", "", "").unwrap(), StorageMode::Root);
        assert_eq!(
            StorageMode::from_code("2", "/srv/img", "").unwrap(),
            StorageMode::FixedFolder {
                path: PathBuf::from("/srv/img")
            }
        );
        assert_eq!(
            StorageMode::from_code("4", "", "assets").unwrap(),
            StorageMode::Subfolder {
                name: "assets".to_string()
            }
        );
        assert!(matches!(
            StorageMode::from_code("2", "  ", ""),
            Err(VaultError::InvalidConfig(_))
        ));
        assert!(matches!(
            StorageMode::from_code("4", "", ""),
            Err(VaultError::InvalidConfig(_))
        ));
        assert!(matches!(
            StorageMode::from_code("4", "", "a/b"),
            Err(VaultError::InvalidConfig(_))
        ));
        assert!(StorageMode::from_code("7", "", "").is_err());
    }

    #[test]
    fn test_invalid_mode_falls_back_to_root() {
        let settings = MemorySettings::new()
            .with(keys::NOTES_DIR, "/srv/notes")
            .with(keys::IMAGE_STORAGE_MODE, "2")
            .with(keys::IMAGE_STORAGE_PATH, "");
        let config = VaultConfig::load(&settings).unwrap();
        assert_eq!(config.storage, StorageMode::Root);
    }

    #[test]
    fn test_exclusions_are_disjoint() {
        let policy = ExclusionPolicy::new(["private", "tmp"], ["archive", "private"]);
        assert!(policy.is_skipped("private"));
        assert!(!policy.hide_from_sidebar.contains("private"));
        assert!(policy.hides("archive"));
        assert!(!policy.is_skipped("archive"));
        assert_eq!(policy.skipped_component(["a", "tmp", "b"]), Some("tmp"));
    }

    #[test]
    fn test_update_storage_requires_fields() {
        let settings = MemorySettings::new();
        assert!(update_storage(&settings, "2", "", "").is_err());
        assert!(update_storage(&settings, "4", "", " ").is_err());
        assert!(settings.get_setting(SECTION, keys::IMAGE_STORAGE_MODE).is_none());

        let mode = update_storage(&settings, "4", "ignored", "assets").unwrap();
        assert_eq!(mode.code(), "4");
        assert_eq!(
            settings.get_setting(SECTION, keys::IMAGE_SUBFOLDER_NAME).as_deref(),
            Some("assets")
        );
        assert_eq!(
            settings.get_setting(SECTION, keys::IMAGE_STORAGE_PATH).as_deref(),
            Some(DEFAULT_STORAGE_PATH)
        );
    }

    #[test]
    fn test_update_app_settings_normalizes_extensions() {
        let settings = MemorySettings::new();
        let update = AppSettingsUpdate {
            app_name: "Notebook".to_string(),
            skip_folders: " private , ,drafts".to_string(),
            allowed_image_extensions: "PNG, .Jpg".to_string(),
            ..Default::default()
        };
        update_app_settings(&settings, &update).unwrap();

        assert_eq!(
            settings.get_setting(SECTION, keys::NOTES_DIR_SKIP).as_deref(),
            Some("private,drafts")
        );
        assert_eq!(
            settings
                .get_setting(SECTION, keys::ALLOWED_IMAGE_EXTENSIONS)
                .as_deref(),
            Some("jpg,png")
        );
        assert!(update_app_settings(&settings, &AppSettingsUpdate::default()).is_err());
    }

    #[test]
    fn test_ensure_defaults_keeps_existing_values() {
        let settings = MemorySettings::new().with(keys::NOTE_APP_NAME, "Mine");
        let added = ensure_defaults(&settings).unwrap();

        assert!(!added.contains(&keys::NOTE_APP_NAME));
        assert_eq!(
            settings.get_setting(SECTION, keys::NOTE_APP_NAME).as_deref(),
            Some("Mine")
        );
        assert!(ensure_defaults(&settings).unwrap().is_empty());
    }

    #[test]
    fn test_update_notes_dir_creates_and_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let settings = MemorySettings::new();
        let guard = RootGuard::with_protected(Vec::<String>::new());

        let root = update_notes_dir(&settings, &guard, &tmp.path().join("vault").to_string_lossy())
            .unwrap();
        assert!(root.is_dir());
        assert_eq!(
            settings.get_setting(SECTION, keys::NOTES_DIR),
            Some(root.to_string_lossy().to_string())
        );
        assert!(matches!(
            update_notes_dir(&settings, &guard, "  "),
            Err(VaultError::InvalidRoot(_))
        ));
    }

    #[test]
    fn test_allowed_types_classify() {
        let allowed = AllowedTypes::from_lists("png,jpg", "txt,md");
        assert_eq!(allowed.file_type(".PNG"), Some(FileType::Image));
        assert_eq!(allowed.file_type("txt"), Some(FileType::Text));
        assert_eq!(allowed.file_type("exe"), None);
        assert_eq!(allowed.file_type(""), None);
    }
}
