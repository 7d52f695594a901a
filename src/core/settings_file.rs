//! Settings persisted as a JSON file, with optional live reload

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;

use super::config::SettingsBackend;

type Sections = BTreeMap<String, BTreeMap<String, String>>;

/// `section -> key -> value` store saved as pretty JSON after every write
#[derive(Debug)]
pub struct SettingsFile {
    path: PathBuf,
    sections: RwLock<Sections>,
    version: AtomicU64,
}

impl SettingsFile {
    /// Default location in the user's config directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "mdnotes", "MdNotes")
            .map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Open the settings file at the default location
    pub fn open_default() -> Result<Self> {
        let path = Self::default_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Self::open(path)
    }

    /// Open a settings file; a missing file starts empty
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let sections = read_sections(&path)?;
        Ok(Self {
            path,
            sections: RwLock::new(sections),
            version: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Incremented every time the file is re-read
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Re-read the file from disk
    pub fn reload(&self) -> Result<()> {
        let sections = read_sections(&self.path)?;
        *self.sections.write() = sections;
        self.version.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Reloaded settings from: {}", self.path.display());
        Ok(())
    }

    /// Save the current values to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = serde_json::to_string_pretty(&*self.sections.read())?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to save settings: {}", self.path.display()))?;
        tracing::debug!("Saved settings to: {}", self.path.display());
        Ok(())
    }
}

fn read_sections(path: &Path) -> Result<Sections> {
    if !path.exists() {
        return Ok(Sections::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings: {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Sections::new());
    }
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse settings: {}", path.display()))
}

impl SettingsBackend for SettingsFile {
    fn get_setting(&self, section: &str, key: &str) -> Option<String> {
        self.sections
            .read()
            .get(section)
            .and_then(|values| values.get(key))
            .cloned()
    }

    fn set_setting(&self, section: &str, key: &str, value: &str) -> Result<()> {
        self.sections
            .write()
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.save()
    }
}

impl<T: SettingsBackend + ?Sized> SettingsBackend for Arc<T> {
    fn get_setting(&self, section: &str, key: &str) -> Option<String> {
        (**self).get_setting(section, key)
    }

    fn set_setting(&self, section: &str, key: &str, value: &str) -> Result<()> {
        (**self).set_setting(section, key, value)
    }
}

/// Reloads a [`SettingsFile`] whenever it changes on disk; stops when dropped
pub struct SettingsWatcher {
    _watcher: RecommendedWatcher,
}

impl SettingsWatcher {
    pub fn start(settings: Arc<SettingsFile>) -> Result<Self> {
        let path = settings.path().to_path_buf();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = path.file_name().map(|n| n.to_os_string());

        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                let touches_file = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if touches_file {
                    if let Err(e) = settings.reload() {
                        tracing::warn!("Failed to reload settings: {:#}", e);
                    }
                }
            }
            Err(e) => tracing::warn!("Settings watcher error: {}", e),
        };

        let mut watcher = RecommendedWatcher::new(handler, NotifyConfig::default())
            .context("Failed to create settings watcher")?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        tracing::info!("Watching settings file: {}", path.display());
        Ok(Self { _watcher: watcher })
    }
}
