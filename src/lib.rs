//! mdnotes - a personal markdown note server
//!
//! The library holds everything that touches the notes directory: resolving
//! untrusted paths, building the navigation tree, placing and serving
//! attachments, and reading configuration from a settings store.

pub mod core;

pub use crate::core::config::{MemorySettings, SettingsBackend, StorageMode, VaultConfig};
pub use crate::core::error::{VaultError, VaultResult};
pub use crate::core::settings_file::{SettingsFile, SettingsWatcher};
pub use crate::core::vault::Vault;
