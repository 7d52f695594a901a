//! Core functionality: path safety, the vault tree, documents, attachments and configuration

pub mod attachments;
pub mod breadcrumbs;
pub mod config;
pub mod document;
pub mod error;
pub mod file_system;
pub mod paths;
pub mod render;
pub mod root;
pub mod search;
pub mod settings_file;
pub mod storage;
pub mod vault;
