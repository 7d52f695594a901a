//! Full-text search over the vault's documents

use std::fs;

use serde::Serialize;
use walkdir::WalkDir;

use super::file_system::is_document_name;
use super::paths::PathResolver;

/// Characters of context kept on each side of a hit
const SNIPPET_CONTEXT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    /// File stem of the document
    pub title: String,
    pub relative_path: String,
    pub snippet: String,
}

/// Case-insensitive substring search; hits come back in path order.
///
/// Hidden and skipped directories are never entered. Files that cannot be read
/// are logged and left out.
pub fn search(resolver: &PathResolver, query: &str) -> Vec<SearchHit> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let exclusions = resolver.exclusions();
    let walker = WalkDir::new(resolver.root())
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !name.starts_with('.') && !(entry.file_type().is_dir() && exclusions.is_skipped(&name))
        });

    let mut hits = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Error walking notes directory: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_document_name(&entry.file_name().to_string_lossy()) {
            continue;
        }

        let path = entry.path();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Error reading {}: {}", path.display(), e);
                continue;
            }
        };
        let Some(snippet) = snippet_around(&content, &needle) else {
            continue;
        };

        hits.push(SearchHit {
            title: path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
            relative_path: resolver.relative(path),
            snippet,
        });
    }
    hits
}

/// Text around the first case-insensitive match of `needle` (already lowercase)
fn snippet_around(content: &str, needle: &str) -> Option<String> {
    let chars: Vec<char> = content.chars().collect();
    let lowered: Vec<String> = chars.iter().map(|c| c.to_lowercase().collect()).collect();
    let needle_len = needle.chars().count();

    // Compare per source character so the hit maps back to `chars`
    let start = (0..chars.len()).find(|&i| {
        let mut candidate = String::new();
        for folded in lowered.iter().skip(i) {
            if candidate.len() >= needle.len() {
                break;
            }
            candidate.push_str(folded);
        }
        candidate.starts_with(needle)
    })?;

    let end = (start + needle_len).min(chars.len());
    let from = start.saturating_sub(SNIPPET_CONTEXT);
    let to = (end + SNIPPET_CONTEXT).min(chars.len());
    Some(chars[from..to].iter().collect::<String>().trim().to_string())
}
