//! Breadcrumb trails for documents and folders

use serde::Serialize;

use super::file_system::{display_name, is_document_name};

/// Where a breadcrumb navigates to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum NavTarget {
    /// The vault index
    Root,
    /// A folder view, by root-relative path
    Folder(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub label: String,
    /// `None` for the current, non-navigable location
    pub target: Option<NavTarget>,
}

impl Breadcrumb {
    fn new(label: impl Into<String>, target: Option<NavTarget>) -> Self {
        Self {
            label: label.into(),
            target,
        }
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Trail for the location currently being displayed
pub fn build(path: &str, override_last_label: Option<&str>) -> Vec<Breadcrumb> {
    build_trail(path, path, override_last_label)
}

/// Trail for `path`, as seen while `displayed` is on screen.
///
/// A document always ends in a non-navigable crumb. A folder does only when it
/// is the displayed location.
pub fn build_trail(path: &str, displayed: &str, override_last_label: Option<&str>) -> Vec<Breadcrumb> {
    let parts = segments(path);
    let Some((last, dirs)) = parts.split_last() else {
        let label = override_last_label.unwrap_or("/");
        return vec![Breadcrumb::new(label, None)];
    };

    let mut crumbs = vec![Breadcrumb::new("/", Some(NavTarget::Root))];
    let mut current = String::new();
    for dir in dirs {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(dir);
        crumbs.push(Breadcrumb::new(*dir, Some(NavTarget::Folder(current.clone()))));
    }

    let full = parts.join("/");
    let (label, target) = if is_document_name(last) {
        (display_name(last), None)
    } else if full == segments(displayed).join("/") {
        (last.to_string(), None)
    } else {
        (last.to_string(), Some(NavTarget::Folder(full)))
    };
    let label = override_last_label.map(str::to_string).unwrap_or(label);
    crumbs.push(Breadcrumb::new(label, target));
    crumbs
}

/// Root-relative paths of every folder containing `path`, outermost first
pub fn ancestor_paths(path: &str) -> Vec<String> {
    let parts = segments(path);
    (1..parts.len()).map(|i| parts[..i].join("/")).collect()
}
