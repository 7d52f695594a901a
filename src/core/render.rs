//! Markdown to HTML rendering with embedded attachment links rewritten
//!
//! `![[file.png]]` and `![[file.png|alt]]` embeds are turned into standard
//! image syntax before parsing. Every local image destination is then mapped
//! through the storage policy so it points at the URL the file is served from.

use std::borrow::Cow;
use std::sync::OnceLock;

use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag};
use regex_lite::Regex;

use super::storage::StoragePolicy;

/// Rewrites image destinations while rendering
pub trait ImageHook {
    /// New destination for an image, or `None` to keep it
    fn rewrite(&self, dest_url: &str) -> Option<String>;
}

/// Leaves every destination alone
pub struct NoRewrite;

impl ImageHook for NoRewrite {
    fn rewrite(&self, _dest_url: &str) -> Option<String> {
        None
    }
}

/// Points local images of one document at their servable URLs
pub struct AttachmentLinks<'a> {
    policy: StoragePolicy<'a>,
    note_path: Option<&'a str>,
}

impl<'a> AttachmentLinks<'a> {
    pub fn new(policy: StoragePolicy<'a>, note_path: Option<&'a str>) -> Self {
        Self { policy, note_path }
    }
}

fn is_external(dest_url: &str) -> bool {
    dest_url.starts_with('/')
        || dest_url.starts_with('#')
        || dest_url.starts_with("data:")
        || dest_url.contains("://")
}

impl ImageHook for AttachmentLinks<'_> {
    fn rewrite(&self, dest_url: &str) -> Option<String> {
        if dest_url.is_empty() || is_external(dest_url) {
            return None;
        }
        let decoded = urlencoding::decode(dest_url)
            .map(Cow::into_owned)
            .unwrap_or_else(|_| dest_url.to_string());
        Some(
            self.policy
                .reference_from_markup(self.note_path, &decoded)
                .url(),
        )
    }
}

fn embed_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"!\[\[([^\]|]+)(?:\|([^\]]*))?\]\]").ok())
        .as_ref()
}

/// Turn `![[target|alt]]` embeds into `![alt](<target>)`
pub fn expand_embeds(content: &str) -> Cow<'_, str> {
    let Some(re) = embed_pattern() else {
        return Cow::Borrowed(content);
    };
    re.replace_all(content, |caps: &regex_lite::Captures| {
        let target = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        let alt = caps
            .get(2)
            .map(|m| m.as_str().trim())
            .filter(|alt| !alt.is_empty())
            .unwrap_or(target);
        format!("![{alt}](<{target}>)")
    })
}

/// Render a document body to HTML
pub fn render_html(content: &str, hook: &dyn ImageHook) -> String {
    let expanded = expand_embeds(content);

    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(&expanded, options).map(|event| match event {
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => {
            let dest_url = match hook.rewrite(&dest_url) {
                Some(url) => CowStr::from(url),
                None => dest_url,
            };
            Event::Start(Tag::Image {
                link_type,
                dest_url,
                title,
                id,
            })
        }
        other => other,
    });

    let mut out = String::with_capacity(expanded.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}
