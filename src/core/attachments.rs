//! Uploaded images and files
//!
//! Pasted images get a timestamped name and are placed according to the
//! storage mode. Generic uploads go into a chosen folder under their own
//! (sanitized) name and are sniffed before anything is written.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use super::config::{normalize_extension, AllowedTypes, FileType};
use super::error::{VaultError, VaultResult};
use super::paths::PathResolver;
use super::storage::{ServableReference, StoragePolicy};

/// Prefix of generated image names
pub const PASTED_IMAGE_PREFIX: &str = "Pasted_image_";

/// Content family detected from the leading bytes of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sniffed {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Webp,
    Pdf,
    Text,
    Unknown,
}

/// Identify content from its magic number
pub fn sniff(bytes: &[u8]) -> Sniffed {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
        Sniffed::Png
    } else if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        Sniffed::Jpeg
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Sniffed::Gif
    } else if bytes.starts_with(b"BM") && bytes.len() >= 14 {
        Sniffed::Bmp
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Sniffed::Webp
    } else if bytes.starts_with(b"%PDF-") {
        Sniffed::Pdf
    } else if std::str::from_utf8(bytes).is_ok() && !bytes.contains(&0) {
        Sniffed::Text
    } else {
        Sniffed::Unknown
    }
}

/// Whether the content matches what its extension claims
pub fn verify_content(extension: &str, file_type: FileType, bytes: &[u8]) -> bool {
    let detected = sniff(bytes);
    match file_type {
        FileType::Text => detected == Sniffed::Text,
        FileType::Image => match normalize_extension(extension).as_str() {
            "png" => detected == Sniffed::Png,
            "jpg" | "jpeg" => detected == Sniffed::Jpeg,
            "gif" => detected == Sniffed::Gif,
            "bmp" => detected == Sniffed::Bmp,
            "webp" => detected == Sniffed::Webp,
            // Allowed by configuration but without a known signature
            _ => detected != Sniffed::Text && detected != Sniffed::Pdf,
        },
    }
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(normalize_extension)
        .filter(|ext| !ext.is_empty())
}

/// Reduce an uploaded file name to a safe single component
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// An image stored on behalf of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestedAttachment {
    pub stored_filename: String,
    /// Absolute location written
    pub path: PathBuf,
    pub servable_reference: ServableReference,
    /// Embed to insert into the document, `![[...]]`
    pub markup_fragment: String,
}

/// Stores pasted images according to the storage policy
pub struct AttachmentIngestor<'a> {
    policy: StoragePolicy<'a>,
    allowed: &'a AllowedTypes,
    max_bytes: usize,
}

impl<'a> AttachmentIngestor<'a> {
    pub fn new(policy: StoragePolicy<'a>, allowed: &'a AllowedTypes, max_bytes: usize) -> Self {
        Self {
            policy,
            allowed,
            max_bytes,
        }
    }

    /// Store an uploaded image, named after the current local time.
    ///
    /// Only the extension is checked here; content is not sniffed.
    pub fn ingest(
        &self,
        filename: Option<&str>,
        bytes: &[u8],
        note_path: Option<&str>,
    ) -> VaultResult<IngestedAttachment> {
        self.ingest_at(filename, bytes, note_path, Local::now())
    }

    /// Store an uploaded image with an explicit timestamp.
    ///
    /// Names have second granularity; two uploads with the same extension in
    /// the same second land on the same file and the later one wins.
    pub fn ingest_at(
        &self,
        filename: Option<&str>,
        bytes: &[u8],
        note_path: Option<&str>,
        now: DateTime<Local>,
    ) -> VaultResult<IngestedAttachment> {
        let filename = filename
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or(VaultError::MissingUpload)?;
        if bytes.is_empty() {
            return Err(VaultError::MissingUpload);
        }

        let extension = extension_of(filename)
            .filter(|ext| self.allowed.is_image(ext))
            .ok_or_else(|| VaultError::UnsupportedType(filename.to_string()))?;
        if bytes.len() > self.max_bytes {
            return Err(VaultError::TooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let placement = self.policy.place(note_path)?;
        fs::create_dir_all(&placement.dir).map_err(|e| VaultError::io(&placement.dir, e))?;

        let stored_filename = format!(
            "{PASTED_IMAGE_PREFIX}{}.{extension}",
            now.format("%Y%m%d_%H%M%S")
        );
        let path = placement.dir.join(&stored_filename);
        fs::write(&path, bytes).map_err(|e| VaultError::io(&path, e))?;

        let (markup_fragment, servable_reference) =
            self.policy.reference_for(&placement, &stored_filename);
        tracing::info!("Stored image {} ({} bytes)", path.display(), bytes.len());

        Ok(IngestedAttachment {
            stored_filename,
            path,
            servable_reference,
            markup_fragment,
        })
    }
}

/// A generic file placed into a folder of the vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub filename: String,
    pub relative_path: String,
    pub file_type: FileType,
}

/// Store an uploaded file into `folder`, keeping its (sanitized) name.
///
/// Extension and content are both verified before the file is written; an
/// existing file of the same name is replaced.
pub fn store_file(
    resolver: &PathResolver,
    allowed: &AllowedTypes,
    max_bytes: usize,
    folder: &str,
    filename: Option<&str>,
    bytes: &[u8],
) -> VaultResult<StoredFile> {
    let filename = filename
        .and_then(sanitize_filename)
        .ok_or(VaultError::MissingUpload)?;
    if bytes.is_empty() {
        return Err(VaultError::MissingUpload);
    }

    let extension =
        extension_of(&filename).ok_or_else(|| VaultError::UnsupportedType(filename.clone()))?;
    let file_type = allowed
        .file_type(&extension)
        .ok_or_else(|| VaultError::UnsupportedType(filename.clone()))?;
    if bytes.len() > max_bytes {
        return Err(VaultError::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    if !verify_content(&extension, file_type, bytes) {
        return Err(VaultError::UnsupportedType(format!(
            "{filename}: content does not match extension"
        )));
    }

    let dir = resolver.resolve_write(folder)?;
    fs::create_dir_all(&dir).map_err(|e| VaultError::io(&dir, e))?;
    let path = dir.join(&filename);
    fs::write(&path, bytes).map_err(|e| VaultError::io(&path, e))?;
    tracing::info!("Stored file {}", path.display());

    Ok(StoredFile {
        relative_path: resolver.relative(&path),
        filename,
        file_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ExclusionPolicy, StorageMode};
    use chrono::TimeZone;
    use tempfile::TempDir;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0];

    fn fixture() -> (TempDir, PathResolver, AllowedTypes) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("notes");
        fs::create_dir_all(root.join("proj")).unwrap();
        fs::create_dir_all(root.join("private")).unwrap();
        fs::write(root.join("proj/readme.md"), "# readme").unwrap();
        let resolver =
            PathResolver::new(&root, ExclusionPolicy::new(["private"], Vec::<String>::new()))
                .unwrap();
        let allowed = AllowedTypes::from_lists("png,jpg,jpeg,gif", "txt,csv");
        (tmp, resolver, allowed)
    }

    fn timestamp() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_sniff_signatures() {
        assert_eq!(sniff(PNG), Sniffed::Png);
        assert_eq!(sniff(&[0xff, 0xd8, 0xff, 0xe0]), Sniffed::Jpeg);
        assert_eq!(sniff(b"GIF89a...."), Sniffed::Gif);
        assert_eq!(sniff(b"RIFF\0\0\0\0WEBPVP8 "), Sniffed::Webp);
        assert_eq!(sniff(b"%PDF-1.7"), Sniffed::Pdf);
        assert_eq!(sniff("a,b\n1,2\n".as_bytes()), Sniffed::Text);
        assert_eq!(sniff(&[0x00, 0xff, 0xfe]), Sniffed::Unknown);
    }

    #[test]
    fn test_verify_content_rejects_mismatch() {
        assert!(verify_content("png", FileType::Image, PNG));
        assert!(!verify_content("png", FileType::Image, b"not an image"));
        assert!(!verify_content("jpg", FileType::Image, PNG));
        assert!(verify_content("txt", FileType::Text, b"hello"));
        assert!(!verify_content("txt", FileType::Text, PNG));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("C:\\tmp\\a?.txt").as_deref(), Some("a_.txt"));
        assert_eq!(sanitize_filename(".hidden").as_deref(), Some("hidden"));
        assert_eq!(sanitize_filename("  "), None);
        assert_eq!(sanitize_filename("dir/"), None);
    }

    #[test]
    fn test_round_trip_every_mode() {
        let (tmp, resolver, allowed) = fixture();
        let modes = [
            StorageMode::Root,
            StorageMode::FixedFolder {
                path: tmp.path().join("images"),
            },
            StorageMode::CoLocated,
            StorageMode::Subfolder {
                name: "attatched".to_string(),
            },
        ];

        for mode in &modes {
            let policy = StoragePolicy::new(mode, &resolver);
            let ingestor = AttachmentIngestor::new(policy, &allowed, 1024);
            let stored = ingestor
                .ingest_at(Some("shot.png"), PNG, Some("proj/readme.md"), timestamp())
                .unwrap();

            assert_eq!(stored.stored_filename, "Pasted_image_20240309_140507.png");
            let written = fs::canonicalize(&stored.path).unwrap();
            assert_eq!(
                policy.resolve_for_serving(&stored.servable_reference).unwrap(),
                written,
                "serving {mode:?}"
            );
            let from_markup =
                policy.reference_from_markup(Some("proj/readme.md"), &stored.markup_fragment);
            assert_eq!(from_markup, stored.servable_reference, "markup {mode:?}");
            assert_eq!(policy.resolve_for_serving(&from_markup).unwrap(), written);
        }
    }

    #[test]
    fn test_subfolder_scenario() {
        let (_tmp, resolver, allowed) = fixture();
        let mode = StorageMode::Subfolder {
            name: "attatched".to_string(),
        };
        let ingestor = AttachmentIngestor::new(StoragePolicy::new(&mode, &resolver), &allowed, 1024);
        let stored = ingestor
            .ingest_at(Some("photo.PNG"), PNG, Some("proj/readme.md"), timestamp())
            .unwrap();

        assert_eq!(
            stored.path,
            resolver
                .root()
                .join("proj/attatched/Pasted_image_20240309_140507.png")
        );
        assert_eq!(
            stored.markup_fragment,
            "![[attatched/Pasted_image_20240309_140507.png]]"
        );
        assert_eq!(
            stored.servable_reference.url(),
            "/attachments/proj/attatched/Pasted_image_20240309_140507.png"
        );
    }

    #[test]
    fn test_ingest_rejections() {
        let (_tmp, resolver, allowed) = fixture();
        let mode = StorageMode::Root;
        let ingestor = AttachmentIngestor::new(StoragePolicy::new(&mode, &resolver), &allowed, 8);

        assert!(matches!(
            ingestor.ingest(None, PNG, None),
            Err(VaultError::MissingUpload)
        ));
        assert!(matches!(
            ingestor.ingest(Some("a.png"), &[], None),
            Err(VaultError::MissingUpload)
        ));
        assert!(matches!(
            ingestor.ingest(Some("a.exe"), PNG, None),
            Err(VaultError::UnsupportedType(_))
        ));
        assert!(matches!(
            ingestor.ingest(Some("a.png"), PNG, None),
            Err(VaultError::TooLarge { size: 12, limit: 8 })
        ));
    }

    #[test]
    fn test_ingest_refuses_skipped_note() {
        let (_tmp, resolver, allowed) = fixture();
        let mode = StorageMode::CoLocated;
        let ingestor = AttachmentIngestor::new(StoragePolicy::new(&mode, &resolver), &allowed, 1024);
        assert!(matches!(
            ingestor.ingest(Some("a.png"), PNG, Some("private/x.md")),
            Err(VaultError::SkippedDirectory(_))
        ));
    }

    #[test]
    fn test_store_file() {
        let (_tmp, resolver, allowed) = fixture();
        let stored = store_file(
            &resolver,
            &allowed,
            1024,
            "proj/data",
            Some("../report.csv"),
            b"a,b\n1,2\n",
        )
        .unwrap();
        assert_eq!(stored.relative_path, "proj/data/report.csv");
        assert_eq!(stored.file_type, FileType::Text);
        assert!(resolver.root().join("proj/data/report.csv").is_file());

        assert!(matches!(
            store_file(&resolver, &allowed, 1024, "proj", Some("fake.png"), b"text"),
            Err(VaultError::UnsupportedType(_))
        ));
        assert!(matches!(
            store_file(&resolver, &allowed, 1024, "proj", Some("run.sh"), b"echo"),
            Err(VaultError::UnsupportedType(_))
        ));
        assert!(matches!(
            store_file(&resolver, &allowed, 1024, "../out", Some("a.txt"), b"x"),
            Err(VaultError::PathEscape(_))
        ));
        assert!(!resolver.root().join("proj/fake.png").exists());
    }
}
