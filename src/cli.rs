use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use mdnotes::core::config::AppSettingsUpdate;
use mdnotes::core::file_system::FileBody;
use mdnotes::core::storage::{ServableReference, ATTACHMENT_ROUTE, STORED_ROUTE};
use mdnotes::{SettingsFile, Vault};

#[derive(Parser, Debug)]
#[command(name = "mdnotes")]
#[command(about = "Personal markdown note server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    pub settings: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the sidebar tree
    Tree,

    /// List a folder
    Ls {
        #[arg(default_value = "")]
        folder: String,
    },

    /// List every folder, for pickers
    Folders,

    /// Show a document
    Show {
        path: String,

        /// Print rendered HTML instead of JSON
        #[arg(long)]
        html: bool,
    },

    /// Print an allowed file; images are written to stdout as raw bytes
    View { path: String },

    /// Print the breadcrumb trail for a path
    Crumbs {
        #[arg(default_value = "")]
        path: String,

        /// Replace the label of the last crumb
        #[arg(long)]
        label: Option<String>,
    },

    /// Search documents
    Search { query: String },

    /// Create a document; content is read from stdin unless given
    New {
        title: String,

        #[arg(short, long, default_value = "")]
        folder: String,

        #[arg(short, long)]
        content: Option<String>,
    },

    /// Replace a document's content with stdin
    Edit { path: String },

    /// Delete a document
    #[command(alias = "delete")]
    Rm { path: String },

    /// Store an image for a document
    UploadImage {
        file: PathBuf,

        /// Document the image belongs to
        #[arg(short, long)]
        note: Option<String>,
    },

    /// Store a file into a folder
    Upload {
        file: PathBuf,

        #[arg(short, long, default_value = "")]
        folder: String,
    },

    /// Resolve an attachment URL to the file it serves
    Serve { url: String },

    /// Check whether a directory can hold the notes
    CheckRoot { path: PathBuf },

    /// Switch the notes directory
    SetRoot { path: String },

    /// Set the image storage mode (1 root, 2 fixed folder, 3 next to note, 4 subfolder)
    SetStorage {
        mode: String,

        #[arg(long, default_value = "")]
        path: String,

        #[arg(long, default_value = "")]
        subfolder: String,
    },

    /// Update application settings
    SetApp {
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        hide: String,

        #[arg(long, default_value = "")]
        skip: String,

        #[arg(long)]
        hide_images: bool,

        #[arg(long, default_value = "jpg,jpeg,png,gif,bmp,webp")]
        images: String,

        #[arg(long, default_value = "txt,csv,json,html,htm,xml,yaml,yml,ini,log,js,css,py,md")]
        files: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_stdin() -> Result<String> {
    let mut content = String::new();
    std::io::stdin()
        .read_to_string(&mut content)
        .context("Failed to read stdin")?;
    Ok(content)
}

/// Parse `/attachments/<path>` or `/stored/<name>` back into a reference
fn parse_servable_url(url: &str) -> Result<ServableReference> {
    let decode = |raw: &str| -> Result<String> {
        let segments = raw
            .split('/')
            .map(|segment| urlencoding::decode(segment).map(|s| s.into_owned()))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Invalid URL encoding: {raw}"))?;
        Ok(segments.join("/"))
    };

    if let Some(rest) = url.strip_prefix(ATTACHMENT_ROUTE).and_then(|r| r.strip_prefix('/')) {
        Ok(ServableReference::Attached(decode(rest)?))
    } else if let Some(rest) = url.strip_prefix(STORED_ROUTE).and_then(|r| r.strip_prefix('/')) {
        Ok(ServableReference::Stored(decode(rest)?))
    } else {
        bail!("Not an attachment URL: {url}")
    }
}

fn read_upload(file: &Path) -> Result<(Option<String>, Vec<u8>)> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read file: {}", file.display()))?;
    let name = file.file_name().map(|n| n.to_string_lossy().to_string());
    Ok((name, bytes))
}

pub fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.settings {
        Some(path) => SettingsFile::open(path)?,
        None => SettingsFile::open_default()?,
    };
    let vault = Vault::new(settings);
    let edits_settings = matches!(
        cli.command,
        Commands::CheckRoot { .. }
            | Commands::SetRoot { .. }
            | Commands::SetStorage { .. }
            | Commands::SetApp { .. }
    );
    if edits_settings {
        vault.ensure_defaults()?;
    } else {
        vault.init()?;
    }

    match cli.command {
        Commands::Tree => print_json(&vault.tree()?),
        Commands::Ls { folder } => print_json(&vault.folder(&folder)?),
        Commands::Folders => print_json(&vault.folders()?),
        Commands::Show { path, html } => {
            let note = vault.note(&path)?;
            if html {
                println!("{}", note.html);
                Ok(())
            } else {
                print_json(&note)
            }
        }
        Commands::View { path } => match vault.file(&path)?.body {
            FileBody::Text(text) => {
                print!("{text}");
                Ok(())
            }
            FileBody::Bytes(bytes) => {
                let mut stdout = std::io::stdout().lock();
                stdout
                    .write_all(&bytes)
                    .and_then(|_| stdout.flush())
                    .context("Failed to write file to stdout")
            }
        },
        Commands::Crumbs { path, label } => {
            print_json(&vault.breadcrumbs(&path, label.as_deref()))
        }
        Commands::Search { query } => print_json(&vault.search(&query)?),
        Commands::New {
            title,
            folder,
            content,
        } => {
            let content = match content {
                Some(content) => content,
                None => read_stdin()?,
            };
            print_json(&vault.create_note(&folder, &title, &content)?)
        }
        Commands::Edit { path } => print_json(&vault.save_note(&path, read_stdin()?)?),
        Commands::Rm { path } => {
            let removed = vault.delete_note(&path)?;
            println!("Deleted {}", removed.display());
            Ok(())
        }
        Commands::UploadImage { file, note } => {
            let (name, bytes) = read_upload(&file)?;
            print_json(&vault.upload_image(name.as_deref(), &bytes, note.as_deref())?)
        }
        Commands::Upload { file, folder } => {
            let (name, bytes) = read_upload(&file)?;
            print_json(&vault.upload_file(&folder, name.as_deref(), &bytes)?)
        }
        Commands::Serve { url } => {
            let path = vault.serve(&parse_servable_url(&url)?)?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::CheckRoot { path } => print_json(&vault.check_root(&path)?),
        Commands::SetRoot { path } => {
            let root = vault.set_notes_dir(&path)?;
            println!("{}", root.display());
            Ok(())
        }
        Commands::SetStorage {
            mode,
            path,
            subfolder,
        } => print_json(&vault.set_storage(&mode, &path, &subfolder)?),
        Commands::SetApp {
            name,
            hide,
            skip,
            hide_images,
            images,
            files,
        } => {
            vault.update_app_settings(&AppSettingsUpdate {
                app_name: name,
                hide_sidepane: hide,
                skip_folders: skip,
                hide_images,
                allowed_image_extensions: images,
                allowed_file_extensions: files,
            })?;
            Ok(())
        }
    }
}
