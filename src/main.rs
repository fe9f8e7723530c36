//! medialib: command-line client for a personal media library.
//!
//! Reads SUPABASE_URL and SUPABASE_ANON_KEY (optionally from `.env`). Commands
//! that need an account sign in with MEDIALIB_EMAIL / MEDIALIB_PASSWORD or the
//! matching flags.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::info;
use medialib_lib::auth::{self, RegistrationForm};
use medialib_lib::backend::SupabaseClient;
use medialib_lib::datetime::{format_date, format_time};
use medialib_lib::file_types;
use medialib_lib::folder_paths::FolderNode;
use medialib_lib::models::MediaFile;
use medialib_lib::{
    build_folder_tree, ArchiveExporter, BlobCache, Config, NewUpload, SessionBinding,
    SessionState, UploadPipeline,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "medialib", about = "Personal media library client")]
struct Cli {
    /// Account email
    #[arg(long, env = "MEDIALIB_EMAIL", global = true)]
    email: Option<String>,
    /// Account password
    #[arg(long, env = "MEDIALIB_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account with the default folders
    Register {
        /// Display name (at least 3 characters)
        name: String,
        /// Password confirmation; defaults to the password itself
        #[arg(long)]
        confirm_password: Option<String>,
    },
    /// Print the folder tree with resolved paths
    Folders,
    /// List media, optionally only one folder's
    Media {
        #[arg(long)]
        folder: Option<i64>,
    },
    /// Upload a file with a generated thumbnail
    Upload {
        file: PathBuf,
        /// Destination folder id
        #[arg(long)]
        folder: i64,
        /// Display name; defaults to the file stem
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a media record (the stored blobs are kept)
    Delete { id: i64 },
    /// Download media by id into one ZIP archive
    Export {
        ids: Vec<i64>,
        /// Directory to write the archive into
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Generate a thumbnail for a local file without uploading it
    Thumbnail {
        file: PathBuf,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

fn print_tree(nodes: &[FolderNode], depth: usize) {
    for node in nodes {
        println!(
            "{}{} [{}] {}",
            "  ".repeat(depth),
            node.folder.folder_name,
            node.folder.id,
            node.folder.folder_path.as_deref().unwrap_or_default()
        );
        print_tree(&node.children, depth + 1);
    }
}

fn credentials(cli: &Cli) -> anyhow::Result<(String, String)> {
    let email = cli
        .email
        .clone()
        .context("No email given. Set MEDIALIB_EMAIL or pass --email")?;
    let password = cli
        .password
        .clone()
        .context("No password given. Set MEDIALIB_PASSWORD or pass --password")?;
    Ok((email, password))
}

async fn open_session(
    client: Arc<SupabaseClient>,
    config: &Config,
    email: &str,
    password: &str,
) -> anyhow::Result<Arc<SessionState>> {
    let auth_session = auth::login(client.as_ref(), email, password).await?;
    let session = Arc::new(SessionState::new(BlobCache::new(config.blob_cache_bytes)));
    session
        .update_state(Some(SessionBinding::from_backend(auth_session.user, client)))
        .await
        .context("Failed to load library")?;
    Ok(session)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Commands::Thumbnail { file, out } = &cli.command {
        let config = Config::from_env().ok();
        let generator = config
            .map(|c| c.thumbnail_generator())
            .unwrap_or_default();
        let source = MediaFile::read(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let thumb = generator.generate_or_placeholder(&source).await?;
        let target = out.join(&thumb.file_name);
        tokio::fs::write(&target, &thumb.data).await?;
        println!("{}", target.display());
        return Ok(());
    }

    let config = Config::from_env().context("Missing Supabase settings")?;
    let client = Arc::new(SupabaseClient::new(&config));
    let (email, password) = credentials(&cli)?;

    if let Commands::Register {
        name,
        confirm_password,
    } = &cli.command
    {
        let form = RegistrationForm {
            name: name.clone(),
            email,
            password: password.clone(),
            confirm_password: confirm_password.clone().unwrap_or(password),
        };
        let user = auth::register(client.as_ref(), client.as_ref(), &form).await?;
        print_json(&user)?;
        return Ok(());
    }

    let session = open_session(client, &config, &email, &password).await?;

    match cli.command {
        Commands::Folders => {
            let snapshot = session.snapshot();
            print_tree(&build_folder_tree(&snapshot.folders), 0);
        }
        Commands::Media { folder } => {
            let snapshot = session.snapshot();
            for media in snapshot
                .media
                .iter()
                .filter(|m| folder.map_or(true, |f| m.folder_id == f))
            {
                println!(
                    "{:>6}  {}  {}  {}  {}",
                    media.id,
                    format_date(&media.created_at),
                    format_time(&media.created_at),
                    media.display_name,
                    snapshot.blob_path(media).unwrap_or_default()
                );
            }
        }
        Commands::Upload {
            file,
            folder,
            name,
            description,
        } => {
            let source = MediaFile::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            if !file_types::is_allowed(&source.content_type) {
                bail!("{} files are not supported", source.content_type);
            }
            let folder_path = session
                .snapshot()
                .folder(folder)
                .and_then(|f| f.folder_path.clone())
                .with_context(|| format!("Unknown folder {}", folder))?;
            let display_name = name.unwrap_or_else(|| {
                file.file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| source.file_name.clone())
            });

            let pipeline = UploadPipeline::new(session.clone(), config.thumbnail_generator());
            let status = pipeline
                .save_new_media(NewUpload {
                    file: source,
                    display_name,
                    description,
                    folder_id: folder,
                    folder_path,
                })
                .await?;
            print_json(&status)?;
        }
        Commands::Delete { id } => {
            let status = session.delete_media(id).await?;
            print_json(&status)?;
        }
        Commands::Export { ids, out } => {
            let snapshot = session.snapshot();
            let mut keys = Vec::with_capacity(ids.len());
            for id in &ids {
                let key = snapshot
                    .media_item(*id)
                    .and_then(|m| snapshot.blob_path(m))
                    .with_context(|| format!("Unknown media {}", id))?;
                keys.push(key);
            }
            let bundle = ArchiveExporter::new(session.clone()).export(&keys).await?;
            for failure in &bundle.failures {
                eprintln!(
                    "skipped {}: {}",
                    failure.key,
                    failure.error.as_deref().unwrap_or("unknown error")
                );
            }
            let path = bundle.write_to(&out).await?;
            println!("{}", path.display());
        }
        Commands::Register { .. } | Commands::Thumbnail { .. } => {}
    }

    session.logout().await?;
    info!("Done");
    Ok(())
}
