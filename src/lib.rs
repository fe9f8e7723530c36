//! Client core for a personal media library.
//!
//! Folder paths are resolved from flat folder records, uploads pair each file
//! with a generated thumbnail, a per-session cache mirrors the signed-in
//! user's records, and selected blobs can be exported as one ZIP archive.
//! The remote store is reached through the traits in [`remote`]; the
//! [`backend`] module provides a Supabase client and an in-memory stand-in.

pub mod archive;
pub mod auth;
pub mod backend;
pub mod cache;
pub mod config;
pub mod datetime;
pub mod errors;
pub mod file_types;
pub mod folder_paths;
pub mod models;
pub mod remote;
pub mod session;
pub mod thumbnail;
pub mod upload;

#[cfg(test)]
mod test_support;

pub use archive::{ArchiveBundle, ArchiveExporter, DownloadOutcome};
pub use cache::BlobCache;
pub use config::Config;
pub use errors::{AppError, AppResult};
pub use folder_paths::{build_folder_tree, resolve_folder_paths, FolderNode};
pub use session::{SessionBinding, SessionSnapshot, SessionState};
pub use thumbnail::{ThumbnailError, ThumbnailGenerator};
pub use upload::{NewUpload, Replacement, UploadPipeline};
