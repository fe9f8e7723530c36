//! Upload pipeline: thumbnail generation, the paired blob upload and the
//! metadata write.
//!
//! A media file and its thumbnail are uploaded concurrently. Metadata is
//! written only after both blobs are stored; if either upload fails the one
//! that succeeded is removed again and nothing is recorded.

use crate::datetime::now_millis;
use crate::errors::{AppError, AppResult};
use crate::models::{MediaFile, MediaPatch, MutationStatus, NewMedia};
use crate::session::{SessionBinding, SessionState};
use crate::thumbnail::ThumbnailGenerator;
use log::{error, info, warn};
use std::sync::Arc;

/// Top-level folder holding every user's thumbnails.
pub const THUMBNAIL_ROOT: &str = "thumbNails";

const UPLOAD_FAILED: &str = "Error uploading media";

/// A file to add to a folder.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub file: MediaFile,
    pub display_name: String,
    pub description: Option<String>,
    pub folder_id: i64,
    /// Resolved path of the destination folder.
    pub folder_path: String,
}

/// New content for an existing media item.
#[derive(Debug, Clone)]
pub struct Replacement {
    pub file: MediaFile,
    pub folder_path: String,
}

/// Where a media file and its thumbnail ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlobs {
    /// Stored key of the media file, used as the record's `name`.
    pub stored_name: String,
    pub media_path: String,
    pub thumbnail_path: String,
    pub thumbnail_url: String,
}

/// `{ms}_{display_name}.{ext}`, percent-encoded as one path segment.
pub fn compose_stored_name(timestamp_ms: i64, display_name: &str, file: &MediaFile) -> String {
    let raw = format!("{}_{}.{}", timestamp_ms, display_name, file.extension());
    urlencoding::encode(&raw).into_owned()
}

pub fn media_blob_path(user_id: &str, folder_path: &str, stored_name: &str) -> String {
    format!("{}/{}/{}", user_id, folder_path, stored_name)
}

pub fn thumbnail_blob_path(user_id: &str, folder_path: &str, thumbnail_name: &str) -> String {
    format!("{}/{}/{}/{}", user_id, THUMBNAIL_ROOT, folder_path, thumbnail_name)
}

pub struct UploadPipeline {
    session: Arc<SessionState>,
    thumbnails: ThumbnailGenerator,
}

impl UploadPipeline {
    pub fn new(session: Arc<SessionState>, thumbnails: ThumbnailGenerator) -> Self {
        Self {
            session,
            thumbnails,
        }
    }

    /// Upload a new file and its thumbnail, then record the media row.
    pub async fn save_new_media(&self, upload: NewUpload) -> AppResult<MutationStatus> {
        let binding = self.session.binding()?;
        let thumbnail = self.thumbnails.generate_or_placeholder(&upload.file).await?;
        let stored = store_pair(
            &binding,
            &upload.display_name,
            &upload.file,
            &upload.folder_path,
            &thumbnail,
        )
        .await?;

        info!(
            "Uploaded {} to {} ({} bytes)",
            upload.display_name,
            stored.media_path,
            upload.file.size()
        );

        self.session
            .insert_media(NewMedia {
                name: stored.stored_name,
                display_name: upload.display_name,
                description: upload.description,
                folder_id: upload.folder_id,
                thumbnail: Some(stored.thumbnail_url),
                size: Some(upload.file.size()),
            })
            .await
    }

    /// Update a media item. With a replacement file the new blobs are
    /// uploaded first and the patch gains the new name, thumbnail and size;
    /// without one this is a metadata-only update.
    pub async fn update_media(
        &self,
        media_id: i64,
        mut patch: MediaPatch,
        replacement: Option<Replacement>,
    ) -> AppResult<MutationStatus> {
        let binding = self.session.binding()?;

        if let Some(replacement) = replacement {
            let display_name = match &patch.display_name {
                Some(name) => name.clone(),
                None => self
                    .session
                    .snapshot()
                    .media_item(media_id)
                    .map(|m| m.display_name.clone())
                    .ok_or_else(|| {
                        AppError::InvalidInput(format!(
                            "media {} has no display name to store under",
                            media_id
                        ))
                    })?,
            };

            let thumbnail = self
                .thumbnails
                .generate_or_placeholder(&replacement.file)
                .await?;
            let stored = store_pair(
                &binding,
                &display_name,
                &replacement.file,
                &replacement.folder_path,
                &thumbnail,
            )
            .await?;

            patch.name = Some(stored.stored_name);
            patch.thumbnail = Some(stored.thumbnail_url);
            patch.size = Some(replacement.file.size());
        }

        self.session.update_media_record(media_id, &patch).await
    }
}

/// Upload a media file and a ready-made thumbnail side by side.
pub async fn upload_media_with_thumbnail(
    session: &SessionState,
    display_name: &str,
    file: &MediaFile,
    folder_path: &str,
    thumbnail: &MediaFile,
) -> AppResult<StoredBlobs> {
    let binding = session.binding()?;
    store_pair(&binding, display_name, file, folder_path, thumbnail).await
}

async fn store_pair(
    binding: &SessionBinding,
    display_name: &str,
    file: &MediaFile,
    folder_path: &str,
    thumbnail: &MediaFile,
) -> AppResult<StoredBlobs> {
    let stored_name = compose_stored_name(now_millis(), display_name, file);
    let media_path = media_blob_path(&binding.user.id, folder_path, &stored_name);
    let thumbnail_path = thumbnail_blob_path(&binding.user.id, folder_path, &thumbnail.file_name);

    let (media_res, thumb_res) = tokio::join!(
        binding.blobs.upload(&media_path, file),
        binding.blobs.upload(&thumbnail_path, thumbnail),
    );

    if media_res.is_err() || thumb_res.is_err() {
        for (path, res) in [(&media_path, &media_res), (&thumbnail_path, &thumb_res)] {
            match res {
                Err(e) => error!("Upload of {} failed: {}", path, e),
                Ok(()) => {
                    if let Err(e) = binding.blobs.remove(path).await {
                        warn!("Could not remove orphaned blob {}: {}", path, e);
                    }
                }
            }
        }
        return Err(AppError::Upload {
            status: 400,
            message: UPLOAD_FAILED.to_string(),
        });
    }

    let thumbnail_url = binding.blobs.public_url(&thumbnail_path);
    Ok(StoredBlobs {
        stored_name,
        media_path,
        thumbnail_path,
        thumbnail_url,
    })
}
