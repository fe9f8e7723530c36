//! Thumbnail generation.
//!
//! Each media kind has its own strategy: images are decoded and shrunk,
//! videos and PDFs are rasterized by an external tool, and everything else
//! gets a labelled placeholder tile. All strategies produce a PNG file whose
//! name starts with a millisecond timestamp.

mod external;
mod placeholder;

use crate::datetime::now_millis;
use crate::file_types::{is_pdf, MediaKind};
use crate::models::MediaFile;
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageOutputFormat};
use log::{debug, warn};
use std::io::Cursor;
use std::path::PathBuf;
use thiserror::Error;

/// Bounding box for image thumbnails.
pub const IMAGE_MAX_SIZE: u32 = 100;
/// Offset into a video where the preview frame is captured.
pub const VIDEO_SEEK_SECS: u32 = 5;
/// Render scale for the first page of a PDF.
pub const PDF_SCALE: f32 = 0.5;
/// Side length of placeholder tiles.
pub const PLACEHOLDER_SIZE: u32 = 200;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("failed to decode source: {0}")]
    Decode(String),

    #[error("failed to render preview: {0}")]
    Render(String),

    #[error("failed to encode thumbnail: {0}")]
    Encode(String),

    #[error("{0} not found")]
    ToolMissing(String),

    #[error("no frame available at {0}s")]
    NoFrame(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ThumbnailResult<T> = Result<T, ThumbnailError>;

#[derive(Debug, Clone)]
pub struct ThumbnailGenerator {
    ffmpeg_path: PathBuf,
    pdftoppm_path: PathBuf,
}

impl Default for ThumbnailGenerator {
    fn default() -> Self {
        Self::new("ffmpeg", "pdftoppm")
    }
}

impl ThumbnailGenerator {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, pdftoppm_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            pdftoppm_path: pdftoppm_path.into(),
        }
    }

    /// Pick the strategy for the file's content type and run it.
    pub async fn generate(&self, file: &MediaFile) -> ThumbnailResult<MediaFile> {
        match MediaKind::from_mime(&file.content_type) {
            MediaKind::Image => self.image_thumbnail(file).await,
            MediaKind::Video => self.video_thumbnail(file).await,
            MediaKind::Document if is_pdf(&file.content_type) => self.pdf_thumbnail(file).await,
            _ => placeholder_thumbnail(&file.content_type),
        }
    }

    /// Like [`generate`](Self::generate), but a failing strategy degrades to
    /// the placeholder instead of failing the caller.
    pub async fn generate_or_placeholder(&self, file: &MediaFile) -> ThumbnailResult<MediaFile> {
        match self.generate(file).await {
            Ok(thumb) => Ok(thumb),
            Err(e) => {
                warn!(
                    "Thumbnail strategy failed for {} ({}): {}. Using placeholder.",
                    file.file_name, file.content_type, e
                );
                placeholder_thumbnail(&file.content_type)
            }
        }
    }

    /// Shrink an image to fit within 100x100, keeping its aspect ratio.
    pub async fn image_thumbnail(&self, file: &MediaFile) -> ThumbnailResult<MediaFile> {
        let data = file.data.clone();
        let png = tokio::task::spawn_blocking(move || -> ThumbnailResult<Vec<u8>> {
            let img = image::load_from_memory(&data)
                .map_err(|e| ThumbnailError::Decode(e.to_string()))?;
            let (width, height) = img.dimensions();
            let (w, h) = fit_within(width, height, IMAGE_MAX_SIZE, IMAGE_MAX_SIZE);
            let thumb = if (w, h) == (width, height) {
                img
            } else {
                img.resize_exact(w, h, FilterType::Triangle)
            };
            encode_png(&thumb)
        })
        .await
        .map_err(|e| ThumbnailError::Render(e.to_string()))??;

        debug!("Image thumbnail generated for {}", file.file_name);
        Ok(png_file(png))
    }

    /// Grab the frame at five seconds, scaled to half the source resolution.
    pub async fn video_thumbnail(&self, file: &MediaFile) -> ThumbnailResult<MediaFile> {
        let png = external::capture_video_frame(&self.ffmpeg_path, file, VIDEO_SEEK_SECS).await?;
        debug!("Video thumbnail generated for {}", file.file_name);
        Ok(png_file(png))
    }

    /// Render page one of a PDF at half scale.
    pub async fn pdf_thumbnail(&self, file: &MediaFile) -> ThumbnailResult<MediaFile> {
        let png = external::render_pdf_first_page(&self.pdftoppm_path, file, PDF_SCALE).await?;
        debug!("PDF thumbnail generated for {}", file.file_name);
        Ok(png_file(png))
    }
}

/// Flat 200x200 tile labelled with the file's broad type.
pub fn placeholder_thumbnail(content_type: &str) -> ThumbnailResult<MediaFile> {
    let label = MediaKind::from_mime(content_type).label();
    let tile = placeholder::render_tile(label, PLACEHOLDER_SIZE);
    let png = encode_png(&DynamicImage::ImageRgb8(tile))?;
    Ok(png_file(png))
}

/// Largest size within `max_w` x `max_h` that keeps the aspect ratio.
/// Sources that already fit are left untouched.
pub fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }
    let aspect = width as f64 / height as f64;
    if aspect > 1.0 {
        let h = (max_w as f64 / aspect).round() as u32;
        (max_w, h.max(1))
    } else {
        let w = (max_h as f64 * aspect).round() as u32;
        (w.max(1), max_h)
    }
}

fn encode_png(img: &DynamicImage) -> ThumbnailResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageOutputFormat::Png)
        .map_err(|e| ThumbnailError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

fn png_file(data: Vec<u8>) -> MediaFile {
    MediaFile::new(format!("{}_thumbnail.png", now_millis()), "image/png", data)
}
