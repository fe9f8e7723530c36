//! Previews rendered by external tools (FFmpeg for video, Poppler's
//! `pdftoppm` for PDF documents).

use super::{ThumbnailError, ThumbnailResult};
use crate::models::MediaFile;
use log::debug;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

const PNG_MAGIC: &[u8] = b"\x89PNG";

/// Capture one frame `seek_secs` into the video at half its resolution.
pub(super) async fn capture_video_frame(
    ffmpeg: &Path,
    file: &MediaFile,
    seek_secs: u32,
) -> ThumbnailResult<Vec<u8>> {
    let scratch = tempfile::tempdir()?;
    let input = scratch.path().join(format!("source.{}", file.extension()));
    tokio::fs::write(&input, &file.data).await?;

    let seek = seek_secs.to_string();
    let output = Command::new(ffmpeg)
        .args(["-v", "error", "-ss", &seek, "-i"])
        .arg(&input)
        .args([
            "-frames:v",
            "1",
            "-vf",
            "scale=trunc(iw/2):trunc(ih/2)",
            "-f",
            "image2pipe",
            "-vcodec",
            "png",
            "pipe:1",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| spawn_error(ffmpeg, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ThumbnailError::Render(format!("FFmpeg failed: {}", stderr.trim())));
    }
    // Seeking past the end exits cleanly without writing a frame.
    if !output.stdout.starts_with(PNG_MAGIC) {
        debug!("FFmpeg produced no frame for {}", file.file_name);
        return Err(ThumbnailError::NoFrame(seek_secs));
    }

    Ok(output.stdout)
}

/// Rasterize page one of a PDF. PDF user space is 72 units per inch, so a
/// render scale maps directly onto a DPI.
pub(super) async fn render_pdf_first_page(
    pdftoppm: &Path,
    file: &MediaFile,
    scale: f32,
) -> ThumbnailResult<Vec<u8>> {
    if !file.data.starts_with(b"%PDF") {
        return Err(ThumbnailError::Decode(format!(
            "{} is not a PDF document",
            file.file_name
        )));
    }

    let scratch = tempfile::tempdir()?;
    let input = scratch.path().join("source.pdf");
    let out_root = scratch.path().join("page");
    tokio::fs::write(&input, &file.data).await?;

    let dpi = ((72.0 * scale).round() as u32).max(1).to_string();
    let output = Command::new(pdftoppm)
        .args(["-f", "1", "-l", "1", "-r", &dpi, "-png", "-singlefile"])
        .arg(&input)
        .arg(&out_root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| spawn_error(pdftoppm, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ThumbnailError::Decode(format!(
            "pdftoppm failed: {}",
            stderr.trim()
        )));
    }

    let png = tokio::fs::read(out_root.with_extension("png")).await?;
    Ok(png)
}

fn spawn_error(tool: &Path, err: std::io::Error) -> ThumbnailError {
    if err.kind() == ErrorKind::NotFound {
        ThumbnailError::ToolMissing(tool.display().to_string())
    } else {
        ThumbnailError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    async fn tool_available(tool: &str) -> bool {
        Command::new(tool)
            .arg(if tool == "ffmpeg" { "-version" } else { "-v" })
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok()
    }

    /// A 64x48 test-pattern clip of `secs` seconds.
    async fn test_clip(secs: u32) -> MediaFile {
        let scratch = tempfile::tempdir().unwrap();
        let out = scratch.path().join("clip.mp4");
        let status = Command::new("ffmpeg")
            .args(["-v", "error", "-f", "lavfi", "-i"])
            .arg(format!("testsrc=size=64x48:rate=10:duration={}", secs))
            .args(["-c:v", "mpeg4", "-y"])
            .arg(&out)
            .status()
            .await
            .unwrap();
        assert!(status.success());
        MediaFile::new("clip.mp4", "video/mp4", std::fs::read(&out).unwrap())
    }

    /// One empty page of 200x100 points, with a correct xref table.
    fn one_page_pdf() -> Vec<u8> {
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 100] /Resources << >> >>",
        ];
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref = pdf.len();
        pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for offset in offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        pdf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref
            )
            .as_bytes(),
        );
        pdf
    }

    fn dimensions(png: &[u8]) -> (u32, u32) {
        image::load_from_memory(png).unwrap().dimensions()
    }

    #[tokio::test]
    async fn video_frame_is_half_resolution() {
        if !tool_available("ffmpeg").await {
            return;
        }
        let clip = test_clip(6).await;
        let png = capture_video_frame(Path::new("ffmpeg"), &clip, 5).await.unwrap();
        assert!(png.starts_with(PNG_MAGIC));
        assert_eq!(dimensions(&png), (32, 24));
    }

    #[tokio::test]
    async fn clip_shorter_than_seek_has_no_frame() {
        if !tool_available("ffmpeg").await {
            return;
        }
        let clip = test_clip(1).await;
        let err = capture_video_frame(Path::new("ffmpeg"), &clip, 5).await.unwrap_err();
        assert!(matches!(err, ThumbnailError::NoFrame(5)));
    }

    #[tokio::test]
    async fn pdf_first_page_renders_at_half_scale() {
        if !tool_available("pdftoppm").await {
            return;
        }
        let pdf = MediaFile::new("doc.pdf", "application/pdf", one_page_pdf());
        let png = render_pdf_first_page(Path::new("pdftoppm"), &pdf, 0.5).await.unwrap();
        assert_eq!(dimensions(&png), (100, 50));
    }
}
