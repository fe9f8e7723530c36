//! Media classification and the catalogue of file types the library accepts.

/// One entry of the allowed-upload catalogue.
#[derive(Debug, Clone, Copy)]
pub struct AllowedFileType {
    pub kind: MediaKind,
    pub mime_types: &'static [&'static str],
    pub extensions: &'static str,
    pub display_name: &'static str,
}

pub const ALLOWED_FILE_TYPES: &[AllowedFileType] = &[
    AllowedFileType {
        kind: MediaKind::Image,
        mime_types: &[
            "image/jpeg",
            "image/png",
            "image/gif",
            "image/webp",
            "image/svg+xml",
        ],
        extensions: "JPG, PNG, GIF, WEBP, SVG",
        display_name: "Images",
    },
    AllowedFileType {
        kind: MediaKind::Video,
        mime_types: &["video/mp4", "video/webm", "video/ogg"],
        extensions: "MP4, WEBM, OGV",
        display_name: "Videos",
    },
    AllowedFileType {
        kind: MediaKind::Audio,
        mime_types: &["audio/mpeg", "audio/ogg", "audio/wav", "audio/webm"],
        extensions: "MP3, OGG, WAV, WEBM",
        display_name: "Audio files",
    },
    AllowedFileType {
        kind: MediaKind::Document,
        mime_types: &[
            "application/pdf",
            "application/msword",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "text/plain",
            "application/vnd.ms-excel",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ],
        extensions: "PDF, DOC, DOCX, TXT, XLS, XLSX",
        display_name: "Documents",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Other,
}

impl MediaKind {
    /// Classify by MIME top-level type. `application/*` and `text/*` count as documents.
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            MediaKind::Image
        } else if mime.starts_with("video/") {
            MediaKind::Video
        } else if mime.starts_with("audio/") {
            MediaKind::Audio
        } else if mime.starts_with("application/") || mime.starts_with("text/") {
            MediaKind::Document
        } else {
            MediaKind::Other
        }
    }

    /// Text drawn on placeholder thumbnails.
    pub fn label(self) -> &'static str {
        match self {
            MediaKind::Video => "Video",
            MediaKind::Audio => "Audio",
            MediaKind::Document => "Document",
            MediaKind::Image | MediaKind::Other => "File",
        }
    }
}

pub fn is_pdf(mime: &str) -> bool {
    mime.trim().eq_ignore_ascii_case("application/pdf")
}

/// Whether uploads of this MIME type are accepted.
pub fn is_allowed(mime: &str) -> bool {
    let mime = mime.trim().to_ascii_lowercase();
    ALLOWED_FILE_TYPES
        .iter()
        .any(|t| t.mime_types.contains(&mime.as_str()))
}

pub fn allowed_for(kind: MediaKind) -> Option<&'static AllowedFileType> {
    ALLOWED_FILE_TYPES.iter().find(|t| t.kind == kind)
}

pub fn guess_content_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_top_level_type() {
        assert_eq!(MediaKind::from_mime("image/png"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("audio/mpeg"), MediaKind::Audio);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::Document);
        assert_eq!(MediaKind::from_mime("text/plain"), MediaKind::Document);
        assert_eq!(MediaKind::from_mime("font/woff2"), MediaKind::Other);
    }

    #[test]
    fn placeholder_labels() {
        assert_eq!(MediaKind::Video.label(), "Video");
        assert_eq!(MediaKind::Audio.label(), "Audio");
        assert_eq!(MediaKind::Document.label(), "Document");
        assert_eq!(MediaKind::Other.label(), "File");
    }

    #[test]
    fn allow_list() {
        assert!(is_allowed("image/webp"));
        assert!(is_allowed("APPLICATION/PDF"));
        assert!(!is_allowed("application/zip"));
        assert_eq!(allowed_for(MediaKind::Audio).unwrap().display_name, "Audio files");
        assert!(allowed_for(MediaKind::Other).is_none());
    }

    #[test]
    fn guesses_content_type_from_name() {
        assert_eq!(guess_content_type("cat.png"), "image/png");
        assert_eq!(guess_content_type("report.pdf"), "application/pdf");
        assert_eq!(guess_content_type("blob"), "application/octet-stream");
    }
}
