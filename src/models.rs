use serde::{Deserialize, Serialize};

/// One row of the `folders_media_types_mapping` RPC: a folder joined with
/// its media type and parent name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: i64,
    pub folder_name: String,
    pub parent_folder_id: Option<i64>,
    #[serde(default)]
    pub parent_folder_name: Option<String>,
    pub media_type_id: i64,
    #[serde(default)]
    pub media_type_name: Option<String>,
    #[serde(default)]
    pub tag_names: Option<String>,
    pub user_id: String,
    /// Derived by the folder path resolver; never read from the store.
    #[serde(default, skip_deserializing)]
    pub folder_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: i64,
    /// Stored blob key (timestamped, URI-encoded file name).
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub folder_id: i64,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    pub created_at: String,
    pub user_id: String,
}

impl MediaRecord {
    /// Full blob path of this media item inside the bucket.
    pub fn blob_path(&self, folder_path: &str) -> String {
        format!("{}/{}/{}", self.user_id, folder_path, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub user_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaType {
    pub id: i64,
    pub name: String,
    pub user_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UserNameRow {
    pub name: Option<String>,
}

/// Metadata row written for freshly uploaded media.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewMedia {
    pub name: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub folder_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

/// Partial media update; only populated fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

impl MediaPatch {
    pub fn is_empty(&self) -> bool {
        *self == MediaPatch::default()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewFolder {
    pub folder_name: String,
    pub parent_folder_id: Option<i64>,
    pub media_type_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_names: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FolderPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_name: Option<String>,
    /// `Some(None)` moves the folder to the root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_folder_id: Option<Option<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_names: Option<String>,
}

/// An in-memory file: an upload source or a generated thumbnail.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl MediaFile {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Build a file, guessing the content type from its name.
    pub fn from_bytes(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = crate::file_types::guess_content_type(&file_name);
        Self {
            file_name,
            content_type,
            data,
        }
    }

    pub async fn read(path: &std::path::Path) -> std::io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self::from_bytes(file_name, data))
    }

    pub fn size(&self) -> i64 {
        self.data.len() as i64
    }

    /// Everything after the last `.`; the whole name when there is no dot.
    pub fn extension(&self) -> &str {
        self.file_name.rsplit('.').next().unwrap_or_default()
    }
}

/// Status of a successful record mutation, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MutationStatus {
    pub status: u16,
}
