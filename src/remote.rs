//! Interfaces of the remote collaborator: a record store with one RPC, a
//! blob store and an auth service.

use crate::errors::{AppError, AppResult};
use crate::models::MediaFile;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-side function joining folders with media type and parent names.
pub const FOLDER_MAPPING_RPC: &str = "folders_media_types_mapping";

/// Equality filter: `column = value`.
#[derive(Debug, Clone, PartialEq)]
pub struct EqFilter {
    pub column: String,
    pub value: Value,
}

impl EqFilter {
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// The value as it appears in a query string (strings unquoted).
    pub fn value_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select(&self, table: &str, filter: &EqFilter) -> AppResult<Vec<Value>>;

    /// Exactly one row is expected; zero or several is a remote error.
    async fn select_single(&self, table: &str, filter: &EqFilter) -> AppResult<Value>;

    /// Insert one row (object) or several (array). Returns the remote status.
    async fn insert(&self, table: &str, rows: Value) -> AppResult<u16>;

    async fn update(&self, table: &str, id: i64, patch: Value) -> AppResult<u16>;

    async fn delete(&self, table: &str, id: i64) -> AppResult<u16>;

    async fn rpc(&self, function: &str, args: Value) -> AppResult<Value>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, file: &MediaFile) -> AppResult<()>;

    async fn download(&self, path: &str) -> AppResult<Vec<u8>>;

    async fn remove(&self, path: &str) -> AppResult<()>;

    fn public_url(&self, path: &str) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub user: AuthUser,
}

#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str, display_name: &str)
        -> AppResult<AuthUser>;

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession>;

    async fn sign_out(&self) -> AppResult<()>;
}

pub(crate) fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> AppResult<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(AppError::from))
        .collect()
}

pub(crate) fn decode_array<T: DeserializeOwned>(value: Value) -> AppResult<Vec<T>> {
    match value {
        Value::Array(rows) => decode_rows(rows),
        Value::Null => Ok(Vec::new()),
        other => Err(AppError::InvalidInput(format!(
            "Expected an array of rows, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_values_render_unquoted() {
        assert_eq!(EqFilter::new("user_id", "abc").value_text(), "abc");
        assert_eq!(EqFilter::new("id", 42).value_text(), "42");
    }

    #[test]
    fn null_rpc_result_is_empty() {
        let rows: Vec<crate::models::Tag> = decode_array(Value::Null).unwrap();
        assert!(rows.is_empty());
        assert!(decode_array::<crate::models::Tag>(json!({"id": 1})).is_err());
    }
}
