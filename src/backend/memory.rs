//! In-process implementation of the remote collaborator.
//!
//! Tables hold JSON rows, blobs live in a map, and users are kept in a small
//! registry. Every trait call is counted, and failures or latency can be
//! injected per table, RPC or blob path, which makes this backend the test
//! double for the session cache, upload pipeline and archive exporter.

use crate::datetime::now_rfc3339;
use crate::errors::{AppError, AppResult};
use crate::models::MediaFile;
use crate::remote::{
    AuthClient, AuthSession, AuthUser, BlobStore, EqFilter, RecordStore, FOLDER_MAPPING_RPC,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Vec<Value>>,
    next_id: i64,
    blobs: HashMap<String, MediaFile>,
    users: HashMap<String, (String, AuthUser)>,
    current_user: Option<AuthUser>,
    failing_uploads: HashSet<String>,
    failing_downloads: HashSet<String>,
    failing_tables: HashMap<String, u16>,
    select_delays: HashMap<String, Duration>,
    download_delays: HashMap<String, Duration>,
    insert_calls: HashMap<String, usize>,
}

pub struct MemoryBackend {
    inner: Mutex<Inner>,
    calls: AtomicUsize,
    public_base: String,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            calls: AtomicUsize::new(0),
            public_base: "memory://public".to_string(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge the others.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Total number of remote calls made through any trait.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self, table: &str) -> usize {
        self.lock().insert_calls.get(table).copied().unwrap_or(0)
    }

    /// Add a row directly, bypassing call counting. Returns its id.
    pub fn seed_row(&self, table: &str, row: Value) -> i64 {
        let mut inner = self.lock();
        let row = inner.prepare_row(row, None);
        let id = row["id"].as_i64().unwrap_or_default();
        inner.tables.entry(table.to_string()).or_default().push(row);
        id
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn put_blob(&self, path: &str, data: Vec<u8>) {
        let file = MediaFile::from_bytes(path.rsplit('/').next().unwrap_or(path), data);
        self.lock().blobs.insert(path.to_string(), file);
    }

    pub fn blob_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.lock().blobs.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Register a user without going through `sign_up`.
    pub fn add_user(&self, email: &str, password: &str) -> AuthUser {
        let mut inner = self.lock();
        inner.next_id += 1;
        let user = AuthUser {
            id: format!("user-{}", inner.next_id),
            email: Some(email.to_string()),
        };
        inner
            .users
            .insert(email.to_string(), (password.to_string(), user.clone()));
        user
    }

    /// Uploads whose path contains `fragment` fail with status 400.
    pub fn fail_uploads_matching(&self, fragment: &str) {
        self.lock().failing_uploads.insert(fragment.to_string());
    }

    /// Downloads whose path contains `fragment` fail with status 404.
    pub fn fail_downloads_matching(&self, fragment: &str) {
        self.lock().failing_downloads.insert(fragment.to_string());
    }

    /// Every operation on `table` (or the RPC of that name) fails with `status`.
    pub fn fail_table(&self, table: &str, status: u16) {
        self.lock().failing_tables.insert(table.to_string(), status);
    }

    pub fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.failing_uploads.clear();
        inner.failing_downloads.clear();
        inner.failing_tables.clear();
    }

    /// The next select on `table` reads its rows immediately but answers
    /// only after `delay`, like a slow response carrying stale data.
    pub fn delay_next_select(&self, table: &str, delay: Duration) {
        self.lock().select_delays.insert(table.to_string(), delay);
    }

    /// The next download of `path` reads the blob immediately but answers
    /// only after `delay`.
    pub fn delay_next_download(&self, path: &str, delay: Duration) {
        self.lock().download_delays.insert(path.to_string(), delay);
    }
}

impl Inner {
    fn prepare_row(&mut self, row: Value, owner: Option<&AuthUser>) -> Value {
        let mut obj = match row {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        if !obj.contains_key("id") {
            self.next_id += 1;
            obj.insert("id".to_string(), json!(self.next_id));
        }
        if !obj.contains_key("created_at") {
            obj.insert("created_at".to_string(), json!(now_rfc3339()));
        }
        if let Some(user) = owner {
            obj.entry("user_id").or_insert_with(|| json!(user.id));
        }
        Value::Object(obj)
    }

    fn check_table(&self, table: &str) -> AppResult<()> {
        match self.failing_tables.get(table) {
            Some(status) => Err(AppError::Remote {
                status: *status,
                message: format!("injected failure on {}", table),
            }),
            None => Ok(()),
        }
    }

    fn matching(&self, table: &str, filter: &EqFilter) -> Vec<Value> {
        self.tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.get(&filter.column) == Some(&filter.value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn folder_mapping(&self) -> Value {
        let folders = self.tables.get("folders").cloned().unwrap_or_default();
        let media_types = self.tables.get("media_types").cloned().unwrap_or_default();
        let name_of = |rows: &[Value], id: &Value, field: &str| -> Value {
            rows.iter()
                .find(|r| r.get("id") == Some(id))
                .and_then(|r| r.get(field).cloned())
                .unwrap_or(Value::Null)
        };

        let mapped = folders
            .iter()
            .filter(|f| match &self.current_user {
                Some(user) => f.get("user_id").and_then(Value::as_str) == Some(user.id.as_str()),
                None => true,
            })
            .map(|folder| {
                let mut row = folder.clone();
                let parent = folder.get("parent_folder_id").cloned().unwrap_or(Value::Null);
                let media_type = folder.get("media_type_id").cloned().unwrap_or(Value::Null);
                row["parent_folder_name"] = name_of(&folders, &parent, "folder_name");
                row["media_type_name"] = name_of(&media_types, &media_type, "name");
                row
            })
            .collect();
        Value::Array(mapped)
    }
}

fn matches_any(fragments: &HashSet<String>, path: &str) -> bool {
    fragments.iter().any(|f| path.contains(f.as_str()))
}

#[async_trait]
impl RecordStore for MemoryBackend {
    async fn select(&self, table: &str, filter: &EqFilter) -> AppResult<Vec<Value>> {
        self.count();
        let (rows, delay) = {
            let mut inner = self.lock();
            inner.check_table(table)?;
            (inner.matching(table, filter), inner.select_delays.remove(table))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(rows)
    }

    async fn select_single(&self, table: &str, filter: &EqFilter) -> AppResult<Value> {
        let mut rows = self.select(table, filter).await?;
        if rows.len() != 1 {
            return Err(AppError::Remote {
                status: 406,
                message: format!("expected one row in {}, found {}", table, rows.len()),
            });
        }
        Ok(rows.remove(0))
    }

    async fn insert(&self, table: &str, rows: Value) -> AppResult<u16> {
        self.count();
        let mut inner = self.lock();
        *inner.insert_calls.entry(table.to_string()).or_default() += 1;
        inner.check_table(table)?;

        let owner = inner.current_user.clone();
        let rows = match rows {
            Value::Array(rows) => rows,
            row => vec![row],
        };
        let prepared: Vec<Value> = rows
            .into_iter()
            .map(|row| inner.prepare_row(row, owner.as_ref()))
            .collect();
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(prepared);
        Ok(201)
    }

    async fn update(&self, table: &str, id: i64, patch: Value) -> AppResult<u16> {
        self.count();
        let mut inner = self.lock();
        inner.check_table(table)?;
        let Value::Object(patch) = patch else {
            return Err(AppError::InvalidInput("update patch must be an object".to_string()));
        };
        if let Some(row) = inner
            .tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| r["id"] == json!(id)))
        {
            for (key, value) in patch {
                row[key.as_str()] = value;
            }
        }
        Ok(204)
    }

    async fn delete(&self, table: &str, id: i64) -> AppResult<u16> {
        self.count();
        let mut inner = self.lock();
        inner.check_table(table)?;
        if let Some(rows) = inner.tables.get_mut(table) {
            rows.retain(|r| r["id"] != json!(id));
        }
        Ok(204)
    }

    async fn rpc(&self, function: &str, _args: Value) -> AppResult<Value> {
        self.count();
        let inner = self.lock();
        inner.check_table(function)?;
        match function {
            FOLDER_MAPPING_RPC => Ok(inner.folder_mapping()),
            other => Err(AppError::Remote {
                status: 404,
                message: format!("function {} not found", other),
            }),
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBackend {
    async fn upload(&self, path: &str, file: &MediaFile) -> AppResult<()> {
        self.count();
        let mut inner = self.lock();
        if matches_any(&inner.failing_uploads, path) {
            return Err(AppError::Remote {
                status: 400,
                message: format!("injected upload failure for {}", path),
            });
        }
        if inner.blobs.contains_key(path) {
            return Err(AppError::Remote {
                status: 409,
                message: "The resource already exists".to_string(),
            });
        }
        inner.blobs.insert(path.to_string(), file.clone());
        Ok(())
    }

    async fn download(&self, path: &str) -> AppResult<Vec<u8>> {
        self.count();
        let (result, delay) = {
            let mut inner = self.lock();
            let result = if matches_any(&inner.failing_downloads, path) {
                Err(AppError::Remote {
                    status: 404,
                    message: format!("injected download failure for {}", path),
                })
            } else {
                inner
                    .blobs
                    .get(path)
                    .map(|f| f.data.clone())
                    .ok_or_else(|| AppError::Remote {
                        status: 404,
                        message: format!("Object not found: {}", path),
                    })
            };
            (result, inner.download_delays.remove(path))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn remove(&self, path: &str) -> AppResult<()> {
        self.count();
        self.lock().blobs.remove(path);
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base, path)
    }
}

#[async_trait]
impl AuthClient for MemoryBackend {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _display_name: &str,
    ) -> AppResult<AuthUser> {
        self.count();
        if self.lock().users.contains_key(email) {
            return Err(AppError::Auth("User already registered".to_string()));
        }
        Ok(self.add_user(email, password))
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        self.count();
        let mut inner = self.lock();
        let user = match inner.users.get(email) {
            Some((stored, user)) if stored == password => user.clone(),
            _ => return Err(AppError::Auth("Invalid login credentials".to_string())),
        };
        inner.current_user = Some(user.clone());
        Ok(AuthSession {
            access_token: format!("token-{}", user.id),
            user,
        })
    }

    async fn sign_out(&self) -> AppResult<()> {
        self.count();
        self.lock().current_user = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rpc_joins_media_type_and_parent_names() {
        let backend = MemoryBackend::new();
        let image_type = backend.seed_row("media_types", json!({"name": "image", "user_id": "u"}));
        let root = backend.seed_row(
            "folders",
            json!({"folder_name": "images", "parent_folder_id": null,
                   "media_type_id": image_type, "user_id": "u"}),
        );
        backend.seed_row(
            "folders",
            json!({"folder_name": "trips", "parent_folder_id": root,
                   "media_type_id": image_type, "user_id": "u"}),
        );

        let rows = backend.rpc(FOLDER_MAPPING_RPC, json!({})).await.unwrap();
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["parent_folder_name"], "images");
        assert_eq!(rows[1]["media_type_name"], "image");
        assert_eq!(rows[0]["parent_folder_name"], Value::Null);
    }

    #[tokio::test]
    async fn select_single_requires_exactly_one_row() {
        let backend = MemoryBackend::new();
        backend.seed_row("user_names", json!({"user_id": "u", "name": "Ada"}));
        let row = backend
            .select_single("user_names", &EqFilter::new("user_id", "u"))
            .await
            .unwrap();
        assert_eq!(row["name"], "Ada");

        let err = backend
            .select_single("user_names", &EqFilter::new("user_id", "nobody"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Remote { status: 406, .. }));
    }

    #[tokio::test]
    async fn duplicate_blob_paths_conflict() {
        let backend = MemoryBackend::new();
        let file = MediaFile::new("a.png", "image/png", vec![1]);
        backend.upload("u/a.png", &file).await.unwrap();
        let err = backend.upload("u/a.png", &file).await.unwrap_err();
        assert!(matches!(err, AppError::Remote { status: 409, .. }));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn sign_in_checks_password() {
        let backend = MemoryBackend::new();
        backend.add_user("ada@example.com", "hunter22");
        assert!(backend.sign_in("ada@example.com", "wrong").await.is_err());
        let session = backend.sign_in("ada@example.com", "hunter22").await.unwrap();
        assert!(session.user.id.starts_with("user-"));
    }
}
