//! HTTP client for a Supabase project: PostgREST tables and RPC, the Storage
//! API for blobs, and GoTrue for authentication.

use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::models::MediaFile;
use crate::remote::{AuthClient, AuthSession, AuthUser, BlobStore, EqFilter, RecordStore};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::RwLock;

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    bucket: String,
    access_token: RwLock<Option<String>>,
}

#[derive(Deserialize)]
struct SignUpResponse {
    #[serde(default)]
    user: Option<AuthUser>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl SupabaseClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
            bucket: config.bucket.clone(),
            access_token: RwLock::new(None),
        }
    }

    /// Reuse an access token obtained elsewhere (e.g. a persisted session).
    pub fn set_access_token(&self, token: Option<String>) {
        let mut guard = self.access_token.write().unwrap_or_else(|e| e.into_inner());
        *guard = token;
    }

    fn bearer(&self) -> String {
        self.access_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header(AUTHORIZATION, format!("Bearer {}", self.bearer()))
    }

    pub(crate) fn table_url(&self, table: &str, filter: Option<&EqFilter>) -> String {
        let mut url = format!("{}/rest/v1/{}", self.base_url, table);
        if let Some(filter) = filter {
            url.push_str(&format!(
                "?{}=eq.{}",
                filter.column,
                urlencoding::encode(&filter.value_text())
            ));
        }
        url
    }

    fn select_url(&self, table: &str, filter: &EqFilter) -> String {
        format!("{}&select=*", self.table_url(table, Some(filter)))
    }

    pub(crate) fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            encode_object_path(path)
        )
    }

    pub(crate) fn public_object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.bucket,
            encode_object_path(path)
        )
    }

    fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, endpoint)
    }
}

/// Percent-encode the folder segments of a blob path. The final segment is
/// a stored name, which is encoded when it is composed.
fn encode_object_path(path: &str) -> String {
    let path = path.trim_start_matches('/');
    match path.rsplit_once('/') {
        Some((folders, name)) => {
            let mut encoded: Vec<String> = folders
                .split('/')
                .map(|segment| urlencoding::encode(segment).into_owned())
                .collect();
            encoded.push(name.to_string());
            encoded.join("/")
        }
        None => path.to_string(),
    }
}

/// Map a non-2xx response to `AppError::Remote` carrying the body text.
async fn check(response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(AppError::Remote {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl RecordStore for SupabaseClient {
    async fn select(&self, table: &str, filter: &EqFilter) -> AppResult<Vec<Value>> {
        let response = self
            .request(Method::GET, self.select_url(table, filter))
            .send()
            .await?;
        let rows = check(response).await?.json::<Vec<Value>>().await?;
        debug!("Fetched {} rows from {}", rows.len(), table);
        Ok(rows)
    }

    async fn select_single(&self, table: &str, filter: &EqFilter) -> AppResult<Value> {
        let response = self
            .request(Method::GET, self.select_url(table, filter))
            .header(ACCEPT, SINGLE_OBJECT)
            .send()
            .await?;
        Ok(check(response).await?.json::<Value>().await?)
    }

    async fn insert(&self, table: &str, rows: Value) -> AppResult<u16> {
        let response = self
            .request(Method::POST, self.table_url(table, None))
            .header("Prefer", "return=minimal")
            .json(&rows)
            .send()
            .await?;
        Ok(check(response).await?.status().as_u16())
    }

    async fn update(&self, table: &str, id: i64, patch: Value) -> AppResult<u16> {
        let response = self
            .request(Method::PATCH, self.table_url(table, Some(&EqFilter::new("id", id))))
            .header("Prefer", "return=minimal")
            .json(&patch)
            .send()
            .await?;
        Ok(check(response).await?.status().as_u16())
    }

    async fn delete(&self, table: &str, id: i64) -> AppResult<u16> {
        let response = self
            .request(Method::DELETE, self.table_url(table, Some(&EqFilter::new("id", id))))
            .send()
            .await?;
        Ok(check(response).await?.status().as_u16())
    }

    async fn rpc(&self, function: &str, args: Value) -> AppResult<Value> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, function);
        let response = self.request(Method::POST, url).json(&args).send().await?;
        Ok(check(response).await?.json::<Value>().await?)
    }
}

#[async_trait]
impl BlobStore for SupabaseClient {
    async fn upload(&self, path: &str, file: &MediaFile) -> AppResult<()> {
        let response = self
            .request(Method::POST, self.object_url(path))
            .header(CONTENT_TYPE, file.content_type.as_str())
            .header("x-upsert", "false")
            .body(file.data.clone())
            .send()
            .await?;
        check(response).await?;
        debug!("Uploaded {} ({} bytes)", path, file.data.len());
        Ok(())
    }

    async fn download(&self, path: &str) -> AppResult<Vec<u8>> {
        let response = self
            .request(Method::GET, self.object_url(path))
            .send()
            .await?;
        let bytes = check(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn remove(&self, path: &str) -> AppResult<()> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, self.bucket);
        let response = self
            .request(Method::DELETE, url)
            .json(&json!({ "prefixes": [path] }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        self.public_object_url(path)
    }
}

#[async_trait]
impl AuthClient for SupabaseClient {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> AppResult<AuthUser> {
        let response = self
            .request(Method::POST, self.auth_url("signup"))
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "display_name": display_name }
            }))
            .send()
            .await?;
        let body: SignUpResponse = check(response).await.map_err(auth_error)?.json().await?;
        match (body.user, body.id) {
            (Some(user), _) => Ok(user),
            (None, Some(id)) => Ok(AuthUser {
                id,
                email: body.email,
            }),
            (None, None) => Err(AppError::Auth("Sign-up returned no user".to_string())),
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        let response = self
            .request(Method::POST, self.auth_url("token?grant_type=password"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let session: AuthSession = check(response).await.map_err(auth_error)?.json().await?;
        self.set_access_token(Some(session.access_token.clone()));
        info!("Signed in as {}", session.user.id);
        Ok(session)
    }

    async fn sign_out(&self) -> AppResult<()> {
        let response = self
            .request(Method::POST, self.auth_url("logout"))
            .send()
            .await?;
        self.set_access_token(None);
        check(response).await?;
        Ok(())
    }
}

/// GoTrue puts a readable reason in `msg`, `error_description` or `message`.
fn auth_error(err: AppError) -> AppError {
    match err {
        AppError::Remote { message, .. } => {
            let readable = serde_json::from_str::<Value>(&message)
                .ok()
                .and_then(|body| {
                    ["msg", "error_description", "message"]
                        .iter()
                        .find_map(|k| body.get(*k).and_then(Value::as_str).map(str::to_string))
                })
                .unwrap_or(message);
            AppError::Auth(readable)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SupabaseClient {
        SupabaseClient::new(&Config {
            supabase_url: "https://demo.supabase.co/".to_string(),
            supabase_anon_key: "anon".to_string(),
            bucket: "media-lib".to_string(),
            ffmpeg_path: "ffmpeg".into(),
            pdftoppm_path: "pdftoppm".into(),
            blob_cache_bytes: 1024,
        })
    }

    #[test]
    fn builds_filtered_table_urls() {
        let c = client();
        assert_eq!(
            c.select_url("media", &EqFilter::new("user_id", "a b")),
            "https://demo.supabase.co/rest/v1/media?user_id=eq.a%20b&select=*"
        );
        assert_eq!(
            c.table_url("folders", Some(&EqFilter::new("id", 7))),
            "https://demo.supabase.co/rest/v1/folders?id=eq.7"
        );
    }

    #[test]
    fn builds_storage_urls() {
        let c = client();
        assert_eq!(
            c.object_url("u1/images/1_cat.png"),
            "https://demo.supabase.co/storage/v1/object/media-lib/u1/images/1_cat.png"
        );
        assert_eq!(
            c.public_url("/u1/thumbNails/images/1_thumbnail.png"),
            "https://demo.supabase.co/storage/v1/object/public/media-lib/u1/thumbNails/images/1_thumbnail.png"
        );
    }

    #[test]
    fn folder_segments_are_encoded_once() {
        let c = client();
        assert_eq!(
            c.object_url("u1/notes #1/drafts?/1_my%20plan.pdf"),
            "https://demo.supabase.co/storage/v1/object/media-lib/u1/notes%20%231/drafts%3F/1_my%20plan.pdf"
        );
        assert_eq!(
            c.public_url("u1/thumbNails/a&b/1_thumbnail.png"),
            "https://demo.supabase.co/storage/v1/object/public/media-lib/u1/thumbNails/a%26b/1_thumbnail.png"
        );
    }

    #[test]
    fn bearer_falls_back_to_anon_key() {
        let c = client();
        assert_eq!(c.bearer(), "anon");
        c.set_access_token(Some("jwt".to_string()));
        assert_eq!(c.bearer(), "jwt");
    }

    #[test]
    fn auth_errors_surface_readable_reason() {
        let err = auth_error(AppError::Remote {
            status: 400,
            message: r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#
                .to_string(),
        });
        assert!(matches!(err, AppError::Auth(msg) if msg == "Invalid login credentials"));
    }
}
