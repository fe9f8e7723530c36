//! Account registration and password sign-in.

use crate::errors::{AppError, AppResult};
use crate::remote::{AuthClient, AuthSession, AuthUser, RecordStore};
use crate::session::{FOLDERS_TABLE, USER_NAMES_TABLE};
use log::{error, info};
use serde_json::{json, Value};

pub const MIN_NAME_LEN: usize = 3;

/// Folders every new account starts with, paired with their media type id.
pub const DEFAULT_FOLDERS: [(&str, i64); 4] = [
    ("images", 1),
    ("videos", 2),
    ("audios", 3),
    ("documents", 4),
];

/// Parent id the default folders are created under.
const DEFAULT_PARENT_FOLDER_ID: i64 = 1;

#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// All problems with the form, in display order. Empty means valid.
pub fn validate_registration(form: &RegistrationForm) -> Vec<String> {
    let mut errors = Vec::new();
    if form.name.trim().chars().count() < MIN_NAME_LEN {
        errors.push("The name is too short".to_string());
    }
    if form.password.trim() != form.confirm_password.trim() {
        errors.push("Password and Confirm Password should match".to_string());
    }
    errors
}

fn default_folder_rows(user_id: &str) -> Value {
    let rows: Vec<Value> = DEFAULT_FOLDERS
        .iter()
        .map(|(name, media_type_id)| {
            json!({
                "folder_name": name,
                "parent_folder_id": DEFAULT_PARENT_FOLDER_ID,
                "media_type_id": media_type_id,
                "tag_names": name,
                "user_id": user_id,
            })
        })
        .collect();
    Value::Array(rows)
}

/// Create the account, then its display-name row and default folders.
pub async fn register(
    auth: &dyn AuthClient,
    records: &dyn RecordStore,
    form: &RegistrationForm,
) -> AppResult<AuthUser> {
    let errors = validate_registration(form);
    if !errors.is_empty() {
        return Err(AppError::InvalidInput(errors.join("; ")));
    }

    let name = form.name.trim();
    let user = auth
        .sign_up(form.email.trim(), &form.password, name)
        .await
        .map_err(|e| {
            error!("Sign-up for {} failed: {}", form.email, e);
            e
        })?;

    let (name_res, folders_res) = tokio::join!(
        records.insert(
            USER_NAMES_TABLE,
            json!({ "user_id": user.id, "name": name })
        ),
        records.insert(FOLDERS_TABLE, default_folder_rows(&user.id)),
    );
    if let Err(e) = &name_res {
        error!("Storing display name for {} failed: {}", user.id, e);
    }
    if let Err(e) = &folders_res {
        error!("Creating default folders for {} failed: {}", user.id, e);
    }
    name_res?;
    folders_res?;

    info!("Registered user {}", user.id);
    Ok(user)
}

pub async fn login(auth: &dyn AuthClient, email: &str, password: &str) -> AppResult<AuthSession> {
    let session = auth.sign_in(email.trim(), password).await.map_err(|e| {
        error!("Login for {} failed: {}", email, e);
        e
    })?;
    info!("Logged in as {}", session.user.id);
    Ok(session)
}
