//! Per-session state cache.
//!
//! Holds the signed-in user's display name, tags, media types, folders and
//! media. Mutations write through to the record store and then re-read only
//! the slice they touched. Readers get immutable snapshots and can subscribe
//! to a change channel.
//!
//! Every refresh takes a per-slice token before it goes out; a response is
//! applied only if no newer refresh of that slice has been issued since, so a
//! slow, stale answer can never overwrite a fresher one.

use crate::cache::BlobCache;
use crate::errors::{AppError, AppResult};
use crate::folder_paths::resolve_folder_paths;
use crate::models::{
    FolderPatch, FolderRecord, MediaPatch, MediaRecord, MediaType, MutationStatus, NewFolder,
    NewMedia, Tag, UserNameRow,
};
use crate::remote::{
    decode_array, decode_rows, AuthClient, AuthUser, BlobStore, EqFilter, RecordStore,
    FOLDER_MAPPING_RPC,
};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

pub const USER_NAMES_TABLE: &str = "user_names";
pub const MEDIA_TABLE: &str = "media";
pub const MEDIA_TYPES_TABLE: &str = "media_types";
pub const FOLDERS_TABLE: &str = "folders";
pub const TAGS_TABLE: &str = "tags";

/// The authenticated identity plus the remote handles it may use.
pub struct SessionBinding {
    pub user: AuthUser,
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub auth: Arc<dyn AuthClient>,
}

impl SessionBinding {
    pub fn new(
        user: AuthUser,
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        auth: Arc<dyn AuthClient>,
    ) -> Self {
        Self {
            user,
            records,
            blobs,
            auth,
        }
    }

    /// Bind a backend that serves records, blobs and auth at once.
    pub fn from_backend<B>(user: AuthUser, backend: Arc<B>) -> Self
    where
        B: RecordStore + BlobStore + AuthClient + 'static,
    {
        Self {
            user,
            records: backend.clone(),
            blobs: backend.clone(),
            auth: backend,
        }
    }

    fn owner_filter(&self) -> EqFilter {
        EqFilter::new("user_id", self.user.id.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub user_name: Option<String>,
    pub tags: Vec<Tag>,
    pub media_types: Vec<MediaType>,
    pub folders: Vec<FolderRecord>,
    pub media: Vec<MediaRecord>,
}

impl SessionSnapshot {
    pub fn folder(&self, id: i64) -> Option<&FolderRecord> {
        self.folders.iter().find(|f| f.id == id)
    }

    pub fn media_item(&self, id: i64) -> Option<&MediaRecord> {
        self.media.iter().find(|m| m.id == id)
    }

    pub fn media_in_folder(&self, folder_id: i64) -> Vec<&MediaRecord> {
        self.media.iter().filter(|m| m.folder_id == folder_id).collect()
    }

    /// Blob path of a media item, using its folder's resolved path.
    pub fn blob_path(&self, media: &MediaRecord) -> Option<String> {
        let folder_path = self.folder(media.folder_id)?.folder_path.as_deref()?;
        Some(media.blob_path(folder_path))
    }
}

#[derive(Debug, Clone, Copy)]
enum Slice {
    Profile,
    Tags,
    MediaTypes,
    Folders,
    Media,
}

const SLICE_COUNT: usize = 5;

#[derive(Default)]
struct SliceTokens {
    issued: [AtomicU64; SLICE_COUNT],
}

impl SliceTokens {
    fn issue(&self, slice: Slice) -> u64 {
        self.issued[slice as usize].fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_latest(&self, slice: Slice, token: u64) -> bool {
        self.issued[slice as usize].load(Ordering::SeqCst) == token
    }

    fn invalidate_all(&self) {
        for issued in &self.issued {
            issued.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct SessionState {
    binding: RwLock<Option<Arc<SessionBinding>>>,
    state: watch::Sender<Arc<SessionSnapshot>>,
    tokens: SliceTokens,
    cache: BlobCache,
}

impl SessionState {
    pub fn new(cache: BlobCache) -> Self {
        let (state, _) = watch::channel(Arc::new(SessionSnapshot::default()));
        Self {
            binding: RwLock::new(None),
            state,
            tokens: SliceTokens::default(),
            cache,
        }
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.state.borrow().clone()
    }

    /// Change notifications; every applied refresh publishes a new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.state.subscribe()
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.current().map(|b| b.user.clone())
    }

    fn current(&self) -> Option<Arc<SessionBinding>> {
        self.binding
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The live binding, or `PreconditionNotMet` when no one is signed in.
    pub(crate) fn binding(&self) -> AppResult<Arc<SessionBinding>> {
        self.current().ok_or(AppError::PreconditionNotMet)
    }

    /// Replace the bound identity and rebuild all state for it.
    pub async fn update_state(&self, binding: Option<SessionBinding>) -> AppResult<()> {
        let bound = binding.is_some();
        self.rebind(binding.map(Arc::new));
        if bound {
            self.fetch_user_data().await
        } else {
            Ok(())
        }
    }

    fn rebind(&self, binding: Option<Arc<SessionBinding>>) {
        if let Some(b) = &binding {
            info!("Session bound to user {}", b.user.id);
        }
        *self.binding.write().unwrap_or_else(|e| e.into_inner()) = binding;
        self.tokens.invalidate_all();
        self.cache.invalidate_all();
        self.state.send_replace(Arc::new(SessionSnapshot::default()));
    }

    /// Fetch display name, media, media types and folders concurrently.
    /// Any failure discards the whole batch.
    pub async fn fetch_user_data(&self) -> AppResult<()> {
        let binding = self.binding()?;
        let owner = binding.owner_filter();
        let tokens = [
            (Slice::Profile, self.tokens.issue(Slice::Profile)),
            (Slice::Media, self.tokens.issue(Slice::Media)),
            (Slice::MediaTypes, self.tokens.issue(Slice::MediaTypes)),
            (Slice::Folders, self.tokens.issue(Slice::Folders)),
        ];

        let (user_res, media_res, media_type_res, folders_res) = tokio::join!(
            binding.records.select_single(USER_NAMES_TABLE, &owner),
            binding.records.select(MEDIA_TABLE, &owner),
            binding.records.select(MEDIA_TYPES_TABLE, &owner),
            binding.records.rpc(FOLDER_MAPPING_RPC, json!({})),
        );

        if user_res.is_err() || media_res.is_err() || media_type_res.is_err() || folders_res.is_err()
        {
            error!("Error fetching user data");
            for (what, err) in [
                ("user", user_res.as_ref().err()),
                ("media", media_res.as_ref().err()),
                ("media types", media_type_res.as_ref().err()),
                ("folders", folders_res.as_ref().err()),
            ] {
                if let Some(e) = err {
                    error!("  {} fetch failed: {}", what, e);
                }
            }
        }

        let user_name = serde_json::from_value::<UserNameRow>(user_res?)?.name;
        let media: Vec<MediaRecord> = decode_rows(media_res?)?;
        let media_types: Vec<MediaType> = decode_rows(media_type_res?)?;
        let folders = resolve_folder_paths(&decode_array::<FolderRecord>(folders_res?)?);

        self.state.send_if_modified(|snap| {
            let snap = Arc::make_mut(snap);
            let mut changed = false;
            for (slice, token) in tokens {
                if !self.tokens.is_latest(slice, token) {
                    debug!("Discarding stale {:?} slice from initial fetch", slice);
                    continue;
                }
                changed = true;
                match slice {
                    Slice::Profile => snap.user_name = user_name.clone(),
                    Slice::Media => snap.media = media.clone(),
                    Slice::MediaTypes => snap.media_types = media_types.clone(),
                    Slice::Folders => snap.folders = folders.clone(),
                    Slice::Tags => {}
                }
            }
            changed
        });
        Ok(())
    }

    pub async fn refresh_media(&self) -> AppResult<()> {
        let binding = self.binding()?;
        let token = self.tokens.issue(Slice::Media);
        let rows = binding
            .records
            .select(MEDIA_TABLE, &binding.owner_filter())
            .await?;
        let media: Vec<MediaRecord> = decode_rows(rows)?;
        self.apply(Slice::Media, token, |snap| snap.media = media);
        Ok(())
    }

    pub async fn refresh_folders(&self) -> AppResult<()> {
        let binding = self.binding()?;
        let token = self.tokens.issue(Slice::Folders);
        let rows = binding.records.rpc(FOLDER_MAPPING_RPC, json!({})).await?;
        let folders = resolve_folder_paths(&decode_array::<FolderRecord>(rows)?);
        self.apply(Slice::Folders, token, |snap| snap.folders = folders);
        Ok(())
    }

    pub async fn refresh_tags(&self) -> AppResult<()> {
        let binding = self.binding()?;
        let token = self.tokens.issue(Slice::Tags);
        let rows = binding
            .records
            .select(TAGS_TABLE, &binding.owner_filter())
            .await?;
        let tags: Vec<Tag> = decode_rows(rows)?;
        self.apply(Slice::Tags, token, |snap| snap.tags = tags);
        Ok(())
    }

    fn apply(&self, slice: Slice, token: u64, update: impl FnOnce(&mut SessionSnapshot)) -> bool {
        self.state.send_if_modified(|snap| {
            if !self.tokens.is_latest(slice, token) {
                debug!("Discarding stale {:?} refresh (token {})", slice, token);
                return false;
            }
            update(Arc::make_mut(snap));
            true
        })
    }

    async fn refresh_after_write(&self, slice: Slice) {
        let result = match slice {
            Slice::Media => self.refresh_media().await,
            Slice::Folders => self.refresh_folders().await,
            Slice::Tags => self.refresh_tags().await,
            Slice::Profile | Slice::MediaTypes => self.fetch_user_data().await,
        };
        if let Err(e) = result {
            warn!("Refresh of {:?} after write failed: {}", slice, e);
        }
    }

    async fn write(
        &self,
        slice: Slice,
        what: &str,
        op: impl std::future::Future<Output = AppResult<u16>>,
    ) -> AppResult<MutationStatus> {
        match op.await {
            Ok(status) => {
                debug!("{} succeeded with status {}", what, status);
                self.refresh_after_write(slice).await;
                Ok(MutationStatus { status })
            }
            Err(e) => {
                error!("{} failed: {}", what, e);
                Err(e)
            }
        }
    }

    /// Insert a media metadata row owned by the signed-in user.
    pub async fn insert_media(&self, media: NewMedia) -> AppResult<MutationStatus> {
        let binding = self.binding()?;
        let row = owned_row(&media, &binding)?;
        self.write(
            Slice::Media,
            "Insert media",
            binding.records.insert(MEDIA_TABLE, row),
        )
        .await
    }

    /// Metadata-only media update.
    pub async fn update_media_record(
        &self,
        media_id: i64,
        patch: &MediaPatch,
    ) -> AppResult<MutationStatus> {
        let binding = self.binding()?;
        let patch = serde_json::to_value(patch)?;
        self.write(
            Slice::Media,
            "Update media",
            binding.records.update(MEDIA_TABLE, media_id, patch),
        )
        .await
    }

    /// Remove the metadata row only; the blobs stay in the store.
    pub async fn delete_media(&self, media_id: i64) -> AppResult<MutationStatus> {
        let binding = self.binding()?;
        self.write(
            Slice::Media,
            "Delete media",
            binding.records.delete(MEDIA_TABLE, media_id),
        )
        .await
    }

    pub async fn insert_folder(&self, folder: NewFolder) -> AppResult<MutationStatus> {
        let binding = self.binding()?;
        let row = owned_row(&folder, &binding)?;
        self.write(
            Slice::Folders,
            "Insert folder",
            binding.records.insert(FOLDERS_TABLE, row),
        )
        .await
    }

    pub async fn update_folder(
        &self,
        folder_id: i64,
        patch: &FolderPatch,
    ) -> AppResult<MutationStatus> {
        let binding = self.binding()?;
        let patch = serde_json::to_value(patch)?;
        self.write(
            Slice::Folders,
            "Update folder",
            binding.records.update(FOLDERS_TABLE, folder_id, patch),
        )
        .await
    }

    pub async fn delete_folder(&self, folder_id: i64) -> AppResult<MutationStatus> {
        let binding = self.binding()?;
        self.write(
            Slice::Folders,
            "Delete folder",
            binding.records.delete(FOLDERS_TABLE, folder_id),
        )
        .await
    }

    /// Sign out remotely, then drop the binding and all cached state.
    /// Local state is cleared even when the remote sign-out fails.
    pub async fn logout(&self) -> AppResult<()> {
        let binding = self.binding()?;
        let result = binding.auth.sign_out().await;
        if let Err(e) = &result {
            warn!("Remote sign-out failed: {}", e);
        }
        self.rebind(None);
        info!("Logged out user {}", binding.user.id);
        result
    }

    pub fn public_url(&self, path: &str) -> AppResult<String> {
        Ok(self.binding()?.blobs.public_url(path))
    }

    /// Download a blob, serving repeat requests from the blob cache.
    pub async fn download(&self, path: &str) -> AppResult<Arc<Vec<u8>>> {
        let binding = self.binding()?;
        if let Some(hit) = self.cache.get(path).await {
            debug!("Blob cache hit for {}", path);
            return Ok(hit);
        }
        let data = Arc::new(binding.blobs.download(path).await?);
        // A rebind while the download was in flight already cleared the cache.
        if self
            .current()
            .is_some_and(|live| Arc::ptr_eq(&live, &binding))
        {
            self.cache.insert(path.to_string(), data.clone()).await;
        } else {
            debug!("Session changed during download of {}; not caching", path);
        }
        Ok(data)
    }
}

/// Serialize a new row and stamp it with the owner's id.
fn owned_row<T: serde::Serialize>(row: &T, binding: &SessionBinding) -> AppResult<Value> {
    let mut value = serde_json::to_value(row)?;
    if let Value::Object(map) = &mut value {
        map.insert("user_id".to_string(), json!(binding.user.id));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bound_session, seed_library};
    use std::time::Duration;

    #[tokio::test]
    async fn fetches_all_slices_on_bind() {
        let (backend, session, user) = bound_session().await;
        seed_library(&backend, &user.id);
        session.fetch_user_data().await.unwrap();

        let snap = session.snapshot();
        assert_eq!(snap.user_name.as_deref(), Some("Ada"));
        assert_eq!(snap.media_types.len(), 1);
        assert_eq!(snap.media.len(), 1);
        let paths: Vec<_> = snap
            .folders
            .iter()
            .map(|f| f.folder_path.clone().unwrap())
            .collect();
        assert_eq!(paths, vec!["images", "images/trips"]);
        let media = &snap.media[0];
        assert_eq!(
            snap.blob_path(media).unwrap(),
            format!("{}/images/trips/1_beach.png", user.id)
        );
    }

    #[tokio::test]
    async fn any_fetch_failure_discards_the_batch() {
        let (backend, session, user) = bound_session().await;
        seed_library(&backend, &user.id);
        backend.fail_table(FOLDER_MAPPING_RPC, 500);

        let err = session.fetch_user_data().await.unwrap_err();
        assert!(matches!(err, AppError::Remote { status: 500, .. }));
        let snap = session.snapshot();
        assert!(snap.media.is_empty());
        assert!(snap.media_types.is_empty());
    }

    #[tokio::test]
    async fn mutations_without_session_touch_nothing() {
        let (backend, session, _user) = bound_session().await;
        session.logout().await.unwrap();
        let calls = backend.calls();

        let results = [
            session.insert_media(NewMedia::default()).await,
            session.update_media_record(1, &MediaPatch::default()).await,
            session.delete_media(1).await,
            session.insert_folder(NewFolder::default()).await,
            session.update_folder(1, &FolderPatch::default()).await,
            session.delete_folder(1).await,
        ];
        for result in results {
            assert!(matches!(result, Err(AppError::PreconditionNotMet)));
        }
        assert!(matches!(session.refresh_media().await, Err(AppError::PreconditionNotMet)));
        assert!(matches!(session.logout().await, Err(AppError::PreconditionNotMet)));
        assert!(matches!(session.download("x").await, Err(AppError::PreconditionNotMet)));
        assert!(matches!(session.public_url("x"), Err(AppError::PreconditionNotMet)));
        assert_eq!(backend.calls(), calls);
        assert_eq!(backend.insert_calls(MEDIA_TABLE), 0);
        assert_eq!(backend.insert_calls(FOLDERS_TABLE), 0);
    }

    #[tokio::test]
    async fn download_finishing_after_rebind_is_not_cached() {
        let (backend, session, user) = bound_session().await;
        backend.put_blob("u/a.png", vec![1]);
        backend.delay_next_download("u/a.png", Duration::from_millis(150));

        let rebind = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            session
                .update_state(Some(SessionBinding::from_backend(user.clone(), backend.clone())))
                .await
        };
        let (old, rebound) = tokio::join!(session.download("u/a.png"), rebind);
        assert_eq!(*old.unwrap(), vec![1]);
        rebound.unwrap();

        backend.put_blob("u/a.png", vec![2]);
        assert_eq!(*session.download("u/a.png").await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn folder_mutations_refresh_folder_slice() {
        let (backend, session, user) = bound_session().await;
        seed_library(&backend, &user.id);
        session.fetch_user_data().await.unwrap();
        let images = session.snapshot().folders[0].id;

        let status = session
            .insert_folder(NewFolder {
                folder_name: "pets".to_string(),
                parent_folder_id: Some(images),
                media_type_id: 1,
                tag_names: None,
            })
            .await
            .unwrap();
        assert_eq!(status.status, 201);
        let snap = session.snapshot();
        let pets = snap.folders.iter().find(|f| f.folder_name == "pets").unwrap();
        assert_eq!(pets.folder_path.as_deref(), Some("images/pets"));
        assert_eq!(pets.user_id, user.id);

        session
            .update_folder(
                pets.id,
                &FolderPatch {
                    parent_folder_id: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let snap = session.snapshot();
        let pets = snap.folders.iter().find(|f| f.folder_name == "pets").unwrap();
        assert_eq!(pets.folder_path.as_deref(), Some("pets"));

        session.delete_folder(pets.id).await.unwrap();
        assert!(session
            .snapshot()
            .folders
            .iter()
            .all(|f| f.folder_name != "pets"));
    }

    #[tokio::test]
    async fn media_mutations_refresh_media_slice() {
        let (backend, session, user) = bound_session().await;
        seed_library(&backend, &user.id);
        session.fetch_user_data().await.unwrap();
        let mut changes = session.subscribe();
        let _ = changes.borrow_and_update();

        let id = session.snapshot().media[0].id;
        session
            .update_media_record(
                id,
                &MediaPatch {
                    description: Some("sunset".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(changes.has_changed().unwrap());
        assert_eq!(
            session.snapshot().media_item(id).unwrap().description.as_deref(),
            Some("sunset")
        );

        session.delete_media(id).await.unwrap();
        assert!(session.snapshot().media.is_empty());
        // Only the metadata row goes; the blob stays behind.
        assert_eq!(backend.blob_paths().len(), 1);
    }

    #[tokio::test]
    async fn failed_write_surfaces_status_and_skips_refresh() {
        let (backend, session, _user) = bound_session().await;
        backend.fail_table(MEDIA_TABLE, 403);
        let calls_before = backend.calls();

        let err = session.delete_media(9).await.unwrap_err();
        assert!(matches!(err, AppError::Remote { status: 403, .. }));
        assert_eq!(backend.calls(), calls_before + 1);
    }

    #[tokio::test]
    async fn stale_refresh_cannot_overwrite_fresh_one() {
        let (backend, session, user) = bound_session().await;
        backend.delay_next_select(MEDIA_TABLE, Duration::from_millis(150));

        let slow = session.refresh_media();
        let fast = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            backend.seed_row(
                MEDIA_TABLE,
                json!({"name": "2_new.png", "display_name": "new", "folder_id": 1,
                       "user_id": user.id}),
            );
            session.refresh_media().await
        };
        let (slow_res, fast_res) = tokio::join!(slow, fast);
        slow_res.unwrap();
        fast_res.unwrap();

        assert_eq!(session.snapshot().media.len(), 1);
    }

    #[tokio::test]
    async fn downloads_are_cached() {
        let (backend, session, _user) = bound_session().await;
        backend.put_blob("u/a.png", vec![9, 9]);

        assert_eq!(*session.download("u/a.png").await.unwrap(), vec![9, 9]);
        let calls = backend.calls();
        assert_eq!(*session.download("u/a.png").await.unwrap(), vec![9, 9]);
        assert_eq!(backend.calls(), calls);
    }

    #[tokio::test]
    async fn logout_clears_state_and_binding() {
        let (backend, session, user) = bound_session().await;
        seed_library(&backend, &user.id);
        session.fetch_user_data().await.unwrap();

        session.logout().await.unwrap();
        assert!(session.user().is_none());
        assert_eq!(*session.snapshot(), SessionSnapshot::default());
        assert!(matches!(
            session.refresh_media().await,
            Err(AppError::PreconditionNotMet)
        ));
    }

    #[tokio::test]
    async fn tags_refresh_independently() {
        let (backend, session, user) = bound_session().await;
        backend.seed_row(TAGS_TABLE, json!({"name": "summer", "user_id": user.id}));
        backend.seed_row(TAGS_TABLE, json!({"name": "theirs", "user_id": "someone-else"}));

        session.refresh_tags().await.unwrap();
        let snap = session.snapshot();
        assert_eq!(snap.tags.len(), 1);
        assert_eq!(snap.tags[0].name, "summer");
    }
}
