//! Fixtures shared by the unit tests.

use crate::backend::MemoryBackend;
use crate::cache::BlobCache;
use crate::remote::AuthUser;
use crate::session::{SessionBinding, SessionState};
use serde_json::json;
use std::sync::Arc;

/// A solid-colour PNG of the given size.
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([30, 120, 200]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageOutputFormat::Png)
        .expect("encode png");
    out.into_inner()
}

/// A memory backend with one user whose session is already bound.
pub(crate) async fn bound_session() -> (Arc<MemoryBackend>, Arc<SessionState>, AuthUser) {
    let backend = Arc::new(MemoryBackend::new());
    let user = backend.add_user("ada@example.com", "hunter22");
    backend.seed_row("user_names", json!({"user_id": user.id, "name": "Ada"}));

    let session = Arc::new(SessionState::new(BlobCache::new(1 << 20)));
    session
        .update_state(Some(SessionBinding::from_backend(user.clone(), backend.clone())))
        .await
        .expect("bind session");
    (backend, session, user)
}

/// `images` and `images/trips` folders, one image in `trips` and its blob.
pub(crate) fn seed_library(backend: &MemoryBackend, user_id: &str) {
    let image_type = backend.seed_row("media_types", json!({"name": "image", "user_id": user_id}));
    let images = backend.seed_row(
        "folders",
        json!({"folder_name": "images", "parent_folder_id": null,
               "media_type_id": image_type, "tag_names": "images", "user_id": user_id}),
    );
    let trips = backend.seed_row(
        "folders",
        json!({"folder_name": "trips", "parent_folder_id": images,
               "media_type_id": image_type, "user_id": user_id}),
    );
    backend.seed_row(
        "media",
        json!({"name": "1_beach.png", "display_name": "beach", "folder_id": trips,
               "thumbnail": "memory://public/thumb.png", "size": 68, "user_id": user_id}),
    );
    backend.put_blob(&format!("{}/images/trips/1_beach.png", user_id), png_bytes(4, 4));
}
