use log::debug;
use moka::future::Cache;
use std::sync::Arc;

/// Downloaded blob bytes keyed by blob path.
///
/// Blob keys carry a millisecond timestamp and are never overwritten, so an
/// entry can never go stale; eviction is purely by size.
#[derive(Clone)]
pub struct BlobCache {
    inner: Cache<String, Arc<Vec<u8>>>,
}

impl BlobCache {
    pub fn new(max_bytes: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|_key: &String, value: &Arc<Vec<u8>>| -> u32 {
                value.len().try_into().unwrap_or(u32::MAX)
            })
            .eviction_listener(|key, _value, cause| {
                debug!("Evicting cached blob {} (cause: {:?})", key, cause);
            })
            .build();

        Self { inner: cache }
    }

    pub async fn get(&self, path: &str) -> Option<Arc<Vec<u8>>> {
        self.inner.get(path).await
    }

    pub async fn insert(&self, path: String, data: Arc<Vec<u8>>) {
        self.inner.insert(path, data).await;
    }

    pub async fn invalidate(&self, path: &str) {
        self.inner.invalidate(path).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}
