use crate::errors::{AppError, AppResult};
use crate::thumbnail::ThumbnailGenerator;
use std::path::PathBuf;

pub const DEFAULT_BUCKET: &str = "media-lib";
pub const DEFAULT_BLOB_CACHE_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub bucket: String,
    pub ffmpeg_path: PathBuf,
    pub pdftoppm_path: PathBuf,
    pub blob_cache_bytes: u64,
}

impl Config {
    /// Load `.env` if present, then read settings from the process environment.
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| AppError::Config(format!("{} is not set", key)))
        };

        let blob_cache_bytes = match get("MEDIALIB_BLOB_CACHE_BYTES") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                AppError::Config(format!("MEDIALIB_BLOB_CACHE_BYTES '{}': {}", raw, e))
            })?,
            None => DEFAULT_BLOB_CACHE_BYTES,
        };

        Ok(Self {
            supabase_url: required("SUPABASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            supabase_anon_key: required("SUPABASE_ANON_KEY")?,
            bucket: get("MEDIALIB_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            ffmpeg_path: get("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            pdftoppm_path: get("PDFTOPPM_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("pdftoppm")),
            blob_cache_bytes,
        })
    }

    pub fn thumbnail_generator(&self) -> ThumbnailGenerator {
        ThumbnailGenerator::new(&self.ffmpeg_path, &self.pdftoppm_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://demo.supabase.co/"),
            ("SUPABASE_ANON_KEY", "anon"),
        ]))
        .unwrap();
        assert_eq!(config.supabase_url, "https://demo.supabase.co");
        assert_eq!(config.bucket, DEFAULT_BUCKET);
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.blob_cache_bytes, DEFAULT_BLOB_CACHE_BYTES);
    }

    #[test]
    fn missing_url_is_a_config_error() {
        let err = Config::from_lookup(lookup(&[("SUPABASE_ANON_KEY", "anon")])).unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("SUPABASE_URL")));
    }

    #[test]
    fn malformed_cache_size_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("SUPABASE_URL", "http://localhost:54321"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("MEDIALIB_BLOB_CACHE_BYTES", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
