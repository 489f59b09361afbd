// src/cache.rs
//! On-disk image cache. Files are named by the SHA-256 of their URL and
//! expire by modification time.

use metrics::counter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;

use crate::http::Downloader;
use crate::messaging::MediaSource;

const EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub enabled: bool,
    pub total_files: usize,
    pub total_size_mb: f64,
    pub cache_dir: String,
    pub cache_duration_hours: f64,
}

pub struct ImageCache {
    dir: PathBuf,
    ttl: Duration,
    enabled: bool,
    downloader: Arc<dyn Downloader>,
}

fn cache_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Content type first, then the URL path suffix, else `.jpg`.
fn extension_for(content_type: Option<&str>, url: &str) -> &'static str {
    let ct = content_type.unwrap_or_default().to_ascii_lowercase();
    if ct.contains("jpeg") || ct.contains("jpg") {
        return ".jpg";
    }
    for (needle, ext) in [("png", ".png"), ("gif", ".gif"), ("webp", ".webp")] {
        if ct.contains(needle) {
            return ext;
        }
    }
    let path = url.split(['?', '#']).next().unwrap_or_default().to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|ext| path.ends_with(*ext))
        .copied()
        .unwrap_or(".jpg")
}

async fn age_of(path: &Path, now: SystemTime) -> Option<Duration> {
    let meta = fs::metadata(path).await.ok()?;
    if !meta.is_file() {
        return None;
    }
    let modified = meta.modified().ok()?;
    Some(now.duration_since(modified).unwrap_or_default())
}

impl ImageCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration, enabled: bool, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            enabled,
            downloader,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local copy of `url` when one is cached or can be downloaded; the
    /// original URL on any failure or when caching is off.
    pub async fn get_cached_image(&self, url: &str) -> MediaSource {
        if !self.enabled || url.trim().is_empty() {
            return MediaSource::Url(url.to_string());
        }
        let key = cache_key(url);
        let now = SystemTime::now();
        for ext in EXTENSIONS {
            let path = self.dir.join(format!("{key}{ext}"));
            if age_of(&path, now).await.is_some_and(|age| age < self.ttl) {
                tracing::debug!(url = %url, path = %path.display(), "image cache hit");
                counter!("cache_hits_total").increment(1);
                return MediaSource::LocalFile(path);
            }
        }
        match self.download(url, &key).await {
            Ok(path) => MediaSource::LocalFile(path),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "image not cached, sending by URL");
                MediaSource::Url(url.to_string())
            }
        }
    }

    async fn download(&self, url: &str, key: &str) -> anyhow::Result<PathBuf> {
        let body = self.downloader.download(url).await?;
        let ext = extension_for(body.content_type.as_deref(), url);
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{key}{ext}"));
        let tmp = self.dir.join(format!("{key}{ext}.tmp"));
        fs::write(&tmp, &body.bytes).await?;
        fs::rename(&tmp, &path).await?;
        tracing::info!(url = %url, path = %path.display(), "image cached");
        Ok(path)
    }

    /// Remove files older than the TTL. Returns how many were removed.
    pub async fn clear_expired(&self) -> usize {
        self.clear_expired_at(SystemTime::now()).await
    }

    pub async fn clear_expired_at(&self, now: SystemTime) -> usize {
        if !self.enabled {
            return 0;
        }
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(_) => return 0,
        };
        let mut removed = 0usize;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(e)) => e,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "cache cleanup stopped early");
                    break;
                }
            };
            let path = entry.path();
            if age_of(&path, now).await.is_some_and(|age| age > self.ttl) {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "remove cached file"),
                }
            }
        }
        if removed > 0 {
            tracing::info!(removed, "cleared expired cache files");
            counter!("cache_evicted_total").increment(removed as u64);
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            enabled: self.enabled,
            total_files: 0,
            total_size_mb: 0.0,
            cache_dir: self.dir.display().to_string(),
            cache_duration_hours: self.ttl.as_secs_f64() / 3600.0,
        };
        if !self.enabled {
            return stats;
        }
        let Ok(mut entries) = fs::read_dir(&self.dir).await else {
            return stats;
        };
        let mut bytes = 0u64;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(meta) = entry.metadata().await {
                if meta.is_file() {
                    stats.total_files += 1;
                    bytes += meta.len();
                }
            }
        }
        stats.total_size_mb = (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RelayError;
    use crate::http::Download;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeDownloader {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Downloader for FakeDownloader {
        async fn download(&self, url: &str) -> Result<Download, RelayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RelayError::Transient(format!("GET {url}: refused")));
            }
            Ok(Download {
                bytes: vec![1, 2, 3],
                content_type: Some("image/png".into()),
            })
        }
    }

    fn cache(dir: &Path, fail: bool) -> (ImageCache, Arc<FakeDownloader>) {
        let dl = Arc::new(FakeDownloader {
            calls: AtomicUsize::new(0),
            fail,
        });
        (
            ImageCache::new(dir, Duration::from_secs(3600), true, dl.clone()),
            dl,
        )
    }

    #[test]
    fn extension_rules() {
        assert_eq!(extension_for(Some("image/JPEG"), "x"), ".jpg");
        assert_eq!(extension_for(Some("image/webp"), "x.png"), ".webp");
        assert_eq!(extension_for(None, "https://a/b.GIF?x=1"), ".gif");
        assert_eq!(extension_for(Some("application/octet-stream"), "https://a/b"), ".jpg");
        assert_eq!(cache_key("a").len(), 64);
    }

    #[tokio::test]
    async fn download_once_then_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let (c, dl) = cache(tmp.path(), false);
        let url = "https://img.example/a";

        let first = c.get_cached_image(url).await;
        let MediaSource::LocalFile(path) = &first else {
            panic!("expected local file, got {first:?}");
        };
        assert!(path.to_string_lossy().ends_with(".png"));
        assert_eq!(c.get_cached_image(url).await, first);
        assert_eq!(dl.calls.load(Ordering::SeqCst), 1);

        let s = c.stats().await;
        assert_eq!(s.total_files, 1);
        assert!(s.enabled);
        assert_eq!(s.cache_duration_hours, 1.0);
    }

    #[tokio::test]
    async fn failures_and_disabled_fall_back_to_url() {
        let tmp = tempfile::tempdir().unwrap();
        let (c, _) = cache(tmp.path(), true);
        assert_eq!(
            c.get_cached_image("https://img.example/b.jpg").await,
            MediaSource::Url("https://img.example/b.jpg".into())
        );

        let dl = Arc::new(FakeDownloader {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let off = ImageCache::new(tmp.path(), Duration::from_secs(60), false, dl.clone());
        assert_eq!(
            off.get_cached_image("https://img.example/c.jpg").await,
            MediaSource::Url("https://img.example/c.jpg".into())
        );
        assert_eq!(dl.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clear_expired_removes_old_files_only() {
        let tmp = tempfile::tempdir().unwrap();
        let (c, _) = cache(tmp.path(), false);
        c.get_cached_image("https://img.example/a").await;

        assert_eq!(c.clear_expired().await, 0);
        let later = SystemTime::now() + Duration::from_secs(2 * 3600);
        assert_eq!(c.clear_expired_at(later).await, 1);
        assert_eq!(c.stats().await.total_files, 0);
    }
}
