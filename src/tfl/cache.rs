//! Content-addressed cache for provider responses. Files are keyed by a
//! hash of the token-free request URL, so a warm rebuild replays the same
//! payloads without touching the network. Writes go to a temp file and
//! are renamed into place; readers only ever see complete entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    url: String,
    fetched_at: String,
    body: Value,
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    root: PathBuf,
}

impl ResponseCache {
    pub fn new(root: impl Into<PathBuf>) -> ResponseCache {
        ResponseCache { root: root.into() }
    }

    fn path_for(&self, url: &str) -> PathBuf {
        self.root
            .join(format!("{:016x}.json", seahash::hash(url.as_bytes())))
    }

    pub async fn get(&self, url: &str) -> Option<Value> {
        let raw = tokio::fs::read_to_string(self.path_for(url)).await.ok()?;
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("discarding unreadable cache entry for {url}: {e}");
                return None;
            }
        };
        // Hash collisions are vanishingly rare but cheap to detect.
        if entry.url != url {
            log::warn!("cache key collision: wanted {url}, file holds {}", entry.url);
            return None;
        }
        Some(entry.body)
    }

    pub async fn put(&self, url: &str, body: &Value) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let entry = CacheEntry {
            url: url.to_string(),
            fetched_at: chrono::Utc::now().to_rfc3339(),
            body: body.clone(),
        };
        let path = self.path_for(url);
        atomic_write_json(&path, &entry).await
    }
}

/// Serialises `value` to `path` via a sibling temp file and rename.
pub async fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let payload = serde_json::to_string_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    atomic_write_bytes(path, payload.as_bytes()).await
}

pub async fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_payload_by_url() {
        let dir = std::env::temp_dir().join(format!("rdv-cache-{}", std::process::id()));
        let cache = ResponseCache::new(&dir);
        let url = "https://api.tfl.gov.uk/Line/victoria/Route/Sequence/inbound";
        let body = serde_json::json!({"lineId": "victoria"});

        assert!(cache.get(url).await.is_none());
        cache.put(url, &body).await.unwrap();
        assert_eq!(cache.get(url).await, Some(body));
        // A different URL maps to a different entry.
        assert!(cache.get("https://api.tfl.gov.uk/other").await.is_none());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
