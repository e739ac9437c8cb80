//! Download store — short-lived, token-addressed access to reply artifacts.
//!
//! Populated only on the playback fallback branch: when the client never
//! signals `ready_for_playback`, the artifact is moved here and offered as
//! an HTTP URL instead. Handles are single-use and expiry-bound; the file
//! is deleted on first retrieval, on expiry, or by the sweeper.
//!
//! The store owns its own directory under the temp root, so a session
//! being destroyed does not invalidate a download the client is still
//! entitled to fetch.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

/// Directory name for published artifacts under the temp root.
pub const DOWNLOADS_DIR: &str = "downloads";

#[derive(Debug)]
struct DownloadEntry {
    path: PathBuf,
    content_type: &'static str,
    expires_at: Instant,
}

/// A consumed download, ready to serve.
#[derive(Debug)]
pub struct DownloadArtifact {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Token → artifact table with expiry.
pub struct DownloadStore {
    dir: PathBuf,
    ttl: Duration,
    entries: Mutex<HashMap<String, DownloadEntry>>,
}

impl DownloadStore {
    /// Create a store rooted at `dir` (created lazily on first publish).
    #[must_use]
    pub fn new(dir: PathBuf, ttl: Duration) -> Self {
        Self {
            dir,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Take ownership of an artifact file and mint a token for it.
    ///
    /// The file is moved into the store's directory; the caller must stop
    /// accounting for it afterwards.
    pub async fn publish(
        &self,
        artifact_path: &std::path::Path,
        content_type: &'static str,
    ) -> Result<String, std::io::Error> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let token = Uuid::new_v4().simple().to_string();
        let extension = artifact_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let stored = self.dir.join(format!("{token}.{extension}"));
        tokio::fs::rename(artifact_path, &stored).await?;

        let mut entries = self.entries.lock().await;
        entries.insert(
            token.clone(),
            DownloadEntry {
                path: stored,
                content_type,
                expires_at: Instant::now() + self.ttl,
            },
        );

        tracing::info!(token = %token, "reply artifact published for download");
        Ok(token)
    }

    /// Fetch and consume a download. Returns `None` for unknown, expired,
    /// or already-consumed tokens; the backing file is deleted either way.
    pub async fn consume(&self, token: &str) -> Option<DownloadArtifact> {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries.remove(token)?
        };

        let expired = Instant::now() >= entry.expires_at;
        let bytes = if expired {
            None
        } else {
            tokio::fs::read(&entry.path).await.ok()
        };
        let _ = tokio::fs::remove_file(&entry.path).await;

        bytes.map(|bytes| DownloadArtifact {
            bytes,
            content_type: entry.content_type,
        })
    }

    /// Drop expired handles and their files. Returns how many were swept.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<DownloadEntry> = {
            let mut entries = self.entries.lock().await;
            let tokens: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| now >= entry.expires_at)
                .map(|(token, _)| token.clone())
                .collect();
            tokens
                .into_iter()
                .filter_map(|token| entries.remove(&token))
                .collect()
        };

        let count = expired.len();
        for entry in expired {
            let _ = tokio::fs::remove_file(&entry.path).await;
        }
        if count > 0 {
            tracing::debug!(count, "swept expired download handles");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn artifact_file(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("reply-x.wav");
        tokio::fs::write(&path, b"RIFFxxxx").await.unwrap();
        path
    }

    #[tokio::test]
    async fn first_fetch_succeeds_second_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path().join("dl"), Duration::from_secs(60));
        let artifact = artifact_file(dir.path()).await;

        let token = store.publish(&artifact, "audio/wav").await.unwrap();
        assert!(!artifact.exists(), "publish moves the file");

        let fetched = store.consume(&token).await.unwrap();
        assert_eq!(fetched.bytes, b"RIFFxxxx");
        assert_eq!(fetched.content_type, "audio/wav");

        assert!(store.consume(&token).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_is_refused_and_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path().join("dl"), Duration::from_secs(10));
        let artifact = artifact_file(dir.path()).await;

        let token = store.publish(&artifact, "audio/wav").await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(store.consume(&token).await.is_none());
        let mut dl_entries = tokio::fs::read_dir(dir.path().join("dl")).await.unwrap();
        assert!(dl_entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path().join("dl"), Duration::from_secs(10));
        let artifact = artifact_file(dir.path()).await;
        let _token = store.publish(&artifact, "audio/wav").await.unwrap();

        assert_eq!(store.sweep_expired().await, 0);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.sweep_expired().await, 1);
    }

    #[tokio::test]
    async fn unknown_token_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path().join("dl"), Duration::from_secs(10));
        assert!(store.consume("nope").await.is_none());
    }
}
