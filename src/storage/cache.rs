//! File-based session cache with TTL support.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::PathBuf;

/// Cache entry with timestamp
#[derive(Serialize, Deserialize)]
struct CacheEntry<T> {
    data: T,
    cached_at: DateTime<Utc>,
}

/// Raw session cache keyed by `(race_id, session)`.
pub struct SessionCache {
    base_dir: PathBuf,
    ttl: Duration,
}

impl SessionCache {
    /// Create a new cache with the given base directory and entry lifetime
    pub fn new(base_dir: PathBuf, ttl: Duration) -> Self {
        Self { base_dir, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get cache directory for a session kind
    fn session_dir(&self, session: &str) -> PathBuf {
        self.base_dir.join(sanitize(session))
    }

    /// Get cache file path for a key
    fn cache_path(&self, race_id: &str, session: &str) -> PathBuf {
        self.session_dir(session)
            .join(format!("{}.json", sanitize(race_id)))
    }

    /// Get cached data if present and not expired
    pub fn get<T: DeserializeOwned>(&self, race_id: &str, session: &str) -> Option<T> {
        let path = self.cache_path(race_id, session);

        if !path.exists() {
            return None;
        }

        let content = std::fs::read_to_string(&path).ok()?;
        let entry: CacheEntry<T> = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "dropping unreadable cache entry");
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };

        // Check if expired
        let elapsed = Utc::now() - entry.cached_at;
        if elapsed > self.ttl {
            tracing::debug!(race_id, session, "cache entry expired");
            let _ = std::fs::remove_file(&path);
            return None;
        }

        Some(entry.data)
    }

    /// Set cache data
    pub fn set<T: Serialize>(&self, race_id: &str, session: &str, data: &T) -> Result<()> {
        let dir = self.session_dir(session);
        std::fs::create_dir_all(&dir)?;

        let entry = CacheEntry {
            data,
            cached_at: Utc::now(),
        };

        let path = self.cache_path(race_id, session);
        let content = serde_json::to_string_pretty(&entry)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Drop one entry; returns whether anything was removed.
    pub fn invalidate(&self, race_id: &str, session: &str) -> Result<bool> {
        let path = self.cache_path(race_id, session);
        if path.exists() {
            std::fs::remove_file(&path)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Clear all cache
    pub fn clear(&self) -> Result<()> {
        if self.base_dir.exists() {
            std::fs::remove_dir_all(&self.base_dir)?;
        }
        Ok(())
    }
}

/// Keep keys usable as file names.
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
