//! An optional on-disk cache of select responses, keyed by object key and
//! the query text pushed down against it (§6 Non-goals: no caching is
//! required, but a repeated scan of the same partition with the same
//! predicate during one run — common across TPC-H query variants sharing a
//! `lineitem` scan — shouldn't re-fetch across the network).

use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub struct ObjectCache {
    dir: PathBuf,
}

impl ObjectCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, cache_key: &str) -> PathBuf {
        let digest = twox_hash_of(cache_key);
        self.dir.join(format!("{digest:016x}.cache"))
    }

    pub async fn get(&self, cache_key: &str) -> Option<Vec<u8>> {
        let path = self.path_for(cache_key);
        let mut file = tokio::fs::File::open(&path).await.ok()?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.ok()?;
        Some(buf)
    }

    pub async fn put(&self, cache_key: &str, body: &[u8]) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(cache_key);
        let tmp = path.with_extension("cache.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(body).await?;
        file.flush().await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn twox_hash_of(key: &str) -> u64 {
    use std::hash::Hasher;
    let mut h = twox_hash::XxHash64::with_seed(0);
    h.write(key.as_bytes());
    h.finish()
}

/// Combines an object key and the predicate/projection pushed down against
/// it into one cache key, so two scans of the same partition with
/// different push-downs don't collide.
pub fn cache_key(object_key: &str, projection: &[String], predicate_sql: Option<&str>) -> String {
    format!(
        "{object_key}|{}|{}",
        projection.join(","),
        predicate_sql.unwrap_or("")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = std::env::temp_dir().join(format!("qflow-cache-test-{}", uuid::Uuid::new_v4()));
        let cache = ObjectCache::new(&dir);
        cache.put("key-1", b"hello").await.unwrap();
        let read = cache.get("key-1").await;
        assert_eq!(read, Some(b"hello".to_vec()));
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let dir = std::env::temp_dir().join(format!("qflow-cache-test-{}", uuid::Uuid::new_v4()));
        let cache = ObjectCache::new(&dir);
        assert!(cache.get("missing").await.is_none());
    }

    #[test]
    fn cache_key_distinguishes_predicates() {
        let a = cache_key("obj/1", &["a".into()], Some("a > 1"));
        let b = cache_key("obj/1", &["a".into()], Some("a > 2"));
        assert_ne!(a, b);
    }
}
