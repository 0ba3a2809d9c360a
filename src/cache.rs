//! On-disk cache for recompressed images, keyed by a hash of the input bytes
//! and the transform parameters. Entries are written to a temporary name and
//! renamed into place, so concurrent runs never observe a partial entry.

use std::fs;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{CacheError, TransformError};
use crate::hash::Hash32;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct ImageCache {
    root: Utf8PathBuf,
}

impl ImageCache {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Return the cached output for (content, params), invoking `produce`
    /// only on a miss. Any change to the content or the parameters is a new
    /// key. Cache read/write failures degrade to recompression.
    pub fn memoize<F>(&self, content: &[u8], params: &str, produce: F) -> Result<Vec<u8>, TransformError>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>, TransformError>,
    {
        let key = Hash32::hash_parts(&[content, params.as_bytes()]);
        let path = self.root.join(key.to_hex());

        if let Some(hit) = self.lookup(&path) {
            return Ok(hit);
        }

        let output = produce(content)?;
        self.store(&path, &output);

        Ok(output)
    }

    /// Unconditionally evict every entry.
    pub fn clear(&self) -> io::Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }

    fn lookup(&self, path: &Utf8Path) -> Option<Vec<u8>> {
        match fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(source) => {
                let err = CacheError::Unreadable {
                    path: path.to_owned(),
                    source,
                };
                tracing::warn!("{err}");
                None
            }
        }
    }

    fn store(&self, path: &Utf8Path, bytes: &[u8]) {
        if let Err(source) = self.store_atomic(path, bytes) {
            let err = CacheError::Store {
                path: path.to_owned(),
                source,
            };
            tracing::warn!("{err}");
        }
    }

    fn store_atomic(&self, path: &Utf8Path, bytes: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;

        // Unique temp name per write; two writers racing on the same key
        // both rename identical bytes into place.
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp.{}.{seq}", std::process::id()));

        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn cache() -> (tempfile::TempDir, ImageCache) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().join("img")).unwrap();
        (dir, ImageCache::new(root))
    }

    #[test]
    fn second_call_serves_the_cached_result() {
        let (_dir, cache) = cache();
        let calls = AtomicUsize::new(0);

        let compress = |input: &[u8]| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(input.iter().rev().copied().collect())
        };

        let first = cache.memoize(b"raw-image", "jpeg-q85", compress).unwrap();
        let second = cache.memoize(b"raw-image", "jpeg-q85", compress).unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn changed_content_or_params_is_a_miss() {
        let (_dir, cache) = cache();
        let calls = AtomicUsize::new(0);

        let compress = |input: &[u8]| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(input.to_vec())
        };

        cache.memoize(b"raw-image", "jpeg-q85", compress).unwrap();
        cache.memoize(b"other-image", "jpeg-q85", compress).unwrap();
        cache.memoize(b"raw-image", "png-best", compress).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn clear_evicts_every_entry() {
        let (_dir, cache) = cache();
        let calls = AtomicUsize::new(0);

        let compress = |input: &[u8]| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(input.to_vec())
        };

        cache.memoize(b"raw-image", "jpeg-q85", compress).unwrap();
        cache.clear().unwrap();
        cache.memoize(b"raw-image", "jpeg-q85", compress).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn produce_failure_is_not_cached() {
        let (_dir, cache) = cache();

        let err = cache.memoize(b"bad", "jpeg-q85", |_| {
            Err(TransformError::UnknownVariable("boom".into()))
        });
        assert!(err.is_err());

        // the failed attempt must not have left an entry behind
        let ok = cache.memoize(b"bad", "jpeg-q85", |input| Ok(input.to_vec()));
        assert_eq!(ok.unwrap(), b"bad");
    }
}
