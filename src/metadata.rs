use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use mime_guess::Mime;

use crate::error::StreamError;

/// Size and type of a servable file, computed once per path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMetadata {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mime_type: Mime,
    pub last_modified: Option<SystemTime>,
}

/// Memoized path → metadata lookups shared by all requests.
///
/// Entries live until [`invalidate`](FileMetadataCache::invalidate) is called,
/// a file that changes size after its first lookup keeps its old size.
/// Two concurrent first lookups of the same path may both hit the filesystem,
/// the second insert overwrites the first with an identical value.
#[derive(Debug, Default)]
pub struct FileMetadataCache {
    entries: DashMap<PathBuf, Arc<ResourceMetadata>>,
}

impl FileMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `path` must already be absolute and sanitized.
    pub fn get(&self, path: &Path) -> Result<Arc<ResourceMetadata>, StreamError> {
        if let Some(metadata) = self.cached(path) {
            return Ok(metadata);
        }

        let metadata = Arc::new(lookup(path)?);
        tracing::debug!(path = %path.display(), size = metadata.size_bytes, mime = %metadata.mime_type, "cached file metadata");
        self.entries.insert(path.to_path_buf(), Arc::clone(&metadata));
        Ok(metadata)
    }

    /// Cached entry for `path`, never touches the filesystem.
    pub fn cached(&self, path: &Path) -> Option<Arc<ResourceMetadata>> {
        self.entries.get(path).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop the cached entry for `path`, the next `get` stats the file again.
    pub fn invalidate(&self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn lookup(path: &Path) -> Result<ResourceMetadata, StreamError> {
    let not_found = |source| StreamError::ResourceNotFound { path: path.to_path_buf(), source };

    let stat = std::fs::metadata(path).map_err(not_found)?;
    if !stat.is_file() {
        return Err(not_found(std::io::Error::other("not a regular file")));
    }

    let mime_type = mime_guess::from_path(path)
        .first()
        .ok_or_else(|| StreamError::MimeTypeUnknown(path.to_path_buf()))?;

    Ok(ResourceMetadata {
        path: path.to_path_buf(),
        size_bytes: stat.len(),
        mime_type,
        last_modified: stat.modified().ok(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use assert_matches::assert_matches;

    use super::FileMetadataCache;
    use crate::error::StreamError;

    #[test]
    fn test_lookup_and_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, vec![0u8; 1000]).unwrap();

        let cache = FileMetadataCache::new();
        let meta = cache.get(&path).unwrap();

        assert_eq!(1000, meta.size_bytes);
        assert_eq!("video/mp4", meta.mime_type.essence_str());
        assert_eq!(path, meta.path);
        assert!(meta.last_modified.is_some());
    }

    #[test]
    fn test_cached_metadata_is_not_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"hello").unwrap();

        let cache = FileMetadataCache::new();
        let first = cache.get(&path).unwrap();

        fs::write(&path, b"hello, world").unwrap();
        let second = cache.get(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(5, second.size_bytes);

        fs::remove_file(&path).unwrap();
        assert_eq!(5, cache.get(&path).unwrap().size_bytes);
        assert_eq!(1, cache.len());
    }

    #[test]
    fn test_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"hello").unwrap();

        let cache = FileMetadataCache::new();
        cache.get(&path).unwrap();
        fs::write(&path, b"hello, world").unwrap();

        assert!(cache.invalidate(&path));
        assert!(cache.is_empty());
        assert!(cache.cached(&path).is_none());
        assert_eq!(12, cache.get(&path).unwrap().size_bytes);
    }

    #[test]
    fn test_lookup_failures() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileMetadataCache::new();

        assert_matches!(cache.get(&dir.path().join("missing.mp4")), Err(StreamError::ResourceNotFound { .. }));
        assert_matches!(cache.get(dir.path()), Err(StreamError::ResourceNotFound { .. }));

        let unknown = dir.path().join("blob.zzzunknown");
        fs::write(&unknown, b"?").unwrap();
        assert_matches!(cache.get(&unknown), Err(StreamError::MimeTypeUnknown(_)));

        // failures are not cached
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_first_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.webm");
        fs::write(&path, vec![1u8; 64]).unwrap();

        let cache = Arc::new(FileMetadataCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let path = path.clone();
                std::thread::spawn(move || cache.get(&path).unwrap().size_bytes)
            })
            .collect();

        for handle in handles {
            assert_eq!(64, handle.join().unwrap());
        }
        assert_eq!(1, cache.len());
    }
}
