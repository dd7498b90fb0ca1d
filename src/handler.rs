use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header::RANGE;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::fs::File;

use crate::error::{RangeError, StreamError};
use crate::metadata::{FileMetadataCache, ResourceMetadata};
use crate::response::{self, StreamResponse};
use crate::{range, KnownSize};

/// Path of the streaming endpoint.
pub const STREAM_PATH: &str = "/stream";

/// Query string of `GET /stream`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamQuery {
    /// File name relative to the base directory.
    pub f: Option<String>,
}

/// Resolves stream requests against one base directory.
///
/// Cheap to clone, clones share the metadata cache.
#[derive(Debug, Clone)]
pub struct StreamHandler {
    base_dir: Arc<PathBuf>,
    cache: Arc<FileMetadataCache>,
}

impl StreamHandler {
    /// Fails if `base_dir` does not exist.
    pub fn new(base_dir: impl AsRef<Path>) -> io::Result<Self> {
        Self::with_cache(base_dir, Arc::new(FileMetadataCache::new()))
    }

    pub fn with_cache(base_dir: impl AsRef<Path>, cache: Arc<FileMetadataCache>) -> io::Result<Self> {
        let base_dir = base_dir.as_ref().canonicalize()?;
        Ok(StreamHandler { base_dir: Arc::new(base_dir), cache })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn cache(&self) -> &FileMetadataCache {
        &self.cache
    }

    /// Map a user supplied file name to a canonical path inside the base directory.
    pub async fn resolve(&self, name: &str) -> Result<PathBuf, StreamError> {
        let relative = Path::new(name);

        // only plain names may be joined, no root, prefix or `..`
        let plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !plain {
            return Err(StreamError::PathOutsideBase(name.to_string()));
        }

        let joined = self.base_dir.join(relative);
        let resolved = tokio::fs::canonicalize(&joined)
            .await
            .map_err(|source| StreamError::ResourceNotFound { path: joined, source })?;

        // symlinks may still point elsewhere
        if !resolved.starts_with(self.base_dir.as_path()) {
            return Err(StreamError::PathOutsideBase(name.to_string()));
        }

        Ok(resolved)
    }

    /// Validate the request and build its response.
    ///
    /// Parameter, path, metadata and range checks all complete before the
    /// file is opened, any failure yields a single clean error status.
    pub async fn handle(
        &self,
        query: &StreamQuery,
        headers: &HeaderMap,
    ) -> Result<StreamResponse<KnownSize<File>>, StreamError> {
        let name = query
            .f
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or(StreamError::MissingParameter)?;

        let path = self.resolve(name).await?;
        let metadata = self.metadata(path).await?;
        let size = metadata.size_bytes;

        let ranges = match headers.get(RANGE) {
            None => None,
            Some(value) => {
                let value = value.to_str().map_err(|_| StreamError::Range {
                    source: RangeError::Malformed(String::from_utf8_lossy(value.as_bytes()).into_owned()),
                    size,
                })?;
                let ranges = range::parse(value, size).map_err(|source| StreamError::Range { source, size })?;
                Some(ranges)
            }
        };

        let resource = KnownSize::open(&metadata.path, size)
            .await
            .map_err(|source| StreamError::ResourceUnavailable { path: metadata.path.clone(), source })?;

        tracing::debug!(
            path = %metadata.path.display(),
            size,
            ranges = ranges.as_ref().map_or(0, |r| r.len()),
            "streaming resource"
        );
        Ok(response::stream(resource, ranges, &metadata))
    }

    /// Cached metadata for `path`, the first lookup runs on the blocking pool.
    async fn metadata(&self, path: PathBuf) -> Result<Arc<ResourceMetadata>, StreamError> {
        if let Some(metadata) = self.cache.cached(&path) {
            return Ok(metadata);
        }

        let cache = Arc::clone(&self.cache);
        let lookup_path = path.clone();
        tokio::task::spawn_blocking(move || cache.get(&lookup_path))
            .await
            .map_err(|err| StreamError::ResourceNotFound { path, source: io::Error::other(err) })?
    }
}

/// Router exposing `GET /stream?f=<file>`.
pub fn router(handler: StreamHandler) -> Router {
    Router::new()
        .route(STREAM_PATH, get(stream_file))
        .with_state(handler)
}

async fn stream_file(
    State(handler): State<StreamHandler>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<StreamResponse<KnownSize<File>>, StreamError> {
    handler.handle(&query, &headers).await.inspect_err(|err| {
        tracing::warn!(file = query.f.as_deref().unwrap_or_default(), status = %err.status(), "rejected stream request: {err}");
    })
}
