//! # media-range
//!
//! Media file streaming over HTTP for [`axum`][1], with `Range` support so
//! players can seek without downloading whole files.
//!
//! A request for `GET /stream?f=<file>` is answered with the whole file (200),
//! one byte window (206), a `multipart/byteranges` body for several windows
//! (206), or 416 when the `Range` header cannot be satisfied. Every check runs
//! before the first byte is written.
//!
//! ```no_run
//! use media_range::StreamHandler;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let handler = StreamHandler::new("./assets")?;
//!     let app = media_range::router(handler);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await
//! }
//! ```
//!
//! The streaming bodies are generic over [`RangeBody`]. Any type implementing
//! both [`AsyncRead`] and [`AsyncSeekStart`] can be used through the
//! [`KnownSize`] adapter.
//!
//! [`AsyncSeekStart`] is a trait defined by this crate which only allows
//! seeking from the start of a file. It is automatically implemented for any
//! type implementing [`AsyncSeek`].
//!
//! [1]: https://docs.rs/axum

pub mod config;
pub mod error;
mod file;
mod handler;
pub mod metadata;
pub mod range;
mod response;
mod stream;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncSeek};

pub use config::ServerConfig;
pub use error::{RangeError, StreamError};
pub use file::KnownSize;
pub use handler::{router, StreamHandler, StreamQuery, STREAM_PATH};
pub use metadata::{FileMetadataCache, ResourceMetadata};
pub use range::{ByteRange, RangeSet};
pub use response::{stream, StreamResponse};
pub use stream::{extract_boundary, MultipartStream, RangedStream};

/// [`AsyncSeek`] narrowed to only allow seeking from start.
pub trait AsyncSeekStart {
    /// Same semantics as [`AsyncSeek::start_seek`], always passing position as the `SeekFrom::Start` variant.
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()>;

    /// Same semantics as [`AsyncSeek::poll_complete`], returning `()` instead of the new stream position.
    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

impl<T: AsyncSeek> AsyncSeekStart for T {
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()> {
        AsyncSeek::start_seek(self, io::SeekFrom::Start(position))
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncSeek::poll_complete(self, cx).map_ok(|_| ())
    }
}

/// An [`AsyncRead`] and [`AsyncSeekStart`] with a fixed known byte size.
pub trait RangeBody: AsyncRead + AsyncSeekStart {
    /// The total size of the underlying file.
    ///
    /// This should not change for the lifetime of the object once queried.
    /// A body that turns out shorter ends its stream with an error.
    fn byte_size(&self) -> u64;
}
