//! Error types for the streaming endpoint.

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::ContentRange;
use axum_extra::TypedHeader;
use thiserror::Error;

/// Failures of the Range header parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("range unit `{0}` is not supported")]
    UnitUnsupported(String),

    #[error("range {start}-{end} is not satisfiable")]
    NotSatisfiable { start: u64, end: u64 },

    #[error("range -{0} is not satisfiable")]
    SuffixNotSatisfiable(u64),

    #[error("malformed range spec `{0}`")]
    Malformed(String),
}

/// Error type for a single stream request.
///
/// Every variant is scoped to the request that produced it and is turned into
/// exactly one status line by [`IntoResponse`].
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("missing file parameter")]
    MissingParameter,

    #[error("path `{0}` resolves outside the base directory")]
    PathOutsideBase(String),

    #[error("resource not found: {}", path.display())]
    ResourceNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to deduce mime type for {}", .0.display())]
    MimeTypeUnknown(PathBuf),

    #[error("resource unavailable: {}", path.display())]
    ResourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{source}")]
    Range {
        #[source]
        source: RangeError,
        size: u64,
    },
}

impl StreamError {
    pub fn status(&self) -> StatusCode {
        match self {
            StreamError::MissingParameter | StreamError::PathOutsideBase(_) => StatusCode::BAD_REQUEST,
            StreamError::ResourceNotFound { .. }
            | StreamError::MimeTypeUnknown(_)
            | StreamError::ResourceUnavailable { .. } => StatusCode::NOT_FOUND,
            StreamError::Range { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
        }
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            StreamError::Range { source, size } => {
                let header = TypedHeader(ContentRange::unsatisfied_bytes(size));
                (status, header, source.to_string()).into_response()
            }
            // file system details stay in the logs
            StreamError::ResourceNotFound { .. }
            | StreamError::MimeTypeUnknown(_)
            | StreamError::ResourceUnavailable { .. } => {
                (status, "File not found.").into_response()
            }
            StreamError::MissingParameter => (status, "Missing file parameter.").into_response(),
            StreamError::PathOutsideBase(_) => (status, "Invalid file parameter.").into_response(),
        }
    }
}
