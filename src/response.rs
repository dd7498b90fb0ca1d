use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::headers::{AcceptRanges, ContentLength, ContentRange, ContentType};
use axum_extra::TypedHeader;
use mime_guess::Mime;

use crate::error::{RangeError, StreamError};
use crate::metadata::ResourceMetadata;
use crate::range::{ByteRange, RangeSet};
use crate::stream::{generate_boundary, MultipartStream, RangedStream};
use crate::RangeBody;

/// Computed headers and body for a stream request. Implements [`IntoResponse`].
///
/// The variant is picked before any byte is sent, so a response never mixes
/// framings.
#[derive(Debug)]
pub enum StreamResponse<B> {
    /// No range requested, the whole resource.
    Full {
        content_length: ContentLength,
        content_type: Mime,
        stream: RangedStream<B>,
    },
    /// Exactly one range.
    Single {
        range: ByteRange,
        total_size: u64,
        content_type: Mime,
        stream: RangedStream<B>,
    },
    /// Several ranges framed as `multipart/byteranges`.
    Multiple {
        stream: MultipartStream<B>,
    },
}

impl<B> StreamResponse<B> {
    pub fn status(&self) -> StatusCode {
        match self {
            StreamResponse::Full { .. } => StatusCode::OK,
            StreamResponse::Single { .. } | StreamResponse::Multiple { .. } => StatusCode::PARTIAL_CONTENT,
        }
    }
}

/// Decide how `resource` is sent back for the validated `ranges`.
///
/// `ranges` must have been parsed against `metadata.size_bytes`.
pub fn stream<B: RangeBody + Send + 'static>(
    resource: B,
    ranges: Option<RangeSet>,
    metadata: &ResourceMetadata,
) -> StreamResponse<B> {
    let total_size = metadata.size_bytes;
    let content_type = metadata.mime_type.clone();

    match ranges {
        None => StreamResponse::Full {
            content_length: ContentLength(total_size),
            content_type,
            stream: RangedStream::new(resource, 0, total_size),
        },
        Some(ranges) if ranges.len() == 1 => {
            let range = ranges[0];
            StreamResponse::Single {
                range,
                total_size,
                content_type,
                stream: RangedStream::new(resource, range.start, range.len()),
            }
        }
        Some(ranges) => {
            let stream = MultipartStream::new(
                resource,
                ranges.into_vec(),
                content_type.to_string(),
                generate_boundary(),
            );
            StreamResponse::Multiple { stream }
        }
    }
}

impl<B: RangeBody + Send + 'static> IntoResponse for StreamResponse<B> {
    fn into_response(self) -> Response {
        let status = self.status();
        let accept_ranges = TypedHeader(AcceptRanges::bytes());

        match self {
            StreamResponse::Full { content_length, content_type, stream } => {
                let headers = (
                    accept_ranges,
                    TypedHeader(content_length),
                    TypedHeader(ContentType::from(content_type)),
                );
                (status, headers, stream).into_response()
            }
            StreamResponse::Single { range, total_size, content_type, stream } => {
                let content_range = match ContentRange::bytes(range.start..=range.end, total_size) {
                    Ok(content_range) => content_range,
                    Err(_) => {
                        let source = RangeError::NotSatisfiable { start: range.start, end: range.end };
                        return StreamError::Range { source, size: total_size }.into_response();
                    }
                };
                let headers = (
                    accept_ranges,
                    TypedHeader(content_range),
                    TypedHeader(ContentLength(range.len())),
                    TypedHeader(ContentType::from(content_type)),
                );
                (status, headers, stream).into_response()
            }
            StreamResponse::Multiple { stream } => {
                let content_type = format!("multipart/byteranges; boundary={}", stream.boundary());
                let Ok(content_type) = HeaderValue::try_from(content_type) else {
                    tracing::error!(boundary = stream.boundary(), "boundary is not a valid header value");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                };
                let headers = (
                    accept_ranges,
                    TypedHeader(ContentLength(stream.content_length())),
                    [(CONTENT_TYPE, content_type)],
                );
                (status, headers, stream).into_response()
            }
        }
    }
}
