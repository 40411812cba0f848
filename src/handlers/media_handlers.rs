//! HTTP handlers for the upload/list/read/delete surface.
//!
//! Upload bodies are streamed field-by-field into the store — never
//! buffered whole — and reads are streamed back out chunk by chunk,
//! honoring single-range `Range` requests.

use crate::{errors::AppError, models::entry::CatalogEntry, services::media_store::MediaStore};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use std::io;

/// A parsed single-range `Range` header, before it is resolved against
/// the object size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeSpec {
    /// `bytes=a-b` (inclusive end)
    FromTo(u64, u64),
    /// `bytes=a-`
    From(u64),
    /// `bytes=-n` (final n bytes)
    Suffix(u64),
}

/// POST `/upload` — store the first file field of the multipart body.
pub async fn upload_file(
    State(store): State<MediaStore>,
    mut multipart: Multipart,
) -> Result<Json<CatalogEntry>, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        AppError::new(StatusCode::BAD_REQUEST, format!("multipart error: {err}"))
    })? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);

        let stream = field.map_err(io::Error::other);
        let entry = store
            .upload_stream(&filename, content_type.as_deref(), stream)
            .await?;
        return Ok(Json(entry));
    }

    Err(AppError::new(
        StatusCode::BAD_REQUEST,
        "multipart body contained no file field",
    ))
}

/// GET `/files` — all complete entries as JSON.
pub async fn list_files(
    State(store): State<MediaStore>,
) -> Result<Json<Vec<CatalogEntry>>, AppError> {
    Ok(Json(store.list().await?))
}

/// GET `/read/{filename}` — stream the object back, with single-range
/// partial content support.
pub async fn read_file(
    State(store): State<MediaStore>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let range_spec = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_range_header);

    // A missing (or malformed, per RFC 9110) Range header gets the
    // whole object.
    let Some(spec) = range_spec else {
        let (entry, stream) = store.read(&filename).await?;
        let mut response = Response::new(Body::from_stream(stream));
        let size = entry.size_bytes.max(0) as u64;
        set_entry_headers(response.headers_mut(), &entry, size, None);
        return Ok(response);
    };

    let entry = store.entry(&filename).await?;
    let size = entry.size_bytes.max(0) as u64;
    let Some((offset, length)) = resolve_range(spec, size) else {
        let mut response = AppError::new(
            StatusCode::RANGE_NOT_SATISFIABLE,
            "range cannot be satisfied",
        )
        .into_response();
        response.headers_mut().insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes */{size}"))
                .unwrap_or_else(|_| HeaderValue::from_static("bytes */0")),
        );
        return Ok(response);
    };

    let (entry, stream) = store.read_range(&filename, offset, length).await?;
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::PARTIAL_CONTENT;
    let content_range = format!("bytes {}-{}/{}", offset, offset + length - 1, size);
    set_entry_headers(response.headers_mut(), &entry, length, Some(&content_range));
    Ok(response)
}

/// DELETE `/delete/{filename}` — purge chunks and catalog entry.
/// Unknown keys are 404.
pub async fn delete_file(
    State(store): State<MediaStore>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    store.delete(&filename).await?;
    Ok(StatusCode::OK)
}

fn set_entry_headers(
    headers: &mut HeaderMap,
    entry: &CatalogEntry,
    content_length: u64,
    content_range: Option<&str>,
) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(entry.content_type_or_default())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&content_length.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if let Some(etag) = entry.etag.as_deref() {
        let quoted = format!("\"{etag}\"");
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }
    if let Some(range) = content_range {
        if let Ok(value) = HeaderValue::from_str(range) {
            headers.insert(header::CONTENT_RANGE, value);
        }
    }
}

/// Parse a single-range `Range` header value. Multi-range requests are
/// not supported and are treated as absent.
fn parse_range_header(value: &str) -> Option<RangeSpec> {
    let spec = value.strip_prefix("bytes=")?.trim();
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    match (start, end) {
        ("", suffix) => suffix.parse().ok().map(RangeSpec::Suffix),
        (start, "") => start.parse().ok().map(RangeSpec::From),
        (start, end) => {
            let start: u64 = start.parse().ok()?;
            let end: u64 = end.parse().ok()?;
            (start <= end).then_some(RangeSpec::FromTo(start, end))
        }
    }
}

/// Resolve a parsed range against the object size into (offset, length),
/// or None when the range cannot be satisfied.
fn resolve_range(spec: RangeSpec, size: u64) -> Option<(u64, u64)> {
    match spec {
        RangeSpec::FromTo(start, end) => {
            if start >= size {
                return None;
            }
            Some((start, end.min(size - 1) - start + 1))
        }
        RangeSpec::From(start) => {
            if start >= size {
                return None;
            }
            Some((start, size - start))
        }
        RangeSpec::Suffix(n) => {
            if n == 0 || size == 0 {
                return None;
            }
            let offset = size.saturating_sub(n);
            Some((offset, size - offset))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bounded_open_and_suffix_ranges() {
        assert_eq!(
            parse_range_header("bytes=0-99"),
            Some(RangeSpec::FromTo(0, 99))
        );
        assert_eq!(parse_range_header("bytes=100-"), Some(RangeSpec::From(100)));
        assert_eq!(parse_range_header("bytes=-50"), Some(RangeSpec::Suffix(50)));
        assert_eq!(parse_range_header("bytes=9-3"), None);
        assert_eq!(parse_range_header("bytes=0-10,20-30"), None);
        assert_eq!(parse_range_header("items=0-10"), None);
    }

    #[test]
    fn resolves_against_object_size() {
        assert_eq!(resolve_range(RangeSpec::FromTo(0, 99), 1000), Some((0, 100)));
        // inclusive end clamps to the last byte
        assert_eq!(
            resolve_range(RangeSpec::FromTo(990, 2000), 1000),
            Some((990, 10))
        );
        assert_eq!(resolve_range(RangeSpec::From(400), 1000), Some((400, 600)));
        assert_eq!(resolve_range(RangeSpec::Suffix(10), 1000), Some((990, 10)));
        assert_eq!(resolve_range(RangeSpec::Suffix(5000), 1000), Some((0, 1000)));

        assert_eq!(resolve_range(RangeSpec::FromTo(1000, 1001), 1000), None);
        assert_eq!(resolve_range(RangeSpec::From(1000), 1000), None);
        assert_eq!(resolve_range(RangeSpec::Suffix(0), 1000), None);
        assert_eq!(resolve_range(RangeSpec::FromTo(0, 0), 0), None);
    }
}
