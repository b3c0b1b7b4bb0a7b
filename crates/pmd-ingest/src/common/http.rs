//! Shared HTTP response handling
//!
//! Every REST and JSON-RPC call goes through [`check_status`] and
//! [`read_json`] so status codes map onto [`SourceError`] the same way
//! everywhere.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Response;
use serde_json::Value;
use std::time::Duration;

use crate::error::{classify_status, SourceError};

/// Longest response body excerpt carried in an error message
pub const MAX_ERROR_BODY: usize = 512;

/// Parse a `Retry-After` header given as delta-seconds or an HTTP date
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&Utc) - Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

/// Pass successful responses through; classify everything else
pub async fn check_status(response: Response) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status.as_u16(), retry_after, excerpt(&body)))
}

/// Read the whole body and decode it as JSON
///
/// A body that cannot be read is transient; one that is not JSON is
/// malformed.
pub async fn read_json(response: Response) -> Result<Value, SourceError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| SourceError::Malformed(format!("invalid JSON body: {}", e)))
}

/// Truncate a body to [`MAX_ERROR_BODY`] bytes on a char boundary
pub fn excerpt(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.trim().to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", body[..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_retry_after_past_date_is_zero() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));
    }

    #[test]
    fn test_retry_after_missing_or_garbage() {
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let body = "é".repeat(MAX_ERROR_BODY);
        let short = excerpt(&body);
        assert!(short.ends_with("..."));
        assert!(short.len() <= MAX_ERROR_BODY + 3);
        assert_eq!(excerpt("  not found \n"), "not found");
    }
}
