//! Mapping of HTTP outcomes onto `ServiceError`.

use assetship_core::ServiceError;
use reqwest::StatusCode;

/// Transport failures: timeouts and connection problems are retryable.
pub(crate) fn from_reqwest(what: &str, err: reqwest::Error) -> ServiceError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        ServiceError::Unavailable(format!("{what}: {err}"))
    } else {
        ServiceError::Rejected(format!("{what}: {err}"))
    }
}

/// Non-2xx response. 404 is `NotFound`; 408, 429 and 5xx are retryable.
pub(crate) fn from_status(what: &str, status: StatusCode, body: &str) -> ServiceError {
    let detail = format!("{what}: HTTP {status}{}", summarize(body));
    match status {
        StatusCode::NOT_FOUND => ServiceError::NotFound(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ServiceError::Unavailable(detail)
        }
        s if s.is_server_error() => ServiceError::Unavailable(detail),
        _ => ServiceError::Rejected(detail),
    }
}

fn summarize(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return String::new();
    }
    let mut short: String = body.chars().take(200).collect();
    if short.len() < body.len() {
        short.push('…');
    }
    format!(" ({short})")
}
