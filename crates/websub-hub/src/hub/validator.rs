//! Inbound subscription request validation.
//!
//! Checks an incoming POST against the protocol rules and produces either a
//! classified error or a fully-populated [`SubscriptionRequest`]. Checks run
//! in order and short-circuit on the first failure; no network call or store
//! access happens here.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::Url;

use super::{Mode, SubscriptionRequest};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Maximum secret length in bytes, exclusive
const MAX_SECRET_BYTES: usize = 200;

/// A rejected subscription request. Every variant maps to a single-line,
/// human-readable message surfaced in the HTTP 400 body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing content-type header")]
    MissingContentType,

    #[error("content-type must be \"{FORM_CONTENT_TYPE}\"")]
    UnsupportedContentType,

    #[error("content-type charset must be \"UTF-8\"")]
    UnsupportedCharset,

    #[error("missing or malformed content-length header")]
    InvalidContentLength,

    #[error("request must include hub.callback, hub.mode and hub.topic")]
    MissingParameters,

    #[error("hub.mode must be \"subscribe\" or \"unsubscribe\"")]
    InvalidMode,

    #[error("hub.callback is not a valid URL")]
    InvalidCallbackUrl,

    #[error("hub.topic is not a valid URL")]
    InvalidTopicUrl,

    #[error("hub.lease_seconds must be a non-negative integer")]
    InvalidLeaseSeconds,

    #[error("secret must be shorter than {MAX_SECRET_BYTES} bytes")]
    SecretTooLong,
}

/// Validate one inbound request.
///
/// `now` is the instant validation began; it becomes the lease start time
/// of the resulting request.
pub fn validate(
    content_type: Option<&str>,
    content_length: Option<&str>,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<SubscriptionRequest, ValidationError> {
    check_content_type(content_type)?;

    let declared = parse_content_length(content_length)?;
    let body = &body[..body.len().min(declared)];

    // First value wins for repeated keys.
    let mut params: HashMap<String, String> = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        params.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }

    let (callback, mode, topic) = match (
        params.get("hub.callback"),
        params.get("hub.mode"),
        params.get("hub.topic"),
    ) {
        (Some(callback), Some(mode), Some(topic)) => (callback, mode, topic),
        _ => return Err(ValidationError::MissingParameters),
    };

    let mode = match mode.as_str() {
        "subscribe" => Mode::Subscribe,
        "unsubscribe" => Mode::Unsubscribe,
        _ => return Err(ValidationError::InvalidMode),
    };

    let callback = parse_decoded_url(callback).ok_or(ValidationError::InvalidCallbackUrl)?;
    let topic = parse_decoded_url(topic).ok_or(ValidationError::InvalidTopicUrl)?;

    // Lease is only meaningful for subscribe; any value supplied on an
    // unsubscribe request is ignored outright.
    let lease_seconds = match (mode, params.get("hub.lease_seconds")) {
        (Mode::Subscribe, Some(lease)) => Some(parse_lease_seconds(lease)?),
        _ => None,
    };

    let secret = match params.get("secret") {
        Some(secret) if secret.len() >= MAX_SECRET_BYTES => {
            return Err(ValidationError::SecretTooLong)
        }
        secret => secret.cloned(),
    };

    Ok(SubscriptionRequest {
        callback,
        topic,
        mode,
        lease_seconds,
        secret,
        received_at: now,
    })
}

fn check_content_type(content_type: Option<&str>) -> Result<(), ValidationError> {
    let raw = content_type.ok_or(ValidationError::MissingContentType)?;

    let mut parts = raw.split(';');
    let media_type = parts.next().unwrap_or("").trim();
    if !media_type.eq_ignore_ascii_case(FORM_CONTENT_TYPE) {
        return Err(ValidationError::UnsupportedContentType);
    }

    // An absent charset parameter is graciously read as UTF-8.
    for param in parts {
        let mut kv = param.splitn(2, '=');
        let key = kv.next().unwrap_or("").trim();
        if key.eq_ignore_ascii_case("charset") {
            let value = kv.next().unwrap_or("").trim().trim_matches('"');
            if !value.eq_ignore_ascii_case("UTF-8") {
                return Err(ValidationError::UnsupportedCharset);
            }
        }
    }

    Ok(())
}

fn parse_content_length(content_length: Option<&str>) -> Result<usize, ValidationError> {
    let raw = content_length
        .ok_or(ValidationError::InvalidContentLength)?
        .trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidContentLength);
    }
    raw.parse().map_err(|_| ValidationError::InvalidContentLength)
}

/// Decode non-reserved characters a subscriber may have left encoded, then
/// require an absolute URL with a host.
fn parse_decoded_url(value: &str) -> Option<Url> {
    let decoded = percent_decode_str(value).decode_utf8().ok()?;
    let url = Url::parse(&decoded).ok()?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Some(url),
        _ => None,
    }
}

fn parse_lease_seconds(value: &str) -> Result<u64, ValidationError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidLeaseSeconds);
    }
    value.parse().map_err(|_| ValidationError::InvalidLeaseSeconds)
}
