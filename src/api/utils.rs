//! Request plumbing shared by the JSON endpoints.
//!
//! Exports, signals, and download hand-offs all read their own body, so the
//! two checks that precede deserialization live here: the declared media
//! type must be JSON, and the collected body must fit the configured
//! payload budget.

use crate::api::error::ApiError;

/// Accepts `application/json`, with or without parameters such as a
/// charset. JSON-adjacent media types (`text/json`, suffixed variants) are
/// rejected so a misconfigured worker fails loudly instead of half-parsing.
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// Enforces the payload budget on an already-collected body.
pub fn validate_body_size(data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if data.len() > max_size {
        return Err(ApiError::PayloadTooLarge(data.len()));
    }
    Ok(())
}
