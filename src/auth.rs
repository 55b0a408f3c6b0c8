use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::error::MigrateError;

/// Destination-catalog access token forwarded by the client as a bearer token.
pub fn catalog_token(headers: &HeaderMap) -> Result<String, MigrateError> {
    let Some(raw_header) = headers.get(AUTHORIZATION) else {
        return Err(unauthorized("Not authenticated with YouTube"));
    };

    let Ok(value) = raw_header.to_str() else {
        return Err(unauthorized("Invalid Authorization header"));
    };

    let Some(token) = value.strip_prefix("Bearer ") else {
        return Err(unauthorized("Authorization must use Bearer token"));
    };

    let token = token.trim();
    if token.is_empty() {
        return Err(unauthorized("Empty bearer token"));
    }
    Ok(token.to_string())
}

fn unauthorized(message: &str) -> MigrateError {
    MigrateError::Unauthorized(message.to_string())
}
