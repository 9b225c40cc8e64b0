use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use tracing::{debug, warn};

use crate::auth::Identity;

use super::error::ApiError;
use super::state::AppState;

pub fn ensure_authorized(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let Some(token) = extract_bearer_token(headers) else {
        warn!("request without bearer token");
        return Err(ApiError::Unauthenticated);
    };

    match state.auth.authorize(token) {
        Ok(identity) => {
            debug!(admin = %identity.email, "authorized request");
            Ok(identity)
        }
        Err(error) => {
            warn!(error = %error, "unauthorized request");
            Err(error.into())
        }
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())?;
    let mut parts = raw.split_whitespace();
    let scheme = parts.next()?;
    let token = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") || parts.next().is_some() {
        return None;
    }
    Some(token)
}
