use std::env;

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::core::errors::ApiError;

const API_KEY_HEADER: &str = "x-api-key";

/// Shared secret for the HTTP API. `None` leaves the API open, which is the
/// default for a server bound to loopback.
#[derive(Debug, Clone, Default)]
pub struct ApiToken {
    value: Option<String>,
}

impl ApiToken {
    pub fn new(value: Option<String>) -> Self {
        Self {
            value: value.filter(|v| !v.trim().is_empty()),
        }
    }

    /// Env var wins over the configured token.
    pub fn resolve(configured: Option<&str>) -> Self {
        if let Ok(token) = env::var("HOLIDAY_BOT_API_TOKEN") {
            if !token.trim().is_empty() {
                return Self::new(Some(token));
            }
        }
        Self::new(configured.map(str::to_string))
    }

    pub fn is_enabled(&self) -> bool {
        self.value.is_some()
    }
}

pub fn require_api_key(headers: &HeaderMap, expected: &ApiToken) -> Result<(), ApiError> {
    let Some(expected) = expected.value.as_deref() else {
        return Ok(());
    };

    let header_value = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if header_value.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    if !bool::from(header_value.as_bytes().ct_eq(expected.as_bytes())) {
        return Err(ApiError::Unauthorized);
    }

    Ok(())
}
