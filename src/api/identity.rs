//! Caller identity resolution.

use axum::http::{HeaderMap, HeaderName};

use crate::error::{ConfigError, PipelineError};

/// Resolves the authenticated user for a request, or fails `Unauthenticated`.
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Result<String, PipelineError>;
}

/// Trusts a user-id header injected by the upstream auth proxy.
pub struct TrustedHeaderIdentity {
    header: HeaderName,
}

impl TrustedHeaderIdentity {
    pub fn new(header: &str) -> Result<Self, ConfigError> {
        let header = HeaderName::from_bytes(header.trim().to_ascii_lowercase().as_bytes())
            .map_err(|e| ConfigError::InvalidValue {
                key: "SEO_WRITER_USER_HEADER".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { header })
    }
}

impl IdentityProvider for TrustedHeaderIdentity {
    fn resolve(&self, headers: &HeaderMap) -> Result<String, PipelineError> {
        headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(PipelineError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn resolves_trimmed_header() {
        let identity = TrustedHeaderIdentity::new("X-User-Id").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static(" user-7 "));
        assert_eq!(identity.resolve(&headers).unwrap(), "user-7");
    }

    #[test]
    fn missing_or_blank_header_is_unauthenticated() {
        let identity = TrustedHeaderIdentity::new("x-user-id").unwrap();
        assert!(matches!(
            identity.resolve(&HeaderMap::new()),
            Err(PipelineError::Unauthenticated)
        ));

        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("  "));
        assert!(identity.resolve(&headers).is_err());
    }

    #[test]
    fn invalid_header_name_is_config_error() {
        assert!(TrustedHeaderIdentity::new("bad header").is_err());
    }
}
