//! Read-endpoint authorization.
//!
//! A request is authorized when it presents one of the bearer tokens
//! required for the endpoint, or when the injected signature verifier
//! vouches for it. HTTP-signature verification itself lives outside the
//! core; the default verifier rejects everything and token checks are
//! the only local policy.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use url::Url;

use crate::error::Result;

/// Verifies the HTTP signature of a request.
///
/// Returns the actor IRI bound to the signature, or `None` when the
/// request carries no acceptable signature.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, headers: &HeaderMap) -> Result<Option<Url>>;
}

/// Yields the bearer tokens required for an endpoint/method pair. An
/// empty list means the endpoint is open.
pub trait AuthTokenManager: Send + Sync {
    fn required_tokens(&self, endpoint: &str, method: &str) -> Result<Vec<String>>;
}

/// A verifier for deployments without HTTP-signature support.
pub struct RejectAllVerifier;

#[async_trait]
impl SignatureVerifier for RejectAllVerifier {
    async fn verify(&self, _headers: &HeaderMap) -> Result<Option<Url>> {
        Ok(None)
    }
}

/// Token manager driven by the application configuration: a single
/// optional read token guards all GET endpoints.
pub struct ConfigAuthTokenManager {
    read_token: Option<String>,
}

impl ConfigAuthTokenManager {
    pub fn new(config: &crate::config::AuthConfig) -> Self {
        Self {
            read_token: config.read_token.clone(),
        }
    }
}

impl AuthTokenManager for ConfigAuthTokenManager {
    fn required_tokens(&self, _endpoint: &str, method: &str) -> Result<Vec<String>> {
        if method != "GET" {
            return Ok(Vec::new());
        }

        Ok(self.read_token.clone().into_iter().collect())
    }
}

/// Check whether the request is authorized for the endpoint.
pub async fn authorize(
    verifier: &dyn SignatureVerifier,
    token_manager: &dyn AuthTokenManager,
    headers: &HeaderMap,
    endpoint: &str,
    method: &str,
) -> Result<bool> {
    let required = token_manager.required_tokens(endpoint, method)?;

    if required.is_empty() {
        return Ok(true);
    }

    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            if required.iter().any(|required| required == token) {
                return Ok(true);
            }
        }
    }

    Ok(verifier.verify(headers).await?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_token(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn open_endpoint_is_always_authorized() {
        let manager = ConfigAuthTokenManager::new(&crate::config::AuthConfig { read_token: None });

        let authorized = authorize(
            &RejectAllVerifier,
            &manager,
            &HeaderMap::new(),
            "/services/orb/inbox",
            "GET",
        )
        .await
        .unwrap();

        assert!(authorized);
    }

    #[tokio::test]
    async fn matching_bearer_token_is_authorized() {
        let manager = ConfigAuthTokenManager::new(&crate::config::AuthConfig {
            read_token: Some("s3cr3t".to_string()),
        });

        assert!(authorize(
            &RejectAllVerifier,
            &manager,
            &headers_with_token("s3cr3t"),
            "/services/orb/inbox",
            "GET",
        )
        .await
        .unwrap());

        assert!(!authorize(
            &RejectAllVerifier,
            &manager,
            &headers_with_token("wrong"),
            "/services/orb/inbox",
            "GET",
        )
        .await
        .unwrap());

        assert!(!authorize(
            &RejectAllVerifier,
            &manager,
            &HeaderMap::new(),
            "/services/orb/inbox",
            "GET",
        )
        .await
        .unwrap());
    }
}
