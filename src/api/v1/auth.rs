use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    headers::{authorization::Bearer, Authorization},
    http::request::Parts,
    RequestPartsExt, TypedHeader,
};
use serde::{Deserialize, Serialize};
use tap::TapFallible;

use crate::error::{Error, UnauthorizedType};

/// Claims handed back by the external identity provider for a verified
/// bearer token. Token issuance and signature validation live entirely on
/// the provider side.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IdentityClaims {
    pub uid: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[axum::async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Exchange a bearer credential for its claims record.
    async fn verify(&self, token: &str) -> Result<IdentityClaims, Error>;
}

/// Verifies tokens against the configured provider endpoint.
#[derive(Clone)]
pub struct HttpIdentityVerifier {
    client: reqwest::Client,
    verify_url: String,
}

impl HttpIdentityVerifier {
    pub fn new(verify_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            verify_url,
        }
    }

    pub fn new_from_env() -> Self {
        let verify_url = std::env::var("TOKEN_VERIFY_URL")
            .expect("Cannot retrieve TOKEN_VERIFY_URL from environment variable.");

        Self::new(verify_url)
    }
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

#[axum::async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<IdentityClaims, Error> {
        let response = self
            .client
            .post(&self.verify_url)
            .json(&VerifyRequest { token })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Unauthorized(UnauthorizedType::InvalidToken))
                .tap_err(|_| tracing::debug!("identity provider rejected token"));
        }

        response.json().await.map_err(Into::into)
    }
}

/// Requester identity for protected routes. Missing `Authorization: Bearer`
/// is a 401, a token the provider refuses to verify is a 403.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
}

impl From<IdentityClaims> for AuthUser {
    fn from(claims: IdentityClaims) -> Self {
        Self {
            uid: claims.uid,
            email: claims.email,
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<dyn IdentityVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(token)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::MissingCredential))
            .tap_err(|_| tracing::debug!("bearer credential not found"))?;

        let verifier = <Arc<dyn IdentityVerifier>>::from_ref(state);

        verifier.verify(token.token()).await.map(Into::into)
    }
}

#[cfg(test)]
pub mod test_support {
    use std::collections::HashMap;

    use crate::error::{Error, UnauthorizedType};

    use super::{IdentityClaims, IdentityVerifier};

    /// In-memory token table standing in for the identity provider.
    #[derive(Default)]
    pub struct StaticVerifier {
        tokens: HashMap<String, IdentityClaims>,
    }

    impl StaticVerifier {
        pub fn with_token(mut self, token: &str, uid: &str, email: &str) -> Self {
            self.tokens.insert(
                token.to_string(),
                IdentityClaims {
                    uid: uid.to_string(),
                    email: Some(email.to_string()),
                    name: None,
                    picture: None,
                },
            );
            self
        }
    }

    #[axum::async_trait]
    impl IdentityVerifier for StaticVerifier {
        async fn verify(&self, token: &str) -> Result<IdentityClaims, Error> {
            self.tokens
                .get(token)
                .cloned()
                .ok_or(Error::Unauthorized(UnauthorizedType::InvalidToken))
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::extract::FromRequestParts;

    use crate::{
        api::v1::tests::offline_state,
        error::{Error, UnauthorizedType},
    };

    #[tokio::test]
    async fn test_auth_user() {
        let state = offline_state().await;

        let (mut parts, _) = axum::http::request::Request::get("http://localhost")
            .header("Authorization", "Bearer test-token")
            .body(())
            .unwrap()
            .into_parts();

        let user = super::AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap();

        assert_eq!(user.email.as_deref(), Some("admin@test.com"));
    }

    #[tokio::test]
    async fn test_auth_user_missing_header() {
        let state = offline_state().await;

        let (mut parts, _) = axum::http::request::Request::get("http://localhost")
            .body(())
            .unwrap()
            .into_parts();

        let error = super::AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();

        assert_matches!(
            error,
            Error::Unauthorized(UnauthorizedType::MissingCredential)
        );
    }

    #[tokio::test]
    async fn test_auth_user_unverifiable_token() {
        let state = offline_state().await;

        let (mut parts, _) = axum::http::request::Request::get("http://localhost")
            .header("Authorization", "Bearer forged")
            .body(())
            .unwrap()
            .into_parts();

        let error = super::AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();

        assert_matches!(error, Error::Unauthorized(UnauthorizedType::InvalidToken));
    }
}
