//! Bearer-token interceptor for protected routes.
//!
//! Every failure is reported to the client as the same 401; the concrete
//! reason only goes to the logs.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};
use uuid::Uuid;

use super::{
    extractors::CurrentUser,
    jwt::{JwtKeys, TokenError},
};
use crate::{
    error::ApiError,
    state::AppState,
    users::{repo::StoreError, repo::UserStore, repo_types::PublicUser},
};

#[derive(Debug, thiserror::Error)]
pub enum AuthFailure {
    #[error("no authorization header")]
    MissingHeader,
    #[error("authorization header is not `Bearer <token>`")]
    BadScheme,
    #[error("token rejected: {0}")]
    Token(#[from] TokenError),
    #[error("user {0} no longer exists")]
    UnknownUser(Uuid),
    #[error("user lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// Extracts the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthFailure> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthFailure::MissingHeader)?
        .to_str()
        .map_err(|_| AuthFailure::BadScheme)?;

    let mut parts = value.split(' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default();
    if scheme != "Bearer" || token.is_empty() {
        return Err(AuthFailure::BadScheme);
    }
    Ok(token)
}

/// Resolves the request headers to the public view of the token's owner.
pub async fn authenticate(
    keys: &JwtKeys,
    users: &dyn UserStore,
    headers: &HeaderMap,
) -> Result<PublicUser, AuthFailure> {
    let token = bearer_token(headers)?;
    let user_id = keys.verify(token)?;
    users
        .find_public_by_id(user_id)
        .await?
        .ok_or(AuthFailure::UnknownUser(user_id))
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match authenticate(&state.jwt, state.users.as_ref(), req.headers()).await {
        Ok(user) => {
            req.extensions_mut().insert(CurrentUser(user));
            Ok(next.run(req).await)
        }
        Err(failure) => {
            match &failure {
                AuthFailure::Store(e) => error!(error = ?e, "authentication failed"),
                other => warn!(reason = %other, "authentication failed"),
            }
            Err(ApiError::Unauthenticated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{memory::MemoryUserStore, repo_types::NewUser};
    use axum::http::HeaderValue;
    use std::time::Duration;
    use time::OffsetDateTime;

    fn keys() -> JwtKeys {
        JwtKeys::new(&crate::config::JwtConfig {
            secret: "middleware-secret".into(),
            issuer: "userhub".into(),
            ttl: Duration::from_secs(60),
        })
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    async fn store_with_user() -> (MemoryUserStore, Uuid) {
        let store = MemoryUserStore::default();
        let user = store
            .create(NewUser {
                name: "A".into(),
                email: "a@x.com".into(),
                password_hash: "hash".into(),
            })
            .await
            .unwrap();
        (store, user.id)
    }

    #[test]
    fn bearer_token_parsing() {
        assert!(matches!(
            bearer_token(&HeaderMap::new()),
            Err(AuthFailure::MissingHeader)
        ));
        assert!(matches!(
            bearer_token(&headers_with("Basic abc")),
            Err(AuthFailure::BadScheme)
        ));
        assert!(matches!(
            bearer_token(&headers_with("bearer abc")),
            Err(AuthFailure::BadScheme)
        ));
        assert!(matches!(
            bearer_token(&headers_with("Bearer")),
            Err(AuthFailure::BadScheme)
        ));
        assert!(matches!(
            bearer_token(&headers_with("Bearer ")),
            Err(AuthFailure::BadScheme)
        ));
        assert_eq!(bearer_token(&headers_with("Bearer abc")).unwrap(), "abc");
    }

    #[tokio::test]
    async fn resolves_valid_token_to_public_user() {
        let (store, id) = store_with_user().await;
        let keys = keys();
        let token = keys.issue(id).unwrap();
        let user = authenticate(&keys, &store, &headers_with(&format!("Bearer {token}")))
            .await
            .expect("authenticated");
        assert_eq!(user.id, id);
        assert_eq!(user.email, "a@x.com");
    }

    #[tokio::test]
    async fn rejects_expired_and_garbage_tokens() {
        let (store, id) = store_with_user().await;
        let keys = keys();

        let old = OffsetDateTime::now_utc() - time::Duration::seconds(61);
        let expired = keys.issue_at(id, old).unwrap();
        let err = authenticate(&keys, &store, &headers_with(&format!("Bearer {expired}")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthFailure::Token(TokenError::Expired)));

        let err = authenticate(&keys, &store, &headers_with("Bearer nonsense"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthFailure::Token(TokenError::Malformed)));
    }

    #[tokio::test]
    async fn rejects_token_of_vanished_user() {
        let (store, _) = store_with_user().await;
        let keys = keys();
        let ghost = Uuid::new_v4();
        let token = keys.issue(ghost).unwrap();
        let err = authenticate(&keys, &store, &headers_with(&format!("Bearer {token}")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthFailure::UnknownUser(id) if id == ghost));
    }
}
