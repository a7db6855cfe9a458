use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::auth::token;
use crate::error::ApiError;
use crate::store::AppState;

/// Authenticated user extracted from the request's bearer token. Deliberately
/// thin: token hashing and lookup only, no sessions, no scopes, no RBAC —
/// bearer-token validation is external-collaborator territory.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw_token = extract_bearer_token(parts).ok_or(ApiError::Unauthorized)?;
        let user = lookup_api_token(&state.pool, &raw_token)
            .await?
            .ok_or(ApiError::Unauthorized)?;

        if !user.is_active {
            return Err(ApiError::Unauthorized);
        }

        Ok(Self {
            user_id: user.user_id,
            username: user.username,
        })
    }
}

struct TokenAuthLookup {
    user_id: Uuid,
    username: String,
    is_active: bool,
}

fn extract_bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_owned())
}

async fn lookup_api_token(
    pool: &PgPool,
    raw_token: &str,
) -> Result<Option<TokenAuthLookup>, ApiError> {
    let hash = token::hash_token(raw_token);

    let row = sqlx::query(
        r"
        SELECT u.id as user_id, u.username as username, u.is_active as is_active
        FROM api_tokens t
        JOIN users u ON u.id = t.user_id
        WHERE t.token_hash = $1
          AND (t.expires_at IS NULL OR t.expires_at > now())
        ",
    )
    .bind(&hash)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else { return Ok(None) };

    let pool_clone = pool.clone();
    let hash_clone = hash.clone();
    tokio::spawn(async move {
        let _ = sqlx::query("UPDATE api_tokens SET last_used_at = now() WHERE token_hash = $1")
            .bind(hash_clone)
            .execute(&pool_clone)
            .await;
    });

    Ok(Some(TokenAuthLookup {
        user_id: row.get("user_id"),
        username: row.get("username"),
        is_active: row.get("is_active"),
    }))
}
