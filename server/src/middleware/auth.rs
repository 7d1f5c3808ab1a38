use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::models::User;
use crate::state::AppState;
use crate::utils::error::AppError;

/// The authenticated caller, loaded from the store so role and profile
/// changes apply without waiting for a new token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| AppError::AuthError("Missing Authorization header".to_string()))?
            .to_str()
            .map_err(|_| AppError::AuthError("Invalid Authorization header".to_string()))?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::AuthError("Invalid Authorization format (expected: Bearer <token>)".to_string())
        })?;

        let claims = state.jwt.verify(token.trim())?;

        let user = state
            .repos
            .users
            .find_user(claims.sub)
            .await?
            .ok_or_else(|| AppError::AuthError("Unknown user".to_string()))?;

        Ok(CurrentUser(user))
    }
}
