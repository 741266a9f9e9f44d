//! API handlers module

pub mod actors;
pub mod health;
pub mod movies;
pub mod ratings;
pub mod reviews;

use axum::{extract::FromRequestParts, http::request::Parts};
use cinema_common::errors::{AppError, Result};

/// Acting user, as asserted by the upstream authentication layer
#[derive(Debug, Clone, Copy)]
pub struct UserContext {
    pub user_id: i32,
}

impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<i32>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing or invalid X-User-ID header".to_string(),
            })?;

        Ok(Self { user_id })
    }
}
