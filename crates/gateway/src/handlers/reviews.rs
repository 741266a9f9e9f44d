//! Review handlers
//!
//! Reviews are plain per-user records with no effect on the vote aggregate.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use validator::Validate;

use super::UserContext;
use crate::AppState;
use cinema_common::{
    db::models::Review,
    errors::{AppError, Result},
};

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewRequest {
    pub liked: bool,

    #[validate(length(min = 1, max = 255))]
    pub title: String,

    #[validate(length(max = 20000))]
    pub text: String,
}

/// Create or replace the caller's review
pub async fn post_review(
    State(state): State<AppState>,
    user: UserContext,
    Path(movie_id): Path<i32>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<Review>> {
    request.validate().map_err(|e| AppError::InvalidInput {
        message: e.to_string(),
    })?;

    let review = state
        .repo
        .upsert_review(
            user.user_id,
            movie_id,
            request.liked,
            &request.title,
            &request.text,
        )
        .await?;

    tracing::info!(user_id = user.user_id, movie_id, liked = request.liked, "Review saved");

    Ok(Json(review))
}

pub async fn delete_review(
    State(state): State<AppState>,
    user: UserContext,
    Path(movie_id): Path<i32>,
) -> Result<StatusCode> {
    state.repo.delete_review(user.user_id, movie_id).await?;

    tracing::info!(user_id = user.user_id, movie_id, "Review removed");

    Ok(StatusCode::NO_CONTENT)
}

pub async fn movie_reviews(
    State(state): State<AppState>,
    Path(movie_id): Path<i32>,
) -> Result<Json<Vec<Review>>> {
    Ok(Json(state.repo.reviews_for_movie(movie_id).await?))
}

pub async fn my_reviews(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<Vec<Review>>> {
    Ok(Json(state.repo.reviews_for_user(user.user_id).await?))
}
