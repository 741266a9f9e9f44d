//! Rating handlers
//!
//! Every rating change goes through the shared vote aggregator so the
//! movie's local average stays in step with the rating rows.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::UserContext;
use crate::AppState;
use cinema_common::{
    db::models::Rating,
    errors::{AppError, Result},
};

#[derive(Debug, Deserialize, Validate)]
pub struct RateRequest {
    #[validate(range(min = 0.0, max = 10.0))]
    pub rating: f64,
}

#[derive(Debug, Serialize)]
pub struct RatingResponse {
    pub user_id: i32,
    pub movie_id: i32,
    pub rating: f64,
}

impl From<Rating> for RatingResponse {
    fn from(rating: Rating) -> Self {
        Self {
            user_id: rating.user_id,
            movie_id: rating.movie_id,
            rating: rating.rating,
        }
    }
}

/// Create or replace the caller's rating
pub async fn rate_movie(
    State(state): State<AppState>,
    user: UserContext,
    Path(movie_id): Path<i32>,
    Json(request): Json<RateRequest>,
) -> Result<Json<RatingResponse>> {
    request.validate().map_err(|e| AppError::InvalidInput {
        message: e.to_string(),
    })?;

    let rating = state
        .votes
        .record_rating(user.user_id, movie_id, request.rating)
        .await?;

    tracing::info!(
        user_id = user.user_id,
        movie_id,
        rating = request.rating,
        "Rating recorded"
    );

    Ok(Json(rating.into()))
}

/// Remove the caller's rating, returning the value that was removed
pub async fn delete_rating(
    State(state): State<AppState>,
    user: UserContext,
    Path(movie_id): Path<i32>,
) -> Result<Json<RatingResponse>> {
    let removed = state.votes.retract_rating(user.user_id, movie_id).await?;

    tracing::info!(user_id = user.user_id, movie_id, "Rating removed");

    Ok(Json(removed.into()))
}

pub async fn movie_ratings(
    State(state): State<AppState>,
    Path(movie_id): Path<i32>,
) -> Result<Json<Vec<RatingResponse>>> {
    let ratings = state.repo.ratings_for_movie(movie_id).await?;
    Ok(Json(ratings.into_iter().map(Into::into).collect()))
}

pub async fn my_ratings(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<Vec<RatingResponse>>> {
    let ratings = state.repo.ratings_for_user(user.user_id).await?;
    Ok(Json(ratings.into_iter().map(Into::into).collect()))
}
