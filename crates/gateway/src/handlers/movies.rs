//! Movie read handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use cinema_common::{
    db::{models::Movie, MovieDetails},
    errors::{AppError, Result},
};

#[derive(Debug, Deserialize, Validate)]
pub struct SearchParams {
    #[validate(length(min = 1, max = 200))]
    pub title: String,

    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: u64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PageParams {
    #[serde(default)]
    pub offset: u64,

    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: u64,
}

fn default_limit() -> u64 {
    20
}

pub async fn get_movie(
    State(state): State<AppState>,
    Path(movie_id): Path<i32>,
) -> Result<Json<MovieDetails>> {
    let details = state
        .repo
        .find_movie(movie_id)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource_type: "movie".to_string(),
            id: movie_id.to_string(),
        })?;

    Ok(Json(details))
}

pub async fn search_movies(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Movie>>> {
    params.validate().map_err(|e| AppError::InvalidInput {
        message: e.to_string(),
    })?;

    let movies = state
        .repo
        .search_movies_by_title(params.title.trim(), params.limit)
        .await?;

    Ok(Json(movies))
}

pub async fn popular_movies(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<Movie>>> {
    params.validate().map_err(|e| AppError::InvalidInput {
        message: e.to_string(),
    })?;

    let movies = state.repo.popular_movies(params.offset, params.limit).await?;
    Ok(Json(movies))
}
