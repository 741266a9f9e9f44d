//! Actor read handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use cinema_common::{
    db::models::Actor,
    errors::{AppError, Result},
};

#[derive(Debug, Deserialize, Validate)]
pub struct ActorSearchParams {
    #[validate(length(min = 1, max = 200))]
    pub name: String,

    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: u64,
}

fn default_limit() -> u64 {
    20
}

pub async fn get_actor(
    State(state): State<AppState>,
    Path(actor_id): Path<i32>,
) -> Result<Json<Actor>> {
    let actor = state
        .repo
        .find_actor(actor_id)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource_type: "actor".to_string(),
            id: actor_id.to_string(),
        })?;

    Ok(Json(actor))
}

pub async fn search_actors(
    State(state): State<AppState>,
    Query(params): Query<ActorSearchParams>,
) -> Result<Json<Vec<Actor>>> {
    params.validate().map_err(|e| AppError::InvalidInput {
        message: e.to_string(),
    })?;

    let actors = state
        .repo
        .search_actors_by_name(params.name.trim(), params.limit)
        .await?;

    Ok(Json(actors))
}
