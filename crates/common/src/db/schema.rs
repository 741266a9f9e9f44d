//! Table bootstrap from the entity definitions
//!
//! Used by the gateway when `database.auto_migrate` is set and by tests.
//! Production schema changes go through the deployment's migration tooling.

use crate::db::models::*;
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Schema};
use tracing::info;

/// Create any missing tables, parents before join tables
pub async fn ensure_schema<C: ConnectionTrait>(conn: &C) -> Result<()> {
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);

    let mut statements = vec![
        schema.create_table_from_entity(MovieEntity),
        schema.create_table_from_entity(GenreEntity),
        schema.create_table_from_entity(ActorEntity),
        schema.create_table_from_entity(MovieGenreEntity),
        schema.create_table_from_entity(MovieActorEntity),
        schema.create_table_from_entity(RatingEntity),
        schema.create_table_from_entity(ReviewEntity),
    ];

    for statement in statements.iter_mut() {
        statement.if_not_exists();
        conn.execute(backend.build(&*statement)).await?;
    }

    info!(tables = statements.len(), "Schema ensured");
    Ok(())
}
