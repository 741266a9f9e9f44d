//! Batch materialization
//!
//! Persists a batch of [`MovieRecord`]s in one transaction:
//! 1. Resolve each genre and actor by external id, inserting on first sighting
//! 2. Insert the movie, or overwrite its source fields if it already exists
//! 3. Replace the movie's genre and actor association sets
//!
//! Any failure rolls the whole batch back. Replaying a batch is a no-op apart
//! from refreshing the movie's source fields.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::records::{ActorRecord, GenreRecord, MovieRecord};
use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Anything that can absorb a decoded batch
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn ingest(&self, batch: &[MovieRecord]) -> Result<IngestSummary>;
}

/// What one batch did to the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub movies_created: usize,
    pub movies_updated: usize,
}

impl IngestSummary {
    pub fn total(&self) -> usize {
        self.movies_created + self.movies_updated
    }
}

/// Idempotent upsert of movie batches keyed by external id
pub struct Materializer {
    pool: DbPool,
    timeout: Duration,
}

impl Materializer {
    pub fn new(pool: DbPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Persist a batch atomically, bounded by the configured timeout
    #[instrument(skip(self, batch), fields(batch_size = batch.len()))]
    pub async fn ingest_batch(&self, batch: &[MovieRecord]) -> Result<IngestSummary> {
        let started = Instant::now();

        let result = self.run_transaction(batch).await;
        metrics::record_materialize(
            started.elapsed().as_secs_f64(),
            result.as_ref().map(IngestSummary::total).unwrap_or(0),
            result.is_ok(),
        );

        match &result {
            Ok(summary) => info!(
                created = summary.movies_created,
                updated = summary.movies_updated,
                "Batch materialized"
            ),
            Err(e) => error!(error = %e, "Batch materialization aborted"),
        }

        result
    }

    async fn run_transaction(&self, batch: &[MovieRecord]) -> Result<IngestSummary> {
        let txn = self
            .pool
            .write()
            .begin()
            .await
            .map_err(|e| AppError::persistence("begin transaction", e))?;

        let outcome = tokio::time::timeout(self.timeout, upsert_batch(&txn, batch)).await;

        match outcome {
            Ok(Ok(summary)) => {
                txn.commit()
                    .await
                    .map_err(|e| AppError::persistence("commit", e))?;
                Ok(summary)
            }
            Ok(Err(e)) => {
                rollback(txn).await;
                Err(e)
            }
            Err(_) => {
                rollback(txn).await;
                Err(AppError::Persistence {
                    step: "transaction".to_string(),
                    message: format!("timed out after {}ms", self.timeout.as_millis()),
                })
            }
        }
    }
}

#[async_trait]
impl BatchSink for Materializer {
    async fn ingest(&self, batch: &[MovieRecord]) -> Result<IngestSummary> {
        self.ingest_batch(batch).await
    }
}

async fn rollback(txn: DatabaseTransaction) {
    if let Err(e) = txn.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}

async fn upsert_batch(txn: &DatabaseTransaction, batch: &[MovieRecord]) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    for record in batch {
        let genre_ids = resolve_genres(txn, &record.genres).await?;
        let actor_ids = resolve_actors(txn, record.actors()).await?;

        let (movie_id, created) = upsert_movie(txn, record).await?;
        if created {
            summary.movies_created += 1;
        } else {
            summary.movies_updated += 1;
        }

        replace_genre_links(txn, movie_id, &genre_ids).await?;
        replace_actor_links(txn, movie_id, &actor_ids).await?;

        debug!(
            tmdb_id = record.id,
            movie_id,
            created,
            genres = genre_ids.len(),
            actors = actor_ids.len(),
            "Movie upserted"
        );
    }

    Ok(summary)
}

async fn resolve_genres<C: ConnectionTrait>(conn: &C, genres: &[GenreRecord]) -> Result<BTreeSet<i32>> {
    let mut ids = BTreeSet::new();
    for genre in genres {
        ids.insert(resolve_genre(conn, genre).await?.id);
    }
    Ok(ids)
}

async fn resolve_actors<C: ConnectionTrait>(conn: &C, actors: &[ActorRecord]) -> Result<BTreeSet<i32>> {
    let mut ids = BTreeSet::new();
    for actor in actors {
        ids.insert(resolve_actor(conn, actor).await?.id);
    }
    Ok(ids)
}

/// Look up by external id; insert on miss, yielding to a concurrent insert
async fn resolve_genre<C: ConnectionTrait>(conn: &C, record: &GenreRecord) -> Result<Genre> {
    if let Some(existing) = find_genre(conn, record.id).await? {
        return Ok(existing);
    }

    let genre = GenreActiveModel {
        tmdb_id: Set(record.id),
        name: Set(record.name.clone()),
        ..Default::default()
    };

    GenreEntity::insert(genre)
        .on_conflict(OnConflict::column(GenreColumn::TmdbId).do_nothing().to_owned())
        .exec_without_returning(conn)
        .await
        .map_err(|e| AppError::persistence(format!("genre {} insert", record.id), e))?;

    find_genre(conn, record.id).await?.ok_or_else(|| AppError::Persistence {
        step: format!("genre {} insert", record.id),
        message: "row missing after insert".to_string(),
    })
}

async fn find_genre<C: ConnectionTrait>(conn: &C, tmdb_id: i64) -> Result<Option<Genre>> {
    GenreEntity::find()
        .filter(GenreColumn::TmdbId.eq(tmdb_id))
        .one(conn)
        .await
        .map_err(|e| AppError::persistence(format!("genre {} lookup", tmdb_id), e))
}

/// First write wins on actor attributes; later sightings only confirm existence
async fn resolve_actor<C: ConnectionTrait>(conn: &C, record: &ActorRecord) -> Result<Actor> {
    if let Some(existing) = find_actor(conn, record.id).await? {
        return Ok(existing);
    }

    let actor = ActorActiveModel {
        tmdb_id: Set(record.id),
        name: Set(record.name.clone()),
        gender: Set(record.gender),
        profile_path: Set(record.profile_path.clone()),
        ..Default::default()
    };

    ActorEntity::insert(actor)
        .on_conflict(OnConflict::column(ActorColumn::TmdbId).do_nothing().to_owned())
        .exec_without_returning(conn)
        .await
        .map_err(|e| AppError::persistence(format!("actor {} insert", record.id), e))?;

    find_actor(conn, record.id).await?.ok_or_else(|| AppError::Persistence {
        step: format!("actor {} insert", record.id),
        message: "row missing after insert".to_string(),
    })
}

async fn find_actor<C: ConnectionTrait>(conn: &C, tmdb_id: i64) -> Result<Option<Actor>> {
    ActorEntity::find()
        .filter(ActorColumn::TmdbId.eq(tmdb_id))
        .one(conn)
        .await
        .map_err(|e| AppError::persistence(format!("actor {} lookup", tmdb_id), e))
}

/// Returns the surrogate key and whether the row was created.
///
/// Source fields are last-write-wins. The local vote aggregate is only
/// initialised on insert and never touched on update.
async fn upsert_movie<C: ConnectionTrait>(conn: &C, record: &MovieRecord) -> Result<(i32, bool)> {
    let existing = MovieEntity::find()
        .filter(MovieColumn::TmdbId.eq(record.id))
        .one(conn)
        .await
        .map_err(|e| AppError::persistence(format!("movie {} lookup", record.id), e))?;

    match existing {
        None => {
            let mut movie = MovieActiveModel {
                tmdb_id: Set(record.id),
                vote_average: Set(0.0),
                vote_count: Set(0),
                ..Default::default()
            };
            apply_source_fields(&mut movie, record);

            let inserted = movie
                .insert(conn)
                .await
                .map_err(|e| AppError::persistence(format!("movie {} insert", record.id), e))?;
            Ok((inserted.id, true))
        }
        Some(existing) => {
            let id = existing.id;
            let mut movie: MovieActiveModel = existing.into();
            apply_source_fields(&mut movie, record);

            if movie.is_changed() {
                movie
                    .update(conn)
                    .await
                    .map_err(|e| AppError::persistence(format!("movie {} update", record.id), e))?;
            }
            Ok((id, false))
        }
    }
}

fn apply_source_fields(movie: &mut MovieActiveModel, record: &MovieRecord) {
    movie.title = Set(record.title.clone());
    movie.overview = Set(record.overview.clone());
    movie.release_date = Set(record.release_date);
    movie.poster_path = Set(record.poster_path.clone());
    movie.tmdb_vote_average = Set(record.vote_average);
    movie.tmdb_vote_count = Set(record.vote_count);
    movie.adult = Set(record.adult);
    movie.revenue = Set(record.revenue);
}

async fn replace_genre_links<C: ConnectionTrait>(conn: &C, movie_id: i32, genre_ids: &BTreeSet<i32>) -> Result<()> {
    MovieGenreEntity::delete_many()
        .filter(MovieGenreColumn::MovieId.eq(movie_id))
        .exec(conn)
        .await
        .map_err(|e| AppError::persistence(format!("movie {} genre unlink", movie_id), e))?;

    if genre_ids.is_empty() {
        return Ok(());
    }

    let links = genre_ids.iter().map(|&genre_id| MovieGenreActiveModel {
        movie_id: Set(movie_id),
        genre_id: Set(genre_id),
    });

    MovieGenreEntity::insert_many(links)
        .exec_without_returning(conn)
        .await
        .map_err(|e| AppError::persistence(format!("movie {} genre link", movie_id), e))?;

    Ok(())
}

async fn replace_actor_links<C: ConnectionTrait>(conn: &C, movie_id: i32, actor_ids: &BTreeSet<i32>) -> Result<()> {
    MovieActorEntity::delete_many()
        .filter(MovieActorColumn::MovieId.eq(movie_id))
        .exec(conn)
        .await
        .map_err(|e| AppError::persistence(format!("movie {} actor unlink", movie_id), e))?;

    if actor_ids.is_empty() {
        return Ok(());
    }

    let links = actor_ids.iter().map(|&actor_id| MovieActorActiveModel {
        movie_id: Set(movie_id),
        actor_id: Set(actor_id),
    });

    MovieActorEntity::insert_many(links)
        .exec_without_returning(conn)
        .await
        .map_err(|e| AppError::persistence(format!("movie {} actor link", movie_id), e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;
    use crate::records::Credits;
    use sea_orm::{ModelTrait, PaginatorTrait};

    fn genre(id: i64, name: &str) -> GenreRecord {
        GenreRecord { id, name: name.to_string() }
    }

    fn actor(id: i64, name: &str) -> ActorRecord {
        ActorRecord {
            id,
            name: name.to_string(),
            gender: 2,
            profile_path: Some(format!("/{}.jpg", id)),
        }
    }

    fn movie(id: i64, title: &str, genres: Vec<GenreRecord>, cast: Vec<ActorRecord>) -> MovieRecord {
        MovieRecord {
            id,
            title: title.to_string(),
            overview: format!("{} overview", title),
            release_date: chrono::NaiveDate::from_ymd_opt(2001, 5, 4),
            poster_path: Some(format!("/poster-{}.jpg", id)),
            vote_average: 7.5,
            vote_count: 1200,
            adult: false,
            revenue: 1_000_000,
            genres,
            credits: Credits { cast },
        }
    }

    fn materializer(pool: &DbPool) -> Materializer {
        Materializer::new(pool.clone(), Duration::from_secs(5))
    }

    async fn movie_by_tmdb(pool: &DbPool, tmdb_id: i64) -> Option<Movie> {
        MovieEntity::find()
            .filter(MovieColumn::TmdbId.eq(tmdb_id))
            .one(pool.read())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_creates_movies_and_links() {
        let pool = memory_pool().await;
        let batch = vec![movie(
            603,
            "The Matrix",
            vec![genre(28, "Action"), genre(878, "Science Fiction")],
            vec![actor(6384, "Keanu Reeves"), actor(2975, "Laurence Fishburne")],
        )];

        let summary = materializer(&pool).ingest_batch(&batch).await.unwrap();
        assert_eq!(summary, IngestSummary { movies_created: 1, movies_updated: 0 });

        let stored = movie_by_tmdb(&pool, 603).await.unwrap();
        assert_eq!(stored.title, "The Matrix");
        assert_eq!(stored.tmdb_vote_count, 1200);
        assert_eq!(stored.vote_count, 0);
        assert_eq!(stored.vote_average, 0.0);

        let genres = stored.find_related(GenreEntity).all(pool.read()).await.unwrap();
        let actors = stored.find_related(ActorEntity).all(pool.read()).await.unwrap();
        assert_eq!(genres.len(), 2);
        assert_eq!(actors.len(), 2);
    }

    #[tokio::test]
    async fn test_replay_keeps_surrogate_key_and_local_votes() {
        let pool = memory_pool().await;
        let sink = materializer(&pool);
        let batch = vec![movie(550, "Fight Club", vec![genre(18, "Drama")], vec![actor(819, "Edward Norton")])];

        sink.ingest_batch(&batch).await.unwrap();
        let first = movie_by_tmdb(&pool, 550).await.unwrap();

        // Local votes accumulated between the two deliveries
        let mut voted: MovieActiveModel = first.clone().into();
        voted.vote_average = Set(9.0);
        voted.vote_count = Set(4);
        voted.update(pool.write()).await.unwrap();

        let mut replay = batch.clone();
        replay[0].title = "Fight Club (Remastered)".to_string();
        replay[0].vote_count = 99_999;

        let summary = sink.ingest_batch(&replay).await.unwrap();
        assert_eq!(summary, IngestSummary { movies_created: 0, movies_updated: 1 });

        let second = movie_by_tmdb(&pool, 550).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.title, "Fight Club (Remastered)");
        assert_eq!(second.tmdb_vote_count, 99_999);
        assert_eq!(second.vote_count, 4);
        assert_eq!(second.vote_average, 9.0);

        assert_eq!(MovieEntity::find().count(pool.read()).await.unwrap(), 1);
        assert_eq!(GenreEntity::find().count(pool.read()).await.unwrap(), 1);
        assert_eq!(ActorEntity::find().count(pool.read()).await.unwrap(), 1);
        assert_eq!(MovieGenreEntity::find().count(pool.read()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shared_genre_stored_once() {
        let pool = memory_pool().await;
        let batch = vec![
            movie(1, "First", vec![genre(28, "Action")], vec![]),
            movie(2, "Second", vec![genre(28, "Action"), genre(12, "Adventure")], vec![]),
        ];

        materializer(&pool).ingest_batch(&batch).await.unwrap();

        let action = GenreEntity::find()
            .filter(GenreColumn::TmdbId.eq(28))
            .all(pool.read())
            .await
            .unwrap();
        assert_eq!(action.len(), 1);

        let linked = action[0].find_related(MovieEntity).all(pool.read()).await.unwrap();
        let mut titles: Vec<_> = linked.into_iter().map(|m| m.title).collect();
        titles.sort();
        assert_eq!(titles, vec!["First", "Second"]);
    }

    #[tokio::test]
    async fn test_reingest_replaces_associations() {
        let pool = memory_pool().await;
        let sink = materializer(&pool);

        sink.ingest_batch(&[movie(
            10,
            "Shifting",
            vec![genre(28, "Action"), genre(35, "Comedy")],
            vec![actor(1, "Old Lead"), actor(2, "Support")],
        )])
        .await
        .unwrap();

        sink.ingest_batch(&[movie(10, "Shifting", vec![genre(18, "Drama")], vec![actor(2, "Support")])])
            .await
            .unwrap();

        let stored = movie_by_tmdb(&pool, 10).await.unwrap();
        let genres: Vec<i64> = stored
            .find_related(GenreEntity)
            .all(pool.read())
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.tmdb_id)
            .collect();
        let actors: Vec<i64> = stored
            .find_related(ActorEntity)
            .all(pool.read())
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.tmdb_id)
            .collect();

        assert_eq!(genres, vec![18]);
        assert_eq!(actors, vec![2]);
        // Dropped genres stay in the catalogue, only the links go
        assert_eq!(GenreEntity::find().count(pool.read()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_existing_actor_attributes_not_refreshed() {
        let pool = memory_pool().await;
        let sink = materializer(&pool);

        sink.ingest_batch(&[movie(20, "One", vec![], vec![actor(77, "Original Name")])])
            .await
            .unwrap();

        let mut renamed = actor(77, "New Name");
        renamed.profile_path = None;
        sink.ingest_batch(&[movie(21, "Two", vec![], vec![renamed])]).await.unwrap();

        let stored = ActorEntity::find()
            .filter(ActorColumn::TmdbId.eq(77))
            .one(pool.read())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.name, "Original Name");
        assert_eq!(stored.profile_path.as_deref(), Some("/77.jpg"));
    }

    #[tokio::test]
    async fn test_duplicate_refs_within_movie_collapse() {
        let pool = memory_pool().await;
        let batch = vec![movie(
            30,
            "Doubled",
            vec![genre(28, "Action"), genre(28, "Action")],
            vec![actor(5, "Twin"), actor(5, "Twin")],
        )];

        materializer(&pool).ingest_batch(&batch).await.unwrap();

        assert_eq!(MovieGenreEntity::find().count(pool.read()).await.unwrap(), 1);
        assert_eq!(MovieActorEntity::find().count(pool.read()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_mid_batch_rolls_back_everything() {
        let pool = memory_pool().await;

        // Second movie carries a genre whose name collides with a different
        // external id, violating the unique name constraint.
        let batch = vec![
            movie(100, "Kept?", vec![genre(28, "Action")], vec![actor(1, "A")]),
            movie(101, "Breaks", vec![genre(9999, "Action")], vec![]),
            movie(102, "Never Reached", vec![], vec![]),
        ];

        let err = materializer(&pool).ingest_batch(&batch).await.unwrap_err();
        match err {
            AppError::Persistence { step, .. } => assert!(step.contains("genre 9999")),
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(MovieEntity::find().count(pool.read()).await.unwrap(), 0);
        assert_eq!(GenreEntity::find().count(pool.read()).await.unwrap(), 0);
        assert_eq!(ActorEntity::find().count(pool.read()).await.unwrap(), 0);
        assert_eq!(MovieGenreEntity::find().count(pool.read()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let pool = memory_pool().await;
        let summary = materializer(&pool).ingest_batch(&[]).await.unwrap();
        assert_eq!(summary.total(), 0);
    }
}
