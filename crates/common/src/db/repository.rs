//! Queries for the interactive API
//!
//! Writes to movies, genres and actors go through the materializer; writes
//! to ratings go through the vote aggregator. Reviews carry no aggregate and
//! are written here directly.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{classify_db_error, AppError, Result};
use sea_orm::sea_query::{Expr, Func, LikeExpr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};

/// A movie with its genre and actor sets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieDetails {
    #[serde(flatten)]
    pub movie: Movie,
    pub genres: Vec<Genre>,
    pub actors: Vec<Actor>,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Movie Operations
    // ========================================================================

    /// Find a movie by surrogate key, with its associations
    pub async fn find_movie(&self, id: i32) -> Result<Option<MovieDetails>> {
        let Some(movie) = MovieEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(|e| classify_db_error(e, "movie", id))?
        else {
            return Ok(None);
        };

        let genres = movie
            .find_related(GenreEntity)
            .order_by_asc(GenreColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(|e| classify_db_error(e, "movie", id))?;

        let actors = movie
            .find_related(ActorEntity)
            .order_by_asc(ActorColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(|e| classify_db_error(e, "movie", id))?;

        Ok(Some(MovieDetails { movie, genres, actors }))
    }

    /// Find a movie by its external id
    pub async fn find_movie_by_tmdb_id(&self, tmdb_id: i64) -> Result<Option<Movie>> {
        MovieEntity::find()
            .filter(MovieColumn::TmdbId.eq(tmdb_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Case-insensitive substring match on the title
    pub async fn search_movies_by_title(&self, query: &str, limit: u64) -> Result<Vec<Movie>> {
        let pattern = format!("%{}%", escape_like(&query.to_lowercase()));

        MovieEntity::find()
            .filter(
                Expr::expr(Func::lower(Expr::col(MovieColumn::Title)))
                    .like(LikeExpr::new(pattern).escape('\\')),
            )
            .order_by_asc(MovieColumn::Title)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Movies ranked by the source-reported vote count, then average
    pub async fn popular_movies(&self, offset: u64, limit: u64) -> Result<Vec<Movie>> {
        MovieEntity::find()
            .order_by_desc(MovieColumn::TmdbVoteCount)
            .order_by_desc(MovieColumn::TmdbVoteAverage)
            .order_by_asc(MovieColumn::Id)
            .offset(offset)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Actor Operations
    // ========================================================================

    pub async fn find_actor(&self, id: i32) -> Result<Option<Actor>> {
        ActorEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(|e| classify_db_error(e, "actor", id))
    }

    /// Case-insensitive substring match on the actor name
    pub async fn search_actors_by_name(&self, query: &str, limit: u64) -> Result<Vec<Actor>> {
        let pattern = format!("%{}%", escape_like(&query.to_lowercase()));

        ActorEntity::find()
            .filter(
                Expr::expr(Func::lower(Expr::col(ActorColumn::Name)))
                    .like(LikeExpr::new(pattern).escape('\\')),
            )
            .order_by_asc(ActorColumn::Name)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Rating Operations
    // ========================================================================

    pub async fn ratings_for_user(&self, user_id: i32) -> Result<Vec<Rating>> {
        RatingEntity::find()
            .filter(RatingColumn::UserId.eq(user_id))
            .order_by_asc(RatingColumn::MovieId)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn ratings_for_movie(&self, movie_id: i32) -> Result<Vec<Rating>> {
        RatingEntity::find()
            .filter(RatingColumn::MovieId.eq(movie_id))
            .order_by_asc(RatingColumn::UserId)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Review Operations
    // ========================================================================

    /// Create or replace the user's review of a movie
    pub async fn upsert_review(
        &self,
        user_id: i32,
        movie_id: i32,
        liked: bool,
        title: &str,
        text: &str,
    ) -> Result<Review> {
        let conn = self.pool.write();

        MovieEntity::find_by_id(movie_id)
            .one(conn)
            .await
            .map_err(|e| classify_db_error(e, "movie", movie_id))?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "movie".to_string(),
                id: movie_id.to_string(),
            })?;

        let review = Review {
            user_id,
            movie_id,
            liked,
            title: title.to_string(),
            text: text.to_string(),
        };

        ReviewEntity::insert(ReviewActiveModel {
            user_id: Set(user_id),
            movie_id: Set(movie_id),
            liked: Set(liked),
            title: Set(review.title.clone()),
            text: Set(review.text.clone()),
        })
        .on_conflict(
            OnConflict::columns([ReviewColumn::UserId, ReviewColumn::MovieId])
                .update_columns([ReviewColumn::Liked, ReviewColumn::Title, ReviewColumn::Text])
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await
        .map_err(|e| classify_db_error(e, "review", movie_id))?;

        Ok(review)
    }

    /// Delete the user's review of a movie
    pub async fn delete_review(&self, user_id: i32, movie_id: i32) -> Result<()> {
        let result = ReviewEntity::delete_by_id((user_id, movie_id))
            .exec(self.pool.write())
            .await
            .map_err(|e| classify_db_error(e, "review", movie_id))?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound {
                resource_type: "review".to_string(),
                id: format!("{}/{}", user_id, movie_id),
            });
        }
        Ok(())
    }

    pub async fn reviews_for_movie(&self, movie_id: i32) -> Result<Vec<Review>> {
        ReviewEntity::find()
            .filter(ReviewColumn::MovieId.eq(movie_id))
            .order_by_asc(ReviewColumn::UserId)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn reviews_for_user(&self, user_id: i32) -> Result<Vec<Review>> {
        ReviewEntity::find()
            .filter(ReviewColumn::UserId.eq(user_id))
            .order_by_asc(ReviewColumn::MovieId)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;
    use crate::db::{Materializer, VoteAggregator};
    use crate::records::{ActorRecord, Credits, GenreRecord, MovieRecord};
    use std::time::Duration;

    fn record(id: i64, title: &str, vote_count: i64, vote_average: f64) -> MovieRecord {
        MovieRecord {
            id,
            title: title.to_string(),
            overview: String::new(),
            release_date: None,
            poster_path: None,
            vote_average,
            vote_count,
            adult: false,
            revenue: 0,
            genres: vec![
                GenreRecord { id: 878, name: "Science Fiction".into() },
                GenreRecord { id: 28, name: "Action".into() },
            ],
            credits: Credits {
                cast: vec![ActorRecord {
                    id: id * 10,
                    name: format!("Lead of {}", title),
                    gender: 1,
                    profile_path: None,
                }],
            },
        }
    }

    async fn seeded() -> (DbPool, Repository) {
        let pool = memory_pool().await;
        let batch = vec![
            record(1, "Alien", 9000, 8.1),
            record(2, "Aliens", 9000, 7.9),
            record(3, "Solaris", 1500, 7.0),
            record(4, "100% Pure", 10, 5.0),
        ];
        Materializer::new(pool.clone(), Duration::from_secs(5))
            .ingest_batch(&batch)
            .await
            .unwrap();
        (pool.clone(), Repository::new(pool))
    }

    #[tokio::test]
    async fn test_find_movie_with_relations() {
        let (_, repo) = seeded().await;
        let alien = repo.find_movie_by_tmdb_id(1).await.unwrap().unwrap();

        let details = repo.find_movie(alien.id).await.unwrap().unwrap();
        assert_eq!(details.movie.title, "Alien");
        let genre_names: Vec<_> = details.genres.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(genre_names, vec!["Action", "Science Fiction"]);
        assert_eq!(details.actors.len(), 1);

        assert!(repo.find_movie(9999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive() {
        let (_, repo) = seeded().await;

        let titles: Vec<_> = repo
            .search_movies_by_title("ALIEN", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert_eq!(titles, vec!["Alien", "Aliens"]);

        // Wildcards in the query are matched literally
        let literal = repo.search_movies_by_title("0%", 10).await.unwrap();
        assert_eq!(literal.len(), 1);
        assert_eq!(literal[0].title, "100% Pure");
    }

    #[tokio::test]
    async fn test_popular_orders_by_count_then_average() {
        let (_, repo) = seeded().await;

        let titles: Vec<_> = repo
            .popular_movies(0, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert_eq!(titles, vec!["Alien", "Aliens", "Solaris"]);

        let rest = repo.popular_movies(3, 3).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].title, "100% Pure");
    }

    #[tokio::test]
    async fn test_find_actor() {
        let (_, repo) = seeded().await;
        let details = repo
            .find_movie(repo.find_movie_by_tmdb_id(3).await.unwrap().unwrap().id)
            .await
            .unwrap()
            .unwrap();

        let actor = repo.find_actor(details.actors[0].id).await.unwrap().unwrap();
        assert_eq!(actor.tmdb_id, 30);
        assert_eq!(actor.name, "Lead of Solaris");
    }

    #[tokio::test]
    async fn test_ratings_by_user_and_movie() {
        let (pool, repo) = seeded().await;
        let votes = VoteAggregator::new(pool);
        let alien = repo.find_movie_by_tmdb_id(1).await.unwrap().unwrap();
        let solaris = repo.find_movie_by_tmdb_id(3).await.unwrap().unwrap();

        votes.record_rating(1, alien.id, 9.0).await.unwrap();
        votes.record_rating(1, solaris.id, 6.0).await.unwrap();
        votes.record_rating(2, alien.id, 7.0).await.unwrap();

        assert_eq!(repo.ratings_for_user(1).await.unwrap().len(), 2);

        let for_alien = repo.ratings_for_movie(alien.id).await.unwrap();
        let users: Vec<_> = for_alien.iter().map(|r| r.user_id).collect();
        assert_eq!(users, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_search_actors_by_name() {
        let (_, repo) = seeded().await;

        let names: Vec<_> = repo
            .search_actors_by_name("lead of alien", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["Lead of Alien", "Lead of Aliens"]);

        assert!(repo.search_actors_by_name("nobody", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_review_upsert_list_and_delete() {
        let (_, repo) = seeded().await;
        let alien = repo.find_movie_by_tmdb_id(1).await.unwrap().unwrap();
        let solaris = repo.find_movie_by_tmdb_id(3).await.unwrap().unwrap();

        repo.upsert_review(1, alien.id, true, "Great", "Tense throughout").await.unwrap();
        repo.upsert_review(2, alien.id, false, "Meh", "Too slow").await.unwrap();
        repo.upsert_review(1, solaris.id, true, "Moody", "Long but good").await.unwrap();

        // Second write for the same (user, movie) replaces the first
        let updated = repo
            .upsert_review(1, alien.id, false, "Changed my mind", "Aged badly")
            .await
            .unwrap();
        assert!(!updated.liked);

        let for_alien = repo.reviews_for_movie(alien.id).await.unwrap();
        assert_eq!(for_alien.len(), 2);
        assert_eq!(for_alien[0].user_id, 1);
        assert_eq!(for_alien[0].title, "Changed my mind");
        assert!(!for_alien[0].liked);

        assert_eq!(repo.reviews_for_user(1).await.unwrap().len(), 2);

        repo.delete_review(1, alien.id).await.unwrap();
        assert_eq!(repo.reviews_for_user(1).await.unwrap().len(), 1);

        let err = tokio_test::assert_err!(repo.delete_review(1, alien.id).await);
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_review_for_missing_movie_is_not_found() {
        let (_, repo) = seeded().await;

        let err = repo.upsert_review(1, 9999, true, "t", "x").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
        assert!(repo.reviews_for_user(1).await.unwrap().is_empty());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
