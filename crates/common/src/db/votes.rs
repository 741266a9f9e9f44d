//! Local vote aggregate maintenance
//!
//! Every transition runs in its own transaction holding an exclusive lock on
//! the movie row, so concurrent votes on one movie serialise while votes on
//! different movies proceed independently.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{classify_db_error, AppError, Result};
use crate::metrics;
use sea_orm::{
    ActiveModelTrait, DatabaseTransaction, EntityTrait, QuerySelect, Set, TransactionTrait,
};
use tracing::{debug, instrument};

/// Lowest accepted rating value
pub const MIN_RATING: f64 = 0.0;

/// Highest accepted rating value
pub const MAX_RATING: f64 = 10.0;

/// Running average and count for one movie
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoteTally {
    pub average: f64,
    pub count: i64,
}

impl VoteTally {
    pub fn add(self, value: f64) -> Self {
        let count = self.count + 1;
        Self {
            average: (self.average * self.count as f64 + value) / count as f64,
            count,
        }
    }

    /// Fails when there is no vote left to remove; the average resets to 0
    /// once the last vote is gone.
    pub fn remove(self, value: f64) -> Result<Self> {
        if self.count <= 0 {
            return Err(AppError::InvalidState {
                message: format!("cannot remove a vote from a tally of {}", self.count),
            });
        }

        let count = self.count - 1;
        let average = if count == 0 {
            0.0
        } else {
            (self.average * self.count as f64 - value) / count as f64
        };

        Ok(Self { average, count })
    }
}

impl From<&Movie> for VoteTally {
    fn from(movie: &Movie) -> Self {
        Self {
            average: movie.vote_average,
            count: movie.vote_count,
        }
    }
}

/// Shared aggregator, constructed once per process
#[derive(Clone)]
pub struct VoteAggregator {
    pool: DbPool,
}

impl VoteAggregator {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Values outside the rating range are rejected before the row is locked.
    #[instrument(skip(self))]
    pub async fn add_vote(&self, movie_id: i32, value: f64) -> Result<VoteTally> {
        let result = match validate_rating(value) {
            Ok(()) => self.transition(movie_id, |tally| Ok(tally.add(value))).await,
            Err(e) => Err(e),
        };
        metrics::record_vote("add", result.is_ok());
        result
    }

    #[instrument(skip(self))]
    pub async fn remove_vote(&self, movie_id: i32, value: f64) -> Result<VoteTally> {
        let result = match validate_rating(value) {
            Ok(()) => self.transition(movie_id, |tally| tally.remove(value)).await,
            Err(e) => Err(e),
        };
        metrics::record_vote("remove", result.is_ok());
        result
    }

    /// Create or replace a user's rating and fold it into the aggregate.
    ///
    /// Replacing a rating removes the previous value before adding the new
    /// one, so a user is only ever counted once per movie.
    #[instrument(skip(self))]
    pub async fn record_rating(&self, user_id: i32, movie_id: i32, value: f64) -> Result<Rating> {
        let result = self.record_rating_inner(user_id, movie_id, value).await;
        metrics::record_vote("rate", result.is_ok());
        result
    }

    async fn record_rating_inner(&self, user_id: i32, movie_id: i32, value: f64) -> Result<Rating> {
        validate_rating(value)?;
        let txn = self.begin().await?;

        let movie = lock_movie(&txn, movie_id).await?;
        let tally = VoteTally::from(&movie);

        let previous = RatingEntity::find_by_id((user_id, movie_id))
            .one(&txn)
            .await
            .map_err(|e| classify_db_error(e, "rating", movie_id))?;

        let (rating, tally) = match previous {
            None => {
                let rating = RatingActiveModel {
                    user_id: Set(user_id),
                    movie_id: Set(movie_id),
                    rating: Set(value),
                }
                .insert(&txn)
                .await
                .map_err(|e| classify_db_error(e, "rating", movie_id))?;

                (rating, tally.add(value))
            }
            Some(previous) => {
                let old_value = previous.rating;
                let mut rating: RatingActiveModel = previous.into();
                rating.rating = Set(value);
                let rating = rating
                    .update(&txn)
                    .await
                    .map_err(|e| classify_db_error(e, "rating", movie_id))?;

                (rating, tally.remove(old_value)?.add(value))
            }
        };

        store_tally(&txn, movie, tally).await?;
        self.commit(txn).await?;

        debug!(user_id, movie_id, value, count = tally.count, "Rating recorded");
        Ok(rating)
    }

    /// Delete a user's rating and take it out of the aggregate
    #[instrument(skip(self))]
    pub async fn retract_rating(&self, user_id: i32, movie_id: i32) -> Result<Rating> {
        let result = self.retract_rating_inner(user_id, movie_id).await;
        metrics::record_vote("retract", result.is_ok());
        result
    }

    async fn retract_rating_inner(&self, user_id: i32, movie_id: i32) -> Result<Rating> {
        let txn = self.begin().await?;

        let movie = lock_movie(&txn, movie_id).await?;

        let rating = RatingEntity::find_by_id((user_id, movie_id))
            .one(&txn)
            .await
            .map_err(|e| classify_db_error(e, "rating", movie_id))?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "rating".to_string(),
                id: format!("{}/{}", user_id, movie_id),
            })?;

        let tally = VoteTally::from(&movie).remove(rating.rating)?;

        RatingEntity::delete_by_id((user_id, movie_id))
            .exec(&txn)
            .await
            .map_err(|e| classify_db_error(e, "rating", movie_id))?;

        store_tally(&txn, movie, tally).await?;
        self.commit(txn).await?;

        debug!(user_id, movie_id, count = tally.count, "Rating retracted");
        Ok(rating)
    }

    /// Lock, transform, write back. An error leaves the row untouched.
    async fn transition<F>(&self, movie_id: i32, apply: F) -> Result<VoteTally>
    where
        F: FnOnce(VoteTally) -> Result<VoteTally>,
    {
        let txn = self.begin().await?;

        let movie = lock_movie(&txn, movie_id).await?;
        let tally = apply(VoteTally::from(&movie))?;

        store_tally(&txn, movie, tally).await?;
        self.commit(txn).await?;

        Ok(tally)
    }

    async fn begin(&self) -> Result<DatabaseTransaction> {
        self.pool
            .write()
            .begin()
            .await
            .map_err(|e| AppError::Unexpected {
                message: format!("Failed to begin vote transaction: {}", e),
            })
    }

    async fn commit(&self, txn: DatabaseTransaction) -> Result<()> {
        txn.commit().await.map_err(|e| AppError::Unexpected {
            message: format!("Failed to commit vote transaction: {}", e),
        })
    }
}

fn validate_rating(value: f64) -> Result<()> {
    if !(MIN_RATING..=MAX_RATING).contains(&value) {
        return Err(AppError::InvalidInput {
            message: format!(
                "rating must be between {} and {}, got {}",
                MIN_RATING, MAX_RATING, value
            ),
        });
    }
    Ok(())
}

/// `SELECT ... FOR UPDATE` on the movie row
async fn lock_movie(txn: &DatabaseTransaction, movie_id: i32) -> Result<Movie> {
    MovieEntity::find_by_id(movie_id)
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(|e| classify_db_error(e, "movie", movie_id))?
        .ok_or_else(|| AppError::NotFound {
            resource_type: "movie".to_string(),
            id: movie_id.to_string(),
        })
}

async fn store_tally(txn: &DatabaseTransaction, movie: Movie, tally: VoteTally) -> Result<()> {
    let id = movie.id;
    let mut movie: MovieActiveModel = movie.into();
    movie.vote_average = Set(tally.average);
    movie.vote_count = Set(tally.count);

    movie
        .update(txn)
        .await
        .map_err(|e| classify_db_error(e, "movie", id))?;
    Ok(())
}
