//! Movie entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "movies")]
pub struct Model {
    /// Surrogate key, referenced by every relationship column
    #[sea_orm(primary_key)]
    pub id: i32,

    /// External (TMDB) identifier
    #[sea_orm(unique)]
    pub tmdb_id: i64,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub overview: String,

    pub release_date: Option<Date>,

    #[sea_orm(column_type = "Text", nullable)]
    pub poster_path: Option<String>,

    /// Source-reported aggregate
    pub tmdb_vote_average: f64,

    pub tmdb_vote_count: i64,

    /// Locally accumulated aggregate, owned by the vote aggregator
    pub vote_average: f64,

    pub vote_count: i64,

    pub adult: bool,

    pub revenue: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::movie_genre::Entity")]
    MovieGenres,

    #[sea_orm(has_many = "super::movie_actor::Entity")]
    MovieActors,

    #[sea_orm(has_many = "super::rating::Entity")]
    Ratings,

    #[sea_orm(has_many = "super::review::Entity")]
    Reviews,
}

impl Related<super::genre::Entity> for Entity {
    fn to() -> RelationDef {
        super::movie_genre::Relation::Genre.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::movie_genre::Relation::Movie.def().rev())
    }
}

impl Related<super::actor::Entity> for Entity {
    fn to() -> RelationDef {
        super::movie_actor::Relation::Actor.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::movie_actor::Relation::Movie.def().rev())
    }
}

impl Related<super::rating::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Ratings.def()
    }
}

impl Related<super::review::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reviews.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
