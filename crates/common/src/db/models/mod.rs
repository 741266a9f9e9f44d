//! SeaORM entity models
//!
//! Every table carries a store-assigned surrogate key; relationship columns
//! reference the surrogate key, never the external (TMDB) id.

mod movie;
mod genre;
mod actor;
mod movie_genre;
mod movie_actor;
mod rating;
mod review;

pub use movie::{
    Entity as MovieEntity,
    Model as Movie,
    ActiveModel as MovieActiveModel,
    Column as MovieColumn,
};

pub use genre::{
    Entity as GenreEntity,
    Model as Genre,
    ActiveModel as GenreActiveModel,
    Column as GenreColumn,
};

pub use actor::{
    Entity as ActorEntity,
    Model as Actor,
    ActiveModel as ActorActiveModel,
    Column as ActorColumn,
};

pub use movie_genre::{
    Entity as MovieGenreEntity,
    Model as MovieGenre,
    ActiveModel as MovieGenreActiveModel,
    Column as MovieGenreColumn,
};

pub use movie_actor::{
    Entity as MovieActorEntity,
    Model as MovieActor,
    ActiveModel as MovieActorActiveModel,
    Column as MovieActorColumn,
};

pub use rating::{
    Entity as RatingEntity,
    Model as Rating,
    ActiveModel as RatingActiveModel,
    Column as RatingColumn,
};

pub use review::{
    Entity as ReviewEntity,
    Model as Review,
    ActiveModel as ReviewActiveModel,
    Column as ReviewColumn,
};
