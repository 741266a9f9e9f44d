//! Movie records as they travel from the metadata source to the store
//!
//! The same document shape is decoded from TMDB responses and carried over
//! the transport channel as a JSON array: genres inline, actors under a
//! `credits.cast` wrapper.

use crate::errors::{AppError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// One movie as reported by the source, identified by its external id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    /// External (TMDB) identifier, the dedup key
    pub id: i64,

    pub title: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub overview: String,

    #[serde(default, with = "release_date")]
    pub release_date: Option<NaiveDate>,

    #[serde(default)]
    pub poster_path: Option<String>,

    /// Source-reported aggregate, read-only downstream
    #[serde(default, deserialize_with = "null_as_default")]
    pub vote_average: f64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub vote_count: i64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub adult: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    pub revenue: i64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub genres: Vec<GenreRecord>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub credits: Credits,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credits {
    #[serde(default, deserialize_with = "null_as_default")]
    pub cast: Vec<ActorRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenreRecord {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorRecord {
    pub id: i64,
    pub name: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub gender: i32,

    #[serde(default)]
    pub profile_path: Option<String>,
}

impl MovieRecord {
    pub fn actors(&self) -> &[ActorRecord] {
        &self.credits.cast
    }
}

/// Serialize a batch into the channel payload
pub fn encode_batch(batch: &[MovieRecord]) -> Result<Vec<u8>> {
    serde_json::to_vec(batch).map_err(|e| AppError::Decode {
        message: format!("Failed to encode batch: {}", e),
    })
}

/// Parse a channel payload back into records
pub fn decode_batch(payload: &[u8]) -> Result<Vec<MovieRecord>> {
    serde_json::from_slice(payload).map_err(|e| AppError::Decode {
        message: format!("Failed to decode batch: {}", e),
    })
}

/// Parse a single source document
pub fn decode_movie(body: &[u8]) -> Result<MovieRecord> {
    serde_json::from_slice(body).map_err(|e| AppError::Decode {
        message: format!("Failed to decode movie: {}", e),
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `YYYY-MM-DD`, with an empty string meaning "no date"
mod release_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S>(date: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(date) => serializer.serialize_str(&date.format(FORMAT).to_string()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => NaiveDate::parse_from_str(value, FORMAT)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
