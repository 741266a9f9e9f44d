//! TMDB metadata source
//!
//! One authenticated GET per movie id, credits appended to the document.

use async_trait::async_trait;
use cinema_common::config::TmdbConfig;
use cinema_common::errors::{AppError, Result};
use cinema_common::records::{decode_movie, MovieRecord};
use reqwest::header::ACCEPT;
use std::time::Duration;
use tracing::debug;

/// Anything that can produce one movie document by numeric id
#[async_trait]
pub trait MovieSource: Send + Sync {
    async fn fetch_movie(&self, id: i64) -> Result<MovieRecord>;
}

/// HTTP client for the TMDB v3 movie endpoint
pub struct TmdbClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
    language: String,
    timeout: Duration,
}

impl TmdbClient {
    pub fn new(config: &TmdbConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone(),
            language: config.language.clone(),
            timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    fn movie_url(&self, id: i64) -> String {
        format!("{}/3/movie/{}", self.base_url, id)
    }
}

#[async_trait]
impl MovieSource for TmdbClient {
    async fn fetch_movie(&self, id: i64) -> Result<MovieRecord> {
        let response = self
            .client
            .get(self.movie_url(id))
            .query(&[("append_to_response", "credits"), ("language", self.language.as_str())])
            .header(ACCEPT, "application/json")
            .bearer_auth(&self.bearer_token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AppError::TransientFetch {
                id,
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::TransientFetch {
                id,
                message: format!("API error {}: {}", status, body),
            });
        }

        let body = response.bytes().await.map_err(|e| AppError::TransientFetch {
            id,
            message: format!("Failed to read body: {}", e),
        })?;

        debug!(id, bytes = body.len(), "Movie document fetched");
        decode_movie(&body)
    }
}
