//! Cinema Gateway
//!
//! Hosts the subscribe side of the movie pipeline and the interactive API.
//! Handles:
//! - Redis subscription feeding the batch materializer
//! - Movie and actor reads (details, search, popularity)
//! - Rating create/delete through the shared vote aggregator
//! - Per-user movie reviews
//! - Observability (logging, metrics)

mod handlers;
mod poller;

use axum::{
    routing::{get, post},
    Router,
};
use cinema_common::{
    config::AppConfig,
    db::{schema, DbPool, Materializer, Repository, VoteAggregator},
    metrics,
    transport::RedisSubscriber,
    VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::poller::{Poller, PollerStats};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repo: Repository,
    pub votes: Arc<VoteAggregator>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, db: DbPool) -> Self {
        Self {
            config,
            repo: Repository::new(db.clone()),
            votes: Arc::new(VoteAggregator::new(db)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;
    let config = Arc::new(config);

    // Initialize tracing and metrics
    metrics::init_tracing(&config.observability);
    metrics::register_metrics();
    metrics::install_exporter(&config.observability)?;

    info!(
        service = %config.observability.service_name,
        "Starting Cinema Gateway v{}",
        VERSION
    );

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    if config.database.auto_migrate {
        schema::ensure_schema(db.write()).await?;
    }

    let state = AppState::new(config.clone(), db.clone());

    // Subscribe side of the pipeline
    let cancel = CancellationToken::new();
    let materializer = Arc::new(Materializer::new(db, config.materializer_timeout()));

    let (batches, subscriber_task) = RedisSubscriber::new(&config)?.spawn(cancel.clone());
    let poller_task = tokio::spawn(Poller::new(materializer).run(batches, cancel.clone()));

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background work; an in-flight batch finishes or hits its timeout
    cancel.cancel();
    if let Some(stats) =
        join_background(subscriber_task, poller_task, config.shutdown_timeout()).await
    {
        info!(
            ingested = stats.ingested,
            dropped = stats.dropped,
            "Server shutdown complete"
        );
    }

    Ok(())
}

/// Wait for the subscriber and poller to finish, logging any task failure.
/// Returns the poller's counters when it stopped cleanly in time.
async fn join_background(
    subscriber_task: JoinHandle<()>,
    poller_task: JoinHandle<PollerStats>,
    limit: Duration,
) -> Option<PollerStats> {
    let drain = async {
        if let Err(e) = subscriber_task.await {
            warn!(error = %e, "Subscriber task failed");
        }
        poller_task.await
    };

    match tokio::time::timeout(limit, drain).await {
        Ok(Ok(stats)) => Some(stats),
        Ok(Err(e)) => {
            warn!(error = %e, "Poller task failed");
            None
        }
        Err(_) => {
            warn!("Background tasks did not stop within the shutdown timeout");
            None
        }
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let timeout = TimeoutLayer::new(state.config.request_timeout());

    // API routes
    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Movie endpoints
        .route("/movies/search", get(handlers::movies::search_movies))
        .route("/movies/popular", get(handlers::movies::popular_movies))
        .route("/movies/{id}", get(handlers::movies::get_movie))

        // Rating endpoints
        .route(
            "/movies/{id}/rating",
            post(handlers::ratings::rate_movie).delete(handlers::ratings::delete_rating),
        )
        .route("/movies/{id}/ratings", get(handlers::ratings::movie_ratings))
        .route("/me/ratings", get(handlers::ratings::my_ratings))

        // Review endpoints
        .route(
            "/movies/{id}/review",
            post(handlers::reviews::post_review).delete(handlers::reviews::delete_review),
        )
        .route("/movies/{id}/reviews", get(handlers::reviews::movie_reviews))
        .route("/me/reviews", get(handlers::reviews::my_reviews))

        // Actor endpoints
        .route("/actors/search", get(handlers::actors::search_actors))
        .route("/actors/{id}", get(handlers::actors::get_actor));

    // Compose the app
    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(timeout)
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use cinema_common::records::{ActorRecord, Credits, GenreRecord, MovieRecord};
    use sea_orm::{ConnectOptions, Database};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn test_app() -> (Router, AppState) {
        let mut opts = ConnectOptions::new("sqlite::memory:");
        opts.max_connections(1).min_connections(1).sqlx_logging(false);
        let conn = Database::connect(opts).await.unwrap();
        schema::ensure_schema(&conn).await.unwrap();
        let db = DbPool::from_connection(conn);

        let batch = vec![MovieRecord {
            id: 603,
            title: "The Matrix".into(),
            overview: "Wake up, Neo.".into(),
            release_date: None,
            poster_path: None,
            vote_average: 8.2,
            vote_count: 24000,
            adult: false,
            revenue: 463_517_383,
            genres: vec![GenreRecord { id: 878, name: "Science Fiction".into() }],
            credits: Credits {
                cast: vec![ActorRecord {
                    id: 6384,
                    name: "Keanu Reeves".into(),
                    gender: 2,
                    profile_path: None,
                }],
            },
        }];
        Materializer::new(db.clone(), Duration::from_secs(5))
            .ingest_batch(&batch)
            .await
            .unwrap();

        let state = AppState::new(Arc::new(AppConfig::default()), db);
        (create_router(state.clone()), state)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn rate(movie_id: i32, user: &str, rating: f64) -> Request<Body> {
        Request::post(format!("/api/movies/{}/rating", movie_id))
            .header("content-type", "application/json")
            .header("x-user-id", user)
            .body(Body::from(format!(r#"{{"rating": {}}}"#, rating)))
            .unwrap()
    }

    async fn matrix_id(state: &AppState) -> i32 {
        state.repo.find_movie_by_tmdb_id(603).await.unwrap().unwrap().id
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let (app, _) = test_app().await;

        let (status, body) = send(&app, Request::get("/api/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = send(&app, Request::get("/api/ready").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"]["up"], true);
    }

    #[tokio::test]
    async fn test_get_movie_and_missing_movie() {
        let (app, state) = test_app().await;
        let id = matrix_id(&state).await;

        let (status, body) = send(
            &app,
            Request::get(format!("/api/movies/{}", id)).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "The Matrix");
        assert_eq!(body["genres"][0]["name"], "Science Fiction");

        let (status, body) = send(&app, Request::get("/api/movies/9999").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_search_and_popular() {
        let (app, _) = test_app().await;

        let (status, body) = send(
            &app,
            Request::get("/api/movies/search?title=matrix").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, _) = send(
            &app,
            Request::get("/api/movies/search?title=").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            Request::get("/api/movies/popular?limit=5").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["tmdb_id"], 603);
    }

    #[tokio::test]
    async fn test_rating_lifecycle_updates_local_votes() {
        let (app, state) = test_app().await;
        let id = matrix_id(&state).await;

        let (status, body) = send(&app, rate(id, "1", 9.0)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rating"], 9.0);

        let (status, _) = send(&app, rate(id, "2", 5.0)).await;
        assert_eq!(status, StatusCode::OK);

        // Re-rating replaces user 1's vote
        let (status, _) = send(&app, rate(id, "1", 7.0)).await;
        assert_eq!(status, StatusCode::OK);

        let movie = state.repo.find_movie(id).await.unwrap().unwrap().movie;
        assert_eq!(movie.vote_count, 2);
        assert!((movie.vote_average - 6.0).abs() < 1e-9);

        let (status, body) = send(
            &app,
            Request::delete(format!("/api/movies/{}/rating", id))
                .header("x-user-id", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rating"], 7.0);

        let (status, body) = send(
            &app,
            Request::get(format!("/api/movies/{}/ratings", id)).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["user_id"], 2);

        let movie = state.repo.find_movie(id).await.unwrap().unwrap().movie;
        assert_eq!(movie.vote_count, 1);
        assert!((movie.vote_average - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rating_rejections() {
        let (app, state) = test_app().await;
        let id = matrix_id(&state).await;

        let (status, _) = send(&app, rate(id, "not-a-user", 5.0)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, rate(id, "0", 5.0)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app, rate(id, "1", 10.5)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_INPUT");

        let (status, _) = send(&app, rate(9999, "1", 5.0)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            Request::delete(format!("/api/movies/{}/rating", id))
                .header("x-user-id", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            Request::get("/api/me/ratings")
                .header("x-user-id", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }

    fn review(movie_id: i32, user: &str, body: &str) -> Request<Body> {
        Request::post(format!("/api/movies/{}/review", movie_id))
            .header("content-type", "application/json")
            .header("x-user-id", user)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_review_lifecycle() {
        let (app, state) = test_app().await;
        let id = matrix_id(&state).await;

        let (status, body) = send(
            &app,
            review(id, "1", r#"{"liked": true, "title": "Classic", "text": "Still holds up"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Classic");

        let (status, _) = send(
            &app,
            review(id, "1", r#"{"liked": false, "title": "Dated", "text": "Less so now"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            Request::get(format!("/api/movies/{}/reviews", id)).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["liked"], false);
        assert_eq!(body[0]["title"], "Dated");

        // Reviews leave the vote aggregate alone
        let movie = state.repo.find_movie(id).await.unwrap().unwrap().movie;
        assert_eq!(movie.vote_count, 0);

        let delete = || {
            Request::delete(format!("/api/movies/{}/review", id))
                .header("x-user-id", "1")
                .body(Body::empty())
                .unwrap()
        };
        let (status, _) = send(&app, delete()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, delete()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            Request::get("/api/me/reviews")
                .header("x-user-id", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_review_rejections() {
        let (app, state) = test_app().await;
        let id = matrix_id(&state).await;
        let valid = r#"{"liked": true, "title": "Fine", "text": ""}"#;

        let (status, _) = send(&app, review(id, "nobody", valid)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app, review(id, "1", r#"{"liked": true, "title": "", "text": "x"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_INPUT");

        let (status, _) = send(&app, review(9999, "1", valid)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_actor_routes() {
        let (app, state) = test_app().await;
        let matrix = state.repo.find_movie(matrix_id(&state).await).await.unwrap().unwrap();
        let keanu = matrix.actors[0].id;

        let (status, body) = send(
            &app,
            Request::get(format!("/api/actors/{}", keanu)).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Keanu Reeves");
        assert_eq!(body["tmdb_id"], 6384);

        let (status, body) = send(&app, Request::get("/api/actors/9999").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let (status, body) = send(
            &app,
            Request::get("/api/actors/search?name=keanu").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_join_background_survives_subscriber_panic() {
        let subscriber: JoinHandle<()> = tokio::spawn(async { panic!("subscriber blew up") });
        let poller = tokio::spawn(async { PollerStats { ingested: 3, dropped: 1 } });

        let stats = join_background(subscriber, poller, Duration::from_secs(5)).await;
        assert_eq!(stats, Some(PollerStats { ingested: 3, dropped: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_background_gives_up_after_limit() {
        let subscriber = tokio::spawn(async {});
        let poller = tokio::spawn(async {
            std::future::pending::<()>().await;
            PollerStats::default()
        });

        let stats = join_background(subscriber, poller, Duration::from_secs(2)).await;
        assert_eq!(stats, None);
    }
}
