//! HTTP API over a bytes-valued [`AssetCache`].
//!
//! - GET /health
//! - GET /v1/assets?locator=...&persist=...
//! - GET /v1/cache/stats
//! - POST /v1/cache/flush

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::cache::coordinator::{AssetCache, ResolveOptions};
use crate::cache::locator::Locator;
use crate::cache::stats::CacheStatsSnapshot;
use crate::config::Config;
use crate::transfer::decoder::BytesDecoder;

/// Application state shared across handlers.
pub struct AppState {
    pub cache: AssetCache<BytesDecoder>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/assets", get(get_asset))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/v1/cache/flush", post(flush_cache))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AssetQuery {
    pub locator: String,
    #[serde(default)]
    pub persist: Option<bool>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStatsResponse,
}

/// Cache statistics response.
#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    #[serde(flatten)]
    pub counters: CacheStatsSnapshot,
    pub in_flight: usize,
    pub disk_bytes: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub removed: usize,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn get_asset(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssetQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let request_id = Uuid::new_v4().to_string();
    let locator = Locator::new(&query.locator);
    if locator.as_str().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let options = ResolveOptions {
        persist: query.persist.unwrap_or(state.config.cache.persist),
    };
    info!(request_id, locator = %locator, persist = options.persist, "Asset request");

    let (tx, rx) = oneshot::channel();
    state.cache.resolve_with_options(locator, options, move |asset| {
        let _ = tx.send(asset);
    });

    match rx.await {
        Ok(Some(asset)) => Ok((
            [(header::CONTENT_TYPE, "application/octet-stream")],
            Bytes::clone(&asset),
        )),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn stats_response(state: &AppState) -> CacheStatsResponse {
    let disk_bytes = match state.cache.storage() {
        Some(storage) => storage.disk_usage().await.ok(),
        None => None,
    };

    CacheStatsResponse {
        counters: state.cache.stats(),
        in_flight: state.cache.in_flight_count(),
        disk_bytes,
    }
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStatsResponse> {
    Json(stats_response(&state).await)
}

async fn flush_cache(State(state): State<Arc<AppState>>) -> Json<FlushResponse> {
    Json(FlushResponse {
        removed: state.cache.flush_memory(),
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        cache: stats_response(&state).await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::transfer::disk_io::StorageTier;
    use crate::transfer::fetcher::SchemeFetcher;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Router over a cache that serves files below `<tmp>/public`.
    async fn test_state(tmp: &TempDir) -> Arc<AppState> {
        let public = tmp.path().join("public");
        std::fs::create_dir_all(&public).unwrap();
        let fetch = FetchConfig {
            file_root: Some(public),
            ..Default::default()
        };

        let storage = StorageTier::new(tmp.path().join("cache")).await.unwrap();
        let fetcher = Arc::new(SchemeFetcher::new(&fetch).unwrap());
        let cache = AssetCache::builder(fetcher, BytesDecoder)
            .storage(storage)
            .build();

        let mut config = Config::default();
        config.fetch = fetch;
        Arc::new(AppState {
            cache,
            config: Arc::new(config),
            start_time: Instant::now(),
        })
    }

    async fn get_status(app: Router, locator: &str) -> StatusCode {
        let uri = format!("/v1/assets?locator={locator}");
        app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_get_asset_and_flush() {
        let tmp = TempDir::new().unwrap();
        let state = test_state(&tmp).await;
        std::fs::write(tmp.path().join("public/a.bin"), b"asset-bytes").unwrap();
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::get("/v1/assets?locator=a.bin")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"asset-bytes");
        assert_eq!(state.cache.stats().memory_entries, 1);

        let response = app
            .oneshot(
                Request::post("/v1/cache/flush")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.cache.stats().memory_entries, 0);
    }

    #[tokio::test]
    async fn test_missing_asset_is_404() {
        let tmp = TempDir::new().unwrap();
        let app = build_router(test_state(&tmp).await);

        assert_eq!(get_status(app, "nope.bin").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_files_outside_the_root_are_not_served() {
        let tmp = TempDir::new().unwrap();
        let state = test_state(&tmp).await;
        std::fs::write(tmp.path().join("outside.txt"), b"private").unwrap();
        let app = build_router(state.clone());

        let outside = tmp.path().join("outside.txt");
        for locator in [
            "/etc/passwd".to_string(),
            "file:///etc/passwd".to_string(),
            "../outside.txt".to_string(),
            outside.display().to_string(),
        ] {
            assert_eq!(
                get_status(app.clone(), &locator).await,
                StatusCode::NOT_FOUND,
                "{locator}"
            );
        }

        // Nothing was copied into the cache directory either.
        let storage = state.cache.storage().unwrap();
        assert_eq!(storage.disk_usage().await.unwrap(), 0);
        assert_eq!(state.cache.stats().memory_entries, 0);
    }

    #[tokio::test]
    async fn test_server_without_file_root_only_fetches_http() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.bin"), b"a").unwrap();
        let cache = AssetCache::builder(
            Arc::new(SchemeFetcher::new(&FetchConfig::default()).unwrap()),
            BytesDecoder,
        )
        .build();
        let app = build_router(Arc::new(AppState {
            cache,
            config: Arc::new(Config::default()),
            start_time: Instant::now(),
        }));

        let path = tmp.path().join("a.bin");
        assert_eq!(
            get_status(app.clone(), &path.display().to_string()).await,
            StatusCode::NOT_FOUND
        );
        assert_eq!(get_status(app, "/etc/passwd").await, StatusCode::NOT_FOUND);
    }
}
