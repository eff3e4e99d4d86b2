use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use store_core::{draw_number, LeaderboardEntry, RankBy, UserRecord, LEADERBOARD_DEFAULT_LIMIT};
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod config;
pub mod error;
pub mod store;

use error::AppError;
use store::RecordStore;

const INDEX_HTML: &str = include_str!("../templates/index.html");

#[derive(Clone)]
pub struct AppState {
    store: RecordStore,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl AppState {
    /// A seed makes the random-number endpoint repeatable.
    pub fn new(store: RecordStore, seed: Option<u64>) -> Self {
        let rng = seed
            .map(ChaCha8Rng::seed_from_u64)
            .unwrap_or_else(ChaCha8Rng::from_entropy);
        Self {
            store,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn draw(&self) -> u32 {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        draw_number(&mut *rng)
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/get_random_number", get(get_random_number))
        .route("/users/:user_id", get(get_user).put(put_user))
        .route("/leaderboard", get(get_leaderboard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Serialize)]
struct RandomNumberResponse {
    random_number: u32,
}

async fn get_random_number(State(state): State<AppState>) -> impl IntoResponse {
    Json(RandomNumberResponse {
        random_number: state.draw(),
    })
}

async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserRecord>, AppError> {
    let record = state.store.get(user_id).await?;
    Ok(Json(record))
}

async fn put_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(record): Json<UserRecord>,
) -> Result<impl IntoResponse, AppError> {
    state.store.update(&user_id, record.clone()).await?;
    info!(
        %user_id,
        balance = record.balance,
        prizes = record.prizes.len(),
        "user record replaced"
    );
    Ok((StatusCode::OK, Json(record)))
}

#[derive(Deserialize)]
struct LeaderboardParams {
    #[serde(default)]
    sort_by: RankBy,
    limit: Option<usize>,
}

async fn get_leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    let limit = params.limit.unwrap_or(LEADERBOARD_DEFAULT_LIMIT);
    let board = state.store.leaderboard(params.sort_by, limit).await?;
    Ok(Json(board))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use serde_json::json;
    use store_core::{RANDOM_MAX, RANDOM_MIN};
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn json_body(res: axum::response::Response) -> serde_json::Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn text_body(res: axum::response::Response) -> String {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("prize_users_{}.json", Uuid::new_v4()))
    }

    async fn test_app(seed: Option<u64>) -> (Router, AppState) {
        let store = RecordStore::open(temp_path()).await.unwrap();
        let state = AppState::new(store, seed);
        (app(state.clone()), state)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn put_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn index_serves_homepage() {
        let (app, _) = test_app(None).await;
        let res = app.oneshot(get_request("/")).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let content_type = res.headers()["content-type"].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/html"));
        assert!(text_body(res).await.contains("/get_random_number"));
    }

    #[tokio::test]
    async fn random_numbers_stay_in_range() {
        let (app, _) = test_app(None).await;
        for _ in 0..1000 {
            let res = app
                .clone()
                .oneshot(get_request("/get_random_number"))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            let body = json_body(res).await;
            let n = body["random_number"].as_u64().unwrap() as u32;
            assert!((RANDOM_MIN..=RANDOM_MAX).contains(&n), "out of range: {n}");
        }
    }

    #[tokio::test]
    async fn seeded_state_repeats_draws() {
        let mut expected_rng = ChaCha8Rng::seed_from_u64(42);
        let expected: Vec<u64> = (0..5)
            .map(|_| draw_number(&mut expected_rng) as u64)
            .collect();

        let (app, _) = test_app(Some(42)).await;
        let mut returned = Vec::new();
        for _ in 0..5 {
            let res = app
                .clone()
                .oneshot(get_request("/get_random_number"))
                .await
                .unwrap();
            returned.push(json_body(res).await["random_number"].as_u64().unwrap());
        }
        assert_eq!(returned, expected);
    }

    #[tokio::test]
    async fn unknown_user_returns_default_record() {
        let (app, _) = test_app(None).await;
        let res = app.oneshot(get_request("/users/42")).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await, json!({ "balance": 0, "prizes": [] }));
    }

    #[tokio::test]
    async fn put_then_get_round_trips_and_isolates_users() {
        let (app, state) = test_app(None).await;
        let record = json!({ "balance": 100, "prizes": ["gold"] });

        let res = app
            .clone()
            .oneshot(put_request("/users/42", record.clone()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await, record);

        let res = app.clone().oneshot(get_request("/users/42")).await.unwrap();
        assert_eq!(json_body(res).await, record);

        let res = app.clone().oneshot(get_request("/users/7")).await.unwrap();
        assert_eq!(json_body(res).await, json!({ "balance": 0, "prizes": [] }));

        // Integer ids reach the same record through the store directly.
        assert_eq!(
            state.store().get(42).await.unwrap(),
            UserRecord::new(100, vec![json!("gold")])
        );
    }

    #[tokio::test]
    async fn put_replaces_record_in_full() {
        let (app, _) = test_app(None).await;
        let _ = app
            .clone()
            .oneshot(put_request(
                "/users/u1",
                json!({ "balance": 5, "prizes": ["a", "b"] }),
            ))
            .await
            .unwrap();
        let _ = app
            .clone()
            .oneshot(put_request("/users/u1", json!({ "balance": 9 })))
            .await
            .unwrap();

        let res = app.oneshot(get_request("/users/u1")).await.unwrap();
        assert_eq!(json_body(res).await, json!({ "balance": 9, "prizes": [] }));
    }

    #[tokio::test]
    async fn put_rejects_unknown_fields() {
        let (app, _) = test_app(None).await;
        let res = app
            .clone()
            .oneshot(put_request(
                "/users/u1",
                json!({ "balance": 5, "prizes": [], "vip": true }),
            ))
            .await
            .unwrap();
        assert!(res.status().is_client_error());

        let res = app.oneshot(get_request("/users/u1")).await.unwrap();
        assert_eq!(json_body(res).await, json!({ "balance": 0, "prizes": [] }));
    }

    #[tokio::test]
    async fn leaderboard_orders_users_and_applies_limit() {
        let (app, _) = test_app(None).await;
        for (id, record) in [
            ("ann", json!({ "balance": 20, "prizes": [] })),
            ("ben", json!({ "balance": 50, "prizes": ["cup"] })),
            ("cat", json!({ "balance": 5, "prizes": ["a", "b"] })),
        ] {
            let res = app
                .clone()
                .oneshot(put_request(&format!("/users/{id}"), record))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = app.clone().oneshot(get_request("/leaderboard")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["user_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["ben", "ann", "cat"]);
        assert_eq!(
            body[0],
            json!({ "rank": 1, "user_id": "ben", "balance": 50, "prize_count": 1 })
        );

        let res = app
            .clone()
            .oneshot(get_request("/leaderboard?sort_by=prizes&limit=1"))
            .await
            .unwrap();
        let body = json_body(res).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["user_id"], "cat");

        let res = app
            .oneshot(get_request("/leaderboard?sort_by=energy"))
            .await
            .unwrap();
        assert!(res.status().is_client_error());
    }

    #[tokio::test]
    async fn corrupted_store_is_a_server_error() {
        let (app, state) = test_app(None).await;
        tokio::fs::write(state.store().path(), "garbage").await.unwrap();

        let res = app
            .clone()
            .oneshot(get_request("/users/1"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let res = app
            .oneshot(put_request("/users/1", json!({ "balance": 1, "prizes": [] })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = text_body(res).await;
        assert_eq!(body, "internal server error");
        assert!(!body.contains(&*state.store().path().to_string_lossy()));
    }
}
