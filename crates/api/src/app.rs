use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use subtle::ConstantTimeEq;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use basket_core::auth::Principal;
use basket_core::domain::basket::{GenerationRequest, Snapshot};
use basket_core::orchestrator::{BasketOrchestrator, OrchestrationError};
use basket_core::reader::SnapshotReader;

const FORCE_GENERATION_HEADER: &str = "x-force-generation";
const AUTH_COOKIE: &str = "authToken";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<BasketOrchestrator>,
    pub reader: SnapshotReader,
    /// `None` runs the API without authentication.
    pub auth_token: Option<Arc<str>>,
    pub started_at: Instant,
}

pub fn router(state: AppState, cors_origin: &str) -> anyhow::Result<Router> {
    let origin = cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| anyhow::anyhow!("invalid CORS_ALLOW_ORIGIN {cors_origin:?}: {e}"))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(FORCE_GENERATION_HEADER),
        ]);

    Ok(Router::new()
        .route("/healthz", get(healthz))
        .route("/health", get(health))
        .route("/generate", post(generate))
        .route("/baskets", get(get_baskets))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn new(status: StatusCode, stage: &str, error: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({"error": error.into(), "stage": stage}),
        }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "auth", "authentication required")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(err: OrchestrationError) -> Self {
        let stage = err.stage();
        match err {
            OrchestrationError::InvalidInput(detail) => {
                ApiError::new(StatusCode::BAD_REQUEST, stage, detail)
            }
            OrchestrationError::Generation(failure) => ApiError {
                status: StatusCode::BAD_GATEWAY,
                body: json!({
                    "error": "basket generation failed",
                    "stage": stage,
                    "reason": failure.reason.as_str(),
                    "detail": failure.detail,
                }),
            },
            OrchestrationError::Persist { baskets, source } => {
                sentry_anyhow::capture_anyhow(&source);
                ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: json!({
                        "error": "generated baskets could not be saved",
                        "stage": stage,
                        "baskets": baskets,
                    }),
                }
            }
        }
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let Some(expected) = state.auth_token.as_deref() else {
        return Ok(Principal::new("anonymous"));
    };

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    let cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE)
        .map(|(_, value)| value.trim());

    match bearer.or(cookie) {
        Some(token) if token_matches(token, expected) => Ok(Principal::new("api-token")),
        Some(_) => {
            tracing::warn!("rejected request with invalid auth token");
            Err(ApiError::unauthorized())
        }
        None => Err(ApiError::unauthorized()),
    }
}

fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

async fn healthz() -> &'static str {
    "ok"
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let generation_id = state
        .reader
        .current(&Principal::new("health-check"))
        .await
        .map(|s| s.generation_id)
        .ok();

    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "generationId": generation_id,
        "generationPolicy": state.orchestrator.policy().as_str(),
    }))
}

#[derive(Debug, Deserialize)]
struct GenerateBody {
    #[serde(default)]
    investment: Value,
    #[serde(default)]
    risk: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateQuery {
    force_new: Option<String>,
}

fn parse_investment(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn is_true(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

async fn generate(
    State(state): State<AppState>,
    Query(query): Query<GenerateQuery>,
    headers: HeaderMap,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Json<Snapshot>, ApiError> {
    let principal = authenticate(&state, &headers)?;

    let Json(body) = body.map_err(|e| {
        ApiError::new(StatusCode::BAD_REQUEST, "validation", e.body_text())
    })?;

    let force_new = is_true(query.force_new.as_deref())
        || is_true(
            headers
                .get(FORCE_GENERATION_HEADER)
                .and_then(|v| v.to_str().ok()),
        );

    let request = GenerationRequest {
        investment: parse_investment(&body.investment),
        risk: body.risk.unwrap_or_default(),
        force_new,
    };

    let snapshot = state.orchestrator.generate(&principal, &request).await?;
    Ok(Json(snapshot))
}

async fn get_baskets(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Snapshot>, ApiError> {
    let principal = authenticate(&state, &headers)?;

    let snapshot = state.reader.current(&principal).await.map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(error = %format!("{e:#}"), "failed to read live snapshot");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "read",
            "failed to read baskets",
        )
    })?;

    Ok(Json(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use basket_core::domain::basket::Risk;
    use basket_core::domain::contract::RawBasket;
    use basket_core::generation::error::GenerationFailure;
    use basket_core::generation::BasketGenerator;
    use basket_core::storage::{FileSnapshotStore, SnapshotStore};

    struct FixedGenerator(Result<Value, GenerationFailure>);

    #[async_trait::async_trait]
    impl BasketGenerator for FixedGenerator {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn invoke(
            &self,
            _investment: f64,
            _risk: Risk,
        ) -> Result<Vec<RawBasket>, GenerationFailure> {
            match &self.0 {
                Ok(value) => Ok(serde_json::from_value(value.clone()).unwrap()),
                Err(failure) => Err(failure.clone()),
            }
        }
    }

    struct TestServer {
        base: String,
        store: Arc<FileSnapshotStore>,
        http: reqwest::Client,
        _dir: tempfile::TempDir,
    }

    async fn serve(output: Result<Value, GenerationFailure>, auth_token: Option<&str>) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileSnapshotStore::new(dir.path().join("baskets.json")));
        let state = AppState {
            orchestrator: Arc::new(BasketOrchestrator::new(
                store.clone(),
                Arc::new(FixedGenerator(output)),
            )),
            reader: SnapshotReader::new(store.clone()),
            auth_token: auth_token.map(Arc::<str>::from),
            started_at: Instant::now(),
        };
        let app = router(state, "http://localhost:5173").unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            base: format!("http://{addr}"),
            store,
            http: reqwest::Client::new(),
            _dir: dir,
        }
    }

    fn tech_output() -> Value {
        json!([{
            "theme": "Tech",
            "stocks": [{"symbol": "AAA", "current_price": 100, "52_week_low": 80, "52_week_high": 120}]
        }])
    }

    #[tokio::test]
    async fn baskets_before_any_generation_is_empty() {
        let server = serve(Ok(tech_output()), None).await;

        let res = server
            .http
            .get(format!("{}/baskets", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::OK);
        assert_eq!(
            res.headers().get("cache-control").unwrap(),
            "no-store, no-cache, must-revalidate, private"
        );
        let body: Value = res.json().await.unwrap();
        assert_eq!(body, json!({"baskets": [], "generationId": 0, "timestamp": null}));
    }

    #[tokio::test]
    async fn generate_then_read_returns_same_snapshot() {
        let server = serve(Ok(tech_output()), None).await;

        let generated: Value = server
            .http
            .post(format!("{}/generate", server.base))
            .json(&json!({"investment": 50000, "risk": "medium"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(generated["generationId"], json!(1));
        assert_eq!(generated["baskets"][0]["theme"], json!("Tech"));
        assert_eq!(generated["baskets"][0]["stocks"][0]["current_price"], json!(100.0));

        let live: Value = server
            .http
            .get(format!("{}/baskets", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(live, generated);
    }

    #[tokio::test]
    async fn numeric_string_investment_is_accepted() {
        let server = serve(Ok(tech_output()), None).await;

        let res = server
            .http
            .post(format!("{}/generate", server.base))
            .json(&json!({"investment": "25000.50", "risk": "LOW"}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_input_is_bad_request() {
        let server = serve(Ok(tech_output()), None).await;

        for body in [
            json!({"investment": "abc", "risk": "low"}),
            json!({"investment": -5, "risk": "low"}),
            json!({"investment": 1000, "risk": "extreme"}),
            json!({"risk": "low"}),
        ] {
            let res = server
                .http
                .post(format!("{}/generate", server.base))
                .json(&body)
                .send()
                .await
                .unwrap();
            assert_eq!(res.status(), reqwest::StatusCode::BAD_REQUEST, "{body}");
            let err: Value = res.json().await.unwrap();
            assert_eq!(err["stage"], json!("validation"));
        }
        assert_eq!(server.store.read().await.unwrap(), Snapshot::empty());
    }

    #[tokio::test]
    async fn generation_failure_reports_stage_and_keeps_snapshot() {
        let server = serve(
            Err(GenerationFailure::process_error("Missing CSV files")),
            None,
        )
        .await;

        let res = server
            .http
            .post(format!("{}/generate", server.base))
            .json(&json!({"investment": 50000, "risk": "medium"}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::BAD_GATEWAY);
        let err: Value = res.json().await.unwrap();
        assert_eq!(err["stage"], json!("generation"));
        assert_eq!(err["reason"], json!("process_error"));
        assert_eq!(err["detail"], json!("Missing CSV files"));
        assert_eq!(server.store.read().await.unwrap(), Snapshot::empty());
    }

    #[tokio::test]
    async fn force_new_header_clears_before_generation() {
        let server = serve(Err(GenerationFailure::timeout("slow")), None).await;
        server
            .store
            .commit_generation(vec![])
            .await
            .unwrap();

        let res = server
            .http
            .post(format!("{}/generate", server.base))
            .header("X-Force-Generation", "true")
            .json(&json!({"investment": 50000, "risk": "medium"}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::BAD_GATEWAY);

        let live = server.store.read().await.unwrap();
        assert!(live.baskets.is_empty());
        assert_eq!(live.generation_id, 1);
    }

    #[tokio::test]
    async fn auth_token_is_required_when_configured() {
        let server = serve(Ok(tech_output()), Some("secret")).await;
        let url = format!("{}/baskets", server.base);

        let missing = server.http.get(&url).send().await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::UNAUTHORIZED);

        let wrong = server
            .http
            .get(&url)
            .bearer_auth("nope")
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), reqwest::StatusCode::UNAUTHORIZED);

        let bearer = server
            .http
            .get(&url)
            .bearer_auth("secret")
            .send()
            .await
            .unwrap();
        assert_eq!(bearer.status(), reqwest::StatusCode::OK);

        let cookie = server
            .http
            .get(&url)
            .header("Cookie", "theme=dark; authToken=secret")
            .send()
            .await
            .unwrap();
        assert_eq!(cookie.status(), reqwest::StatusCode::OK);

        let health = server
            .http
            .get(format!("{}/health", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::OK);
    }

    #[test]
    fn token_comparison() {
        assert!(token_matches("secret", "secret"));
        assert!(!token_matches("secreT", "secret"));
        assert!(!token_matches("secret-but-longer", "secret"));
        assert!(!token_matches("", "secret"));
    }

    #[test]
    fn investment_parsing() {
        assert_eq!(parse_investment(&json!(50000)), 50000.0);
        assert_eq!(parse_investment(&json!(" 12.5 ")), 12.5);
        assert!(parse_investment(&json!("abc")).is_nan());
        assert!(parse_investment(&Value::Null).is_nan());
        assert!(parse_investment(&json!(true)).is_nan());
    }
}
