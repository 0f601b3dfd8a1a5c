use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use basket_core::config::Settings;
use basket_core::generation::subprocess::SubprocessGenerator;
use basket_core::orchestrator::{BasketOrchestrator, GenerationPolicy};
use basket_core::reader::SnapshotReader;
use basket_core::storage::{FileSnapshotStore, SnapshotStore};

mod app;

const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let store = Arc::new(FileSnapshotStore::from_settings(&settings));
    let generator = Arc::new(SubprocessGenerator::from_settings(&settings)?);
    let policy = GenerationPolicy::from_settings(&settings)?;

    match store.read().await {
        Ok(snapshot) => tracing::info!(
            path = %store.path().display(),
            generation_id = snapshot.generation_id,
            baskets = snapshot.baskets.len(),
            "loaded live snapshot"
        ),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(
                error = %format!("{e:#}"),
                "live snapshot unreadable; /baskets will fail until it is replaced"
            );
        }
    }

    let auth_token = auth_token(&settings);
    if auth_token.is_none() {
        tracing::warn!("API_AUTH_TOKEN missing; generate and baskets endpoints are unauthenticated");
    }

    let state = app::AppState {
        orchestrator: Arc::new(
            BasketOrchestrator::new(store.clone(), generator.clone()).with_policy(policy),
        ),
        reader: SnapshotReader::new(store),
        auth_token,
        started_at: std::time::Instant::now(),
    };

    let cors_origin = settings
        .cors_allow_origin
        .as_deref()
        .unwrap_or(DEFAULT_CORS_ORIGIN);
    let app = app::router(state, cors_origin)?;

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(
        %addr,
        policy = policy.as_str(),
        generator_timeout_secs = generator.timeout().as_secs(),
        "api listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// `None` when no token is configured; the API then runs unauthenticated.
fn auth_token(settings: &Settings) -> Option<Arc<str>> {
    settings.api_auth_token.as_deref().map(Arc::<str>::from)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
