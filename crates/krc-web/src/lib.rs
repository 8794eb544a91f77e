//! Axum surface for KRC: read-only article queries and scrape triggers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use krc_core::Category;
use krc_storage::ArticleStore;
use krc_sync::{ConfigError, RunOutcome, SyncConfig, SyncRunSummary, SyncService};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::info;

pub const CRATE_NAME: &str = "krc-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ArticleStore>,
    pub sync: Option<Arc<SyncService>>,
}

impl AppState {
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self { store, sync: None }
    }

    pub fn with_sync(mut self, sync: Arc<SyncService>) -> Self {
        self.sync = Some(sync);
        self
    }
}

#[derive(Debug, Deserialize, Default)]
struct ArticlesQuery {
    #[serde(rename = "type")]
    category: Option<String>,
    limit: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/articles", get(articles_handler))
        .route("/articles/latest", get(latest_article_handler))
        .route("/scrape", post(scrape_all_handler))
        .route("/scrape/{category}", post(scrape_category_handler))
        .with_state(Arc::new(state))
}

pub const DEFAULT_WEB_PORT: u16 = 8000;

/// `KRC_WEB_PORT`, defaulting when unset or blank. Garbage is an error.
pub fn web_port_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<u16, ConfigError> {
    match lookup("KRC_WEB_PORT").map(|v| v.trim().to_string()) {
        None => Ok(DEFAULT_WEB_PORT),
        Some(raw) if raw.is_empty() => Ok(DEFAULT_WEB_PORT),
        Some(raw) => match raw.parse::<u16>() {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(ConfigError::Invalid {
                key: "KRC_WEB_PORT",
                message: format!("{raw:?} is not a tcp port"),
            }),
        },
    }
}

/// Serves the API with the scheduler attached when enabled.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let port = web_port_from_lookup(|key| std::env::var(key).ok())?;
    let config = SyncConfig::from_env()?;
    let service = Arc::new(krc_sync::build_service(&config).await?);
    let store = service.engine().store().clone();

    let scheduler = krc_sync::maybe_build_scheduler(&config, service.clone()).await?;
    if let Some(sched) = &scheduler {
        sched.start().await?;
        info!(cron = %config.sync_cron, "sync scheduler started");
    }

    let state = AppState::new(store).with_sync(service);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving article api");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn articles_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ArticlesQuery>,
) -> Response {
    let limit = match query.limit.as_deref().map(str::parse::<usize>) {
        None => None,
        Some(Ok(limit)) => Some(limit),
        Some(Err(err)) => return client_error(format!("invalid limit: {err}")),
    };

    let result = match query.category.as_deref() {
        Some(raw) => {
            let category = match raw.parse::<Category>() {
                Ok(category) => category,
                Err(err) => return client_error(err.to_string()),
            };
            state
                .store
                .list_articles_by_category(category, limit.unwrap_or(1))
                .await
        }
        None => state.store.list_articles().await.map(|mut all| {
            if let Some(limit) = limit {
                all.truncate(limit);
            }
            all
        }),
    };

    match result {
        Ok(articles) => Json(articles).into_response(),
        Err(err) => server_error(err.to_string()),
    }
}

async fn latest_article_handler(State(state): State<Arc<AppState>>) -> Response {
    let latest = match state.store.latest_category_state().await {
        Ok(Some(latest)) => latest,
        Ok(None) => return not_found("no category has been tracked yet"),
        Err(err) => return server_error(err.to_string()),
    };
    match state
        .store
        .get_article(latest.category, latest.representative_id)
        .await
    {
        Ok(Some(article)) => Json(article).into_response(),
        Ok(None) => not_found("latest article is not stored"),
        Err(err) => server_error(err.to_string()),
    }
}

async fn scrape_all_handler(State(state): State<Arc<AppState>>) -> Response {
    let Some(sync) = &state.sync else {
        return sync_unavailable();
    };
    summary_response(sync.run_once().await)
}

async fn scrape_category_handler(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
) -> Response {
    let category = match category.parse::<Category>() {
        Ok(category) => category,
        Err(err) => return client_error(err.to_string()),
    };
    let Some(sync) = &state.sync else {
        return sync_unavailable();
    };
    summary_response(sync.run_categories(&[category]).await)
}

fn summary_response(summary: SyncRunSummary) -> Response {
    match summary.outcome() {
        RunOutcome::Unchanged => StatusCode::NOT_MODIFIED.into_response(),
        RunOutcome::Synced => (StatusCode::OK, Json(summary)).into_response(),
        RunOutcome::PartiallyFailed | RunOutcome::Failed => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(summary)).into_response()
        }
    }
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn client_error(message: impl Into<String>) -> Response {
    error_body(StatusCode::BAD_REQUEST, message)
}

fn not_found(message: &str) -> Response {
    error_body(StatusCode::NOT_FOUND, message)
}

fn server_error(message: impl Into<String>) -> Response {
    error_body(StatusCode::INTERNAL_SERVER_ERROR, message)
}

fn sync_unavailable() -> Response {
    error_body(StatusCode::SERVICE_UNAVAILABLE, "sync is not configured")
}
