//! REST routes
//!
//! Handlers that call models (`cycle`, `explore`, agent queries) refuse to
//! wait for a cycle in flight and answer `409` instead. Read-only handlers
//! wait for the orchestrator lock.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use coordination::{
    BackendKind, CycleRecord, Discovery, Discussion, EventEnvelope, ExperimentRecord,
    ExplorationReport, Language, OrchestratorState, Roster, Theory,
};
use coordination::agent::AgentResult;
use coordination::deliberation::SessionSummary;
use coordination::events::EventStats;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, StateSnapshot};
use crate::ws;

/// Create the main router
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/initialize", post(initialize))
        // Sessions
        .route("/session/start", post(start_session))
        .route("/session/stop", post(stop_session))
        .route("/language", post(set_language))
        // Deliberation
        .route("/cycle", post(run_cycle))
        .route("/explore", post(explore))
        .route("/agents/:key/query", post(query_agent))
        .route("/experiment", post(run_experiment))
        .route("/auto/start", post(start_auto))
        .route("/auto/stop", post(stop_auto))
        // Read side
        .route("/state", get(get_state))
        .route("/theories", get(list_theories))
        .route("/discoveries", get(list_discoveries))
        .route("/discussions", get(list_discussions))
        .route("/experiments", get(list_experiments))
        .route("/events", get(list_events))
        .route("/events/stats", get(event_stats));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

fn parse_language(raw: &str) -> ApiResult<Language> {
    raw.parse().map_err(ApiError::BadRequest)
}

// ── Health and initialization ────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub initialized: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let initialized = match state.orchestrator.try_lock() {
        Ok(slot) => slot.is_some(),
        // Busy means a cycle is running, which needs an orchestrator.
        Err(_) => true,
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        initialized,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct InitializeRequest {
    #[serde(default)]
    pub deepseek_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub roster: Option<String>,
}

async fn initialize(
    State(state): State<AppState>,
    Json(request): Json<InitializeRequest>,
) -> ApiResult<Json<OrchestratorState>> {
    let roster = request
        .roster
        .as_deref()
        .map(str::parse::<Roster>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let keys: HashMap<BackendKind, String> = [
        (BackendKind::DeepSeek, request.deepseek_api_key),
        (BackendKind::Anthropic, request.anthropic_api_key),
        (BackendKind::OpenAi, request.openai_api_key),
    ]
    .into_iter()
    .filter_map(|(kind, key)| key.map(|key| (kind, key)))
    .collect();

    let snapshot = state.initialize(keys, roster).await?;
    Ok(Json(snapshot))
}

// ── Sessions ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<Json<SessionSummary>> {
    let language = request.language.as_deref().map(parse_language).transpose()?;
    let mut slot = state.orchestrator().await?;
    let orchestrator = slot.as_mut().ok_or(ApiError::NotInitialized)?;
    Ok(Json(orchestrator.start_session(request.topic.as_deref(), language)))
}

async fn stop_session(State(state): State<AppState>) -> ApiResult<Json<SessionSummary>> {
    state.stop_auto().await;
    let mut slot = state.orchestrator().await?;
    let orchestrator = slot.as_mut().ok_or(ApiError::NotInitialized)?;
    Ok(Json(orchestrator.stop_session()?))
}

#[derive(Debug, Deserialize)]
pub struct LanguageRequest {
    pub language: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LanguageResponse {
    pub language: Language,
}

async fn set_language(
    State(state): State<AppState>,
    Json(request): Json<LanguageRequest>,
) -> ApiResult<Json<LanguageResponse>> {
    let language = parse_language(&request.language)?;
    let mut slot = state.orchestrator().await?;
    let orchestrator = slot.as_mut().ok_or(ApiError::NotInitialized)?;
    orchestrator.set_language(language);
    Ok(Json(LanguageResponse { language }))
}

// ── Deliberation ─────────────────────────────────────────────────────

async fn run_cycle(State(state): State<AppState>) -> ApiResult<Json<CycleRecord>> {
    let mut slot = state.try_orchestrator()?;
    let orchestrator = slot.as_mut().ok_or(ApiError::NotInitialized)?;
    let record = orchestrator.run_cycle().await?;
    info!(cycle = record.number, "Cycle served");
    Ok(Json(record))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExploreRequest {
    #[serde(default)]
    pub topic: String,
}

async fn explore(
    State(state): State<AppState>,
    Json(request): Json<ExploreRequest>,
) -> ApiResult<Json<ExplorationReport>> {
    let mut slot = state.try_orchestrator()?;
    let orchestrator = slot.as_mut().ok_or(ApiError::NotInitialized)?;
    Ok(Json(orchestrator.explore_topic(&request.topic).await?))
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
}

async fn query_agent(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<AgentResult>> {
    if request.question.trim().is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_string()));
    }
    let mut slot = state.try_orchestrator()?;
    let orchestrator = slot.as_mut().ok_or(ApiError::NotInitialized)?;
    Ok(Json(orchestrator.query_agent(&key, &request.question).await?))
}

#[derive(Debug, Deserialize)]
pub struct ExperimentRequest {
    pub experiment: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

async fn run_experiment(
    State(state): State<AppState>,
    Json(request): Json<ExperimentRequest>,
) -> ApiResult<Json<ExperimentRecord>> {
    let mut slot = state.orchestrator().await?;
    let orchestrator = slot.as_mut().ok_or(ApiError::NotInitialized)?;
    Ok(Json(
        orchestrator.run_experiment(&request.experiment, &request.parameters)?,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct StartAutoRequest {
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AutoResponse {
    pub running: bool,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub cycles_run: Option<u64>,
}

async fn start_auto(
    State(state): State<AppState>,
    Json(request): Json<StartAutoRequest>,
) -> ApiResult<Json<AutoResponse>> {
    let interval_ms = state.start_auto(request.interval_ms).await?;
    Ok(Json(AutoResponse {
        running: true,
        interval_ms: Some(interval_ms),
        cycles_run: None,
    }))
}

async fn stop_auto(State(state): State<AppState>) -> Json<AutoResponse> {
    let cycles_run = state.stop_auto().await;
    Json(AutoResponse {
        running: false,
        interval_ms: None,
        cycles_run,
    })
}

// ── Read side ────────────────────────────────────────────────────────

async fn get_state(State(state): State<AppState>) -> Json<StateSnapshot> {
    Json(state.snapshot().await)
}

async fn list_theories(State(state): State<AppState>) -> ApiResult<Json<Vec<Theory>>> {
    let slot = state.orchestrator().await?;
    let orchestrator = slot.as_ref().ok_or(ApiError::NotInitialized)?;
    Ok(Json(orchestrator.theories().to_vec()))
}

async fn list_discoveries(State(state): State<AppState>) -> ApiResult<Json<Vec<Discovery>>> {
    let slot = state.orchestrator().await?;
    let orchestrator = slot.as_ref().ok_or(ApiError::NotInitialized)?;
    Ok(Json(orchestrator.discoveries().to_vec()))
}

async fn list_discussions(State(state): State<AppState>) -> ApiResult<Json<Vec<Discussion>>> {
    let slot = state.orchestrator().await?;
    let orchestrator = slot.as_ref().ok_or(ApiError::NotInitialized)?;
    Ok(Json(orchestrator.discussions().to_vec()))
}

async fn list_experiments(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ExperimentRecord>>> {
    let slot = state.orchestrator().await?;
    let orchestrator = slot.as_ref().ok_or(ApiError::NotInitialized)?;
    Ok(Json(orchestrator.experiments().to_vec()))
}

/// Event history query params
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Only events with a larger sequence number.
    #[serde(default)]
    pub since: Option<u64>,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
}

fn default_limit() -> usize {
    50
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<EventEnvelope>> {
    let mut events = match query.since {
        Some(seq) => state.events.since(seq),
        None => state.events.recent(usize::MAX),
    };
    if let Some(event_type) = &query.event_type {
        events.retain(|e| e.event_type() == event_type.as_str());
    }
    let skip = events.len().saturating_sub(query.limit);
    Json(events.split_off(skip))
}

async fn event_stats(State(state): State<AppState>) -> Json<EventStats> {
    Json(state.events.stats())
}
