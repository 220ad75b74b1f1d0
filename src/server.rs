//! HTTP API server.
//!
//! JSON over HTTP, camelCase field names. Every route except `/health` and
//! `/billing/webhook` requires `Authorization: Bearer <token>` (see
//! [`crate::auth`]).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Status and version |
//! | `POST` | `/process-assessment-content` | Chunk, embed and store an assessment document |
//! | `POST` | `/process-archetype-content` | Same, for an archetype |
//! | `GET` | `/assessment-content/{id}` | Chunks and settings of an assessment |
//! | `DELETE` | `/assessment-content/{chunkId}` | Delete one chunk |
//! | `GET` | `/archetype-content/{id}` | Chunks and settings of an archetype |
//! | `DELETE` | `/archetype-content/{chunkId}` | Delete one chunk |
//! | `POST` | `/test-embedding` | Scoped similarity search |
//! | `POST` | `/test-chunking` | Preview chunk boundaries |
//! | `POST` | `/chat` | Chat turn with optional retrieval |
//! | `POST`/`GET` | `/assessments`, `/archetypes` | Create / list parents |
//! | `POST`/`GET` | `/assessment-sessions` | Start / list own sessions |
//! | `GET`/`DELETE` | `/assessment-sessions/{id}` | Fetch / delete |
//! | `POST` | `/assessment-sessions/{id}/progress` | Record progress |
//! | `POST` | `/assessment-sessions/{id}/complete` | Complete |
//! | `POST` | `/assessment-sessions/{id}/abandon` | Abandon |
//! | `POST` | `/billing/checkout` | Open a checkout session |
//! | `POST` | `/billing/webhook` | Payment processor events |
//! | `GET` | `/billing/subscription` | Current user's subscription |
//! | `POST` | `/generate-avatar`, `/generate-video` | 501 |
//!
//! Errors use the body described in [`crate::error`].

use axum::{
    body::Bytes,
    extract::{FromRequest, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use archmen_core::chat::{ChatMessage, ChatProvider};
use archmen_core::chunk;
use archmen_core::embedding::{embed_checked, truncate_input, EmbeddingProvider};
use archmen_core::models::{
    ChunkMetadata, ContentChunk, ContentOwner, EmbeddingSettings, KnowledgeParent, OwnerKind,
    ScoredChunk, Subscription,
};
use archmen_core::session::{AssessmentSession, DiscoveredArchetype, SessionError};
use archmen_core::store::{KnowledgeStore, SessionStore, SubscriptionStore};

use crate::auth::{create_auth_provider, AuthProvider, CurrentUser};
use crate::billing::{
    create_payment_provider, handle_event, verify_signature, CheckoutRequest, CheckoutSession,
    HandleError, PaymentProvider, WebhookError,
};
use crate::chat::{create_chat_provider, run_chat, ChatContext};
use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::ApiError;
use crate::media::{self, MediaCapability, MediaOutcome};
use crate::pipeline::{process_content, ProcessContext, ProcessInput, SettingsPatch};
use crate::sqlite_store::SqliteStore;

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub chat: Arc<dyn ChatProvider>,
    pub auth: Arc<dyn AuthProvider>,
    pub payments: Arc<dyn PaymentProvider>,
}

impl AppState {
    /// Build the production state: SQLite store plus the configured providers.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let pool = crate::db::connect(&config).await?;
        crate::migrate::run_migrations(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));

        Ok(Self {
            embedder: create_provider(&config.embedding)?,
            chat: create_chat_provider(&config.chat)?,
            auth: create_auth_provider(&config.auth)?,
            payments: create_payment_provider(&config.billing)?,
            knowledge: store.clone(),
            sessions: store.clone(),
            subscriptions: store,
            config: Arc::new(config),
        })
    }

    fn process_ctx(&self) -> ProcessContext<'_> {
        ProcessContext {
            config: &self.config,
            store: self.knowledge.as_ref(),
            embedder: self.embedder.as_ref(),
        }
    }

    fn chat_ctx(&self) -> ChatContext<'_> {
        ChatContext {
            config: &self.config,
            store: self.knowledge.as_ref(),
            embedder: self.embedder.as_ref(),
            chat: self.chat.as_ref(),
        }
    }
}

/// Build the router with every route, CORS, and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/process-assessment-content",
            post(handle_process_assessment),
        )
        .route("/process-archetype-content", post(handle_process_archetype))
        .route(
            "/assessment-content/{id}",
            get(handle_get_assessment_content).delete(handle_delete_chunk),
        )
        .route(
            "/archetype-content/{id}",
            get(handle_get_archetype_content).delete(handle_delete_chunk),
        )
        .route("/test-embedding", post(handle_test_embedding))
        .route("/test-chunking", post(handle_test_chunking))
        .route("/chat", post(handle_chat))
        .route(
            "/assessments",
            post(handle_create_assessment).get(handle_list_assessments),
        )
        .route(
            "/archetypes",
            post(handle_create_archetype).get(handle_list_archetypes),
        )
        .route(
            "/assessment-sessions",
            post(handle_start_session).get(handle_list_sessions),
        )
        .route(
            "/assessment-sessions/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route(
            "/assessment-sessions/{id}/progress",
            post(handle_session_progress),
        )
        .route(
            "/assessment-sessions/{id}/complete",
            post(handle_session_complete),
        )
        .route(
            "/assessment-sessions/{id}/abandon",
            post(handle_session_abandon),
        )
        .route("/billing/checkout", post(handle_checkout))
        .route("/billing/webhook", post(handle_webhook))
        .route("/billing/subscription", get(handle_subscription))
        .route("/generate-avatar", post(handle_generate_avatar))
        .route("/generate-video", post(handle_generate_video))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server on `[server].bind` and run until the process exits.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState::from_config(config).await?;
    let app = router(state);

    tracing::info!(addr = %bind_addr, "ArchMen server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// JSON body extractor whose rejections are `400 bad_request`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
struct AppJson<T>(T);

type ApiResult<T> = Result<T, ApiError>;

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ Content processing ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessBody {
    text_content: Option<String>,
    /// Plain-text contents of an uploaded file.
    file_content: Option<String>,
    source_url: Option<String>,
    #[serde(default)]
    settings: Option<SettingsPatch>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessAssessmentRequest {
    assessment_id: String,
    #[serde(flatten)]
    body: ProcessBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessArchetypeRequest {
    archetype_id: String,
    #[serde(flatten)]
    body: ProcessBody,
}

/// A stored chunk without its embedding vector.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunkView {
    id: String,
    chunk_index: i64,
    content: String,
    chunk_size: usize,
    overlap_size: usize,
    source_url: Option<String>,
    metadata: ChunkMetadata,
}

impl From<ContentChunk> for ChunkView {
    fn from(c: ContentChunk) -> Self {
        Self {
            id: c.id,
            chunk_index: c.chunk_index,
            content: c.content,
            chunk_size: c.chunk_size,
            overlap_size: c.overlap_size,
            source_url: c.source_url,
            metadata: c.metadata,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessResponse {
    chunks_processed: usize,
    chunks: Vec<ChunkView>,
    settings: EmbeddingSettings,
}

async fn process(
    state: &AppState,
    owner: ContentOwner,
    body: ProcessBody,
) -> ApiResult<Json<ProcessResponse>> {
    let text = body
        .text_content
        .filter(|t| !t.is_empty())
        .or(body.file_content)
        .ok_or_else(|| ApiError::bad_request("textContent or fileContent is required"))?;

    let outcome = process_content(
        &state.process_ctx(),
        ProcessInput {
            owner,
            text,
            source_url: body.source_url,
            settings: body.settings.unwrap_or_default(),
        },
    )
    .await?;

    Ok(Json(ProcessResponse {
        chunks_processed: outcome.chunks.len(),
        chunks: outcome.chunks.into_iter().map(ChunkView::from).collect(),
        settings: outcome.settings,
    }))
}

async fn handle_process_assessment(
    State(state): State<AppState>,
    _user: CurrentUser,
    AppJson(req): AppJson<ProcessAssessmentRequest>,
) -> ApiResult<Json<ProcessResponse>> {
    process(&state, ContentOwner::Assessment(req.assessment_id), req.body).await
}

async fn handle_process_archetype(
    State(state): State<AppState>,
    _user: CurrentUser,
    AppJson(req): AppJson<ProcessArchetypeRequest>,
) -> ApiResult<Json<ProcessResponse>> {
    process(&state, ContentOwner::Archetype(req.archetype_id), req.body).await
}

// ============ Content listing / deletion ============

#[derive(Serialize)]
struct ContentResponse {
    chunks: Vec<ChunkView>,
    settings: Option<EmbeddingSettings>,
}

async fn get_content(state: &AppState, owner: ContentOwner) -> ApiResult<Json<ContentResponse>> {
    if state.knowledge.get_parent(&owner).await?.is_none() {
        return Err(ApiError::not_found(format!("{} not found", owner)));
    }
    let chunks = state.knowledge.list_chunks(&owner).await?;
    let settings = state.knowledge.get_settings(&owner).await?;
    Ok(Json(ContentResponse {
        chunks: chunks.into_iter().map(ChunkView::from).collect(),
        settings,
    }))
}

async fn handle_get_assessment_content(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ContentResponse>> {
    get_content(&state, ContentOwner::Assessment(id)).await
}

async fn handle_get_archetype_content(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ContentResponse>> {
    get_content(&state, ContentOwner::Archetype(id)).await
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: bool,
}

async fn handle_delete_chunk(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(chunk_id): Path<String>,
) -> ApiResult<Json<DeletedResponse>> {
    if !state.knowledge.delete_chunk(&chunk_id).await? {
        return Err(ApiError::not_found(format!("chunk {} not found", chunk_id)));
    }
    Ok(Json(DeletedResponse { deleted: true }))
}

// ============ POST /test-embedding ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestEmbeddingRequest {
    query: String,
    assessment_id: Option<String>,
    archetype_id: Option<String>,
    threshold: Option<f64>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct TestEmbeddingResponse {
    results: Vec<ScoredChunk>,
}

/// Exactly one of the two ids must be present.
fn owner_from_ids(
    assessment_id: Option<String>,
    archetype_id: Option<String>,
) -> ApiResult<Option<ContentOwner>> {
    match (assessment_id, archetype_id) {
        (Some(_), Some(_)) => Err(ApiError::bad_request(
            "give either assessmentId or archetypeId, not both",
        )),
        (Some(id), None) => Ok(Some(ContentOwner::Assessment(id))),
        (None, Some(id)) => Ok(Some(ContentOwner::Archetype(id))),
        (None, None) => Ok(None),
    }
}

async fn handle_test_embedding(
    State(state): State<AppState>,
    _user: CurrentUser,
    AppJson(req): AppJson<TestEmbeddingRequest>,
) -> ApiResult<Json<TestEmbeddingResponse>> {
    if req.query.trim().is_empty() {
        return Err(ApiError::bad_request("query must not be empty"));
    }
    let owner = owner_from_ids(req.assessment_id, req.archetype_id)?
        .ok_or_else(|| ApiError::bad_request("assessmentId or archetypeId is required"))?;

    let threshold = req.threshold.unwrap_or(state.config.retrieval.threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ApiError::bad_request("threshold must be between 0 and 1"));
    }
    let limit = req.limit.unwrap_or(state.config.retrieval.limit);
    if limit == 0 {
        return Err(ApiError::bad_request("limit must be at least 1"));
    }

    if state.knowledge.get_parent(&owner).await?.is_none() {
        return Err(ApiError::not_found(format!("{} not found", owner)));
    }
    let model = state
        .knowledge
        .get_settings(&owner)
        .await?
        .map(|s| s.embedding_model)
        .unwrap_or_else(|| state.config.embedding.model.clone());

    let query_vec = embed_checked(
        state.embedder.as_ref(),
        &model,
        truncate_input(&req.query, state.config.embedding.max_input_chars),
    )
    .await
    .map_err(|e| ApiError::Upstream(format!("embedding failed: {:#}", e)))?;

    let results = state
        .knowledge
        .similarity_search(&query_vec, &owner, threshold, limit)
        .await?;
    Ok(Json(TestEmbeddingResponse { results }))
}

// ============ POST /test-chunking ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestChunkingRequest {
    text: String,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunkPreview {
    index: i64,
    content: String,
    size: usize,
    overlap: usize,
    start: usize,
    end: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TestChunkingResponse {
    total_chunks: usize,
    chunks: Vec<ChunkPreview>,
}

async fn handle_test_chunking(
    State(state): State<AppState>,
    _user: CurrentUser,
    AppJson(req): AppJson<TestChunkingRequest>,
) -> ApiResult<Json<TestChunkingResponse>> {
    let size = req.chunk_size.unwrap_or(state.config.chunking.chunk_size);
    let overlap = req
        .chunk_overlap
        .unwrap_or(state.config.chunking.chunk_overlap);
    let pieces = chunk::chunk_text(&req.text, size, overlap)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let chunks: Vec<ChunkPreview> = pieces
        .into_iter()
        .map(|p| ChunkPreview {
            index: p.index,
            size: p.size(),
            overlap: p.overlap,
            start: p.start,
            end: p.end,
            content: p.text,
        })
        .collect();
    Ok(Json(TestChunkingResponse {
        total_chunks: chunks.len(),
        chunks,
    }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequestBody {
    messages: Vec<ChatMessage>,
    assessment_id: Option<String>,
    archetype_id: Option<String>,
}

#[derive(Serialize)]
struct ChatResponseBody {
    content: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    _user: CurrentUser,
    AppJson(req): AppJson<ChatRequestBody>,
) -> ApiResult<Json<ChatResponseBody>> {
    let scope = owner_from_ids(req.assessment_id, req.archetype_id)?;
    let content = run_chat(&state.chat_ctx(), &req.messages, scope.as_ref()).await?;
    Ok(Json(ChatResponseBody { content }))
}

// ============ Parents ============

#[derive(Deserialize)]
struct CreateParentRequest {
    title: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Serialize)]
struct ParentListResponse {
    items: Vec<KnowledgeParent>,
}

async fn create_parent(
    state: &AppState,
    kind: OwnerKind,
    req: CreateParentRequest,
) -> ApiResult<(StatusCode, Json<KnowledgeParent>)> {
    if req.title.trim().is_empty() {
        return Err(ApiError::bad_request("title must not be empty"));
    }
    let parent = state
        .knowledge
        .create_parent(kind, req.title.trim(), req.description.as_deref())
        .await?;
    tracing::info!(kind = %kind, id = %parent.id, "created parent");
    Ok((StatusCode::CREATED, Json(parent)))
}

async fn handle_create_assessment(
    State(state): State<AppState>,
    _user: CurrentUser,
    AppJson(req): AppJson<CreateParentRequest>,
) -> ApiResult<(StatusCode, Json<KnowledgeParent>)> {
    create_parent(&state, OwnerKind::Assessment, req).await
}

async fn handle_create_archetype(
    State(state): State<AppState>,
    _user: CurrentUser,
    AppJson(req): AppJson<CreateParentRequest>,
) -> ApiResult<(StatusCode, Json<KnowledgeParent>)> {
    create_parent(&state, OwnerKind::Archetype, req).await
}

async fn handle_list_assessments(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> ApiResult<Json<ParentListResponse>> {
    let items = state.knowledge.list_parents(OwnerKind::Assessment).await?;
    Ok(Json(ParentListResponse { items }))
}

async fn handle_list_archetypes(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> ApiResult<Json<ParentListResponse>> {
    let items = state.knowledge.list_parents(OwnerKind::Archetype).await?;
    Ok(Json(ParentListResponse { items }))
}

// ============ Assessment sessions ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionRequest {
    assessment_id: String,
}

#[derive(Serialize)]
struct SessionListResponse {
    sessions: Vec<AssessmentSession>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressRequest {
    progress_percentage: u32,
    current_question_index: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest {
    #[serde(default)]
    discovered_archetypes: Vec<DiscoveredArchetype>,
}

/// Load a session owned by `user`; other users' sessions read as missing.
async fn owned_session(
    state: &AppState,
    user: &CurrentUser,
    id: &str,
) -> ApiResult<AssessmentSession> {
    match state.sessions.get_session(id).await? {
        Some(session) if session.user_id == user.id => Ok(session),
        _ => Err(ApiError::not_found(format!("session {} not found", id))),
    }
}

/// Persist a transition computed from an in-progress snapshot. A concurrent
/// request may have finished or deleted the session since it was loaded.
async fn save_transition(state: &AppState, session: &AssessmentSession) -> ApiResult<()> {
    if state.sessions.save_session(session).await? {
        return Ok(());
    }
    match state.sessions.get_session(&session.id).await? {
        Some(current) => Err(SessionError::Terminal(current.status).into()),
        None => Err(ApiError::not_found(format!("session {} not found", session.id))),
    }
}

async fn handle_start_session(
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(req): AppJson<StartSessionRequest>,
) -> ApiResult<(StatusCode, Json<AssessmentSession>)> {
    let owner = ContentOwner::Assessment(req.assessment_id);
    if state.knowledge.get_parent(&owner).await?.is_none() {
        return Err(ApiError::not_found(format!("{} not found", owner)));
    }
    let session = AssessmentSession::start(&user.id, owner.id());
    state.sessions.insert_session(&session).await?;
    tracing::info!(session = %session.id, user = %user.id, "session started");
    Ok((StatusCode::CREATED, Json(session)))
}

async fn handle_list_sessions(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<SessionListResponse>> {
    let sessions = state.sessions.list_sessions(&user.id).await?;
    Ok(Json(SessionListResponse { sessions }))
}

async fn handle_get_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<AssessmentSession>> {
    Ok(Json(owned_session(&state, &user, &id).await?))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<DeletedResponse>> {
    owned_session(&state, &user, &id).await?;
    let deleted = state.sessions.delete_session(&id).await?;
    Ok(Json(DeletedResponse { deleted }))
}

async fn handle_session_progress(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<ProgressRequest>,
) -> ApiResult<Json<AssessmentSession>> {
    let mut session = owned_session(&state, &user, &id).await?;
    session.record_progress(req.progress_percentage, req.current_question_index)?;
    save_transition(&state, &session).await?;
    Ok(Json(session))
}

async fn handle_session_complete(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<CompleteRequest>,
) -> ApiResult<Json<AssessmentSession>> {
    let mut session = owned_session(&state, &user, &id).await?;
    session.complete(req.discovered_archetypes)?;
    save_transition(&state, &session).await?;
    tracing::info!(session = %session.id, "session completed");
    Ok(Json(session))
}

async fn handle_session_abandon(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<AssessmentSession>> {
    let mut session = owned_session(&state, &user, &id).await?;
    session.abandon()?;
    save_transition(&state, &session).await?;
    Ok(Json(session))
}

// ============ Billing ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutBody {
    price_id: String,
    success_url: String,
    cancel_url: String,
}

async fn handle_checkout(
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(req): AppJson<CheckoutBody>,
) -> ApiResult<Json<CheckoutSession>> {
    if req.price_id.trim().is_empty() {
        return Err(ApiError::bad_request("priceId must not be empty"));
    }
    let session = state
        .payments
        .create_checkout(&CheckoutRequest {
            user_id: &user.id,
            price_id: &req.price_id,
            success_url: &req.success_url,
            cancel_url: &req.cancel_url,
        })
        .await
        .map_err(|e| ApiError::Upstream(format!("{:#}", e)))?;
    Ok(Json(session))
}

#[derive(Serialize)]
struct WebhookResponse {
    received: bool,
}

const SIGNATURE_HEADER: &str = "stripe-signature";

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let secret = state
        .config
        .billing
        .webhook_secret
        .as_deref()
        .ok_or_else(|| ApiError::Internal(WebhookError::MissingSecret.to_string()))?;
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("missing Stripe-Signature header"))?;

    verify_signature(
        secret,
        header,
        &body,
        state.config.billing.webhook_tolerance_secs,
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "rejected webhook");
        ApiError::bad_request(e.to_string())
    })?;

    match handle_event(state.subscriptions.as_ref(), &body).await {
        Ok(outcome) => tracing::debug!(?outcome, "webhook handled"),
        Err(HandleError::Webhook(e)) => return Err(ApiError::bad_request(e.to_string())),
        Err(HandleError::Store(e)) => return Err(e.into()),
    }
    Ok(Json(WebhookResponse { received: true }))
}

#[derive(Serialize)]
struct SubscriptionResponse {
    subscription: Option<Subscription>,
}

async fn handle_subscription(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = state.subscriptions.subscription_for_user(&user.id).await?;
    Ok(Json(SubscriptionResponse { subscription }))
}

// ============ Media ============

fn media_error(capability: MediaCapability) -> ApiError {
    match media::generate(capability) {
        MediaOutcome::NotImplemented { capability } => ApiError::NotImplemented(capability),
    }
}

async fn handle_generate_avatar(_user: CurrentUser) -> ApiError {
    media_error(MediaCapability::Avatar)
}

async fn handle_generate_video(_user: CurrentUser) -> ApiError {
    media_error(MediaCapability::Video)
}
