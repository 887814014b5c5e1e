//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `POST` | `/auth/login` | no | Form login, returns a bearer token |
//! | `POST` | `/upload-file` | yes | Multipart upload (`file`), runs the ingestion pipeline |
//! | `GET` | `/files` | yes | List file metadata |
//! | `GET` | `/files/{file_id}` | yes | One file's metadata |
//! | `DELETE` | `/files/{file_id}` | yes | Delete a file and its chunks |
//! | `POST` | `/chat` | yes | Retrieval-augmented chat |
//! | `GET` | `/health` | no | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every error response has the shape
//!
//! ```json
//! { "status": "error", "code": "FILE_VALIDATION_ERROR", "message": "File size exceeds 5 MB limit" }
//! ```
//!
//! with the codes and statuses of [`ServiceError`]. Malformed JSON, form or
//! multipart bodies are reported as `VALIDATION_ERROR` (422).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{
        multipart::MultipartError,
        rejection::{FormRejection, JsonRejection, PathRejection},
        DefaultBodyLimit, FromRef, Multipart, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{AuthService, AuthUser};
use crate::azure_search::AzureSearchIndex;
use crate::chat::{AzureOpenAiChat, ChatModel, ChatService};
use crate::chunk::TextChunker;
use crate::config::Config;
use crate::cosmos::CosmosMetadataStore;
use crate::credential::{
    default_credential, ServiceAuth, TokenCredential, COGNITIVE_SERVICES_SCOPE, SEARCH_SCOPE,
};
use crate::embedding::{AzureOpenAiEmbedder, Embedder};
use crate::error::ServiceError;
use crate::extract::{read_file, ExtractError};
use crate::index::{VectorIndex, VectorStore};
use crate::metadata::MetadataStore;
use crate::models::{
    ChatRequest, ChatResponse, DeleteFileResponse, ErrorResponse, GetFileResponse, LoginForm,
    ListFilesResponse, TokenResponse, UploadFileResponse,
};
use crate::pipeline::FileService;
use crate::validate::{size_error, validate_filename, SizeLimit};

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<AuthService>,
    pub files: FileService,
    pub chat: ChatService,
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

impl AppState {
    /// Wire services over the given backends.
    pub fn new(
        config: Config,
        metadata: Arc<dyn MetadataStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        chat_model: Arc<dyn ChatModel>,
    ) -> anyhow::Result<Self> {
        let chunker = TextChunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
        let vectors = VectorStore::new(embedder, index);
        Ok(Self {
            auth: Arc::new(AuthService::new(&config.auth)),
            files: FileService::new(metadata, vectors, chunker),
            chat: ChatService::new(chat_model),
            config: Arc::new(config),
        })
    }

    /// Wire services over Azure OpenAI, Cosmos DB and AI Search.
    pub fn azure(config: Config, credential: Arc<dyn TokenCredential>) -> anyhow::Result<Self> {
        config.require_azure()?;

        let openai_auth = ServiceAuth::from_key_or_token(
            config.openai.api_key.as_deref(),
            &credential,
            COGNITIVE_SERVICES_SCOPE,
        );
        let search_auth = ServiceAuth::from_key_or_token(
            config.search.api_key.as_deref(),
            &credential,
            SEARCH_SCOPE,
        );

        let metadata = Arc::new(CosmosMetadataStore::new(&config.cosmos, credential.clone())?);
        let embedder = Arc::new(AzureOpenAiEmbedder::new(&config.openai, openai_auth.clone())?);
        let index = Arc::new(AzureSearchIndex::new(&config.search, search_auth)?);
        let chat_model = Arc::new(AzureOpenAiChat::new(&config.openai, openai_auth)?);

        Self::new(config, metadata, embedder, index, chat_model)
    }
}

/// Build the router with all routes and middleware.
pub fn router(state: AppState) -> Router {
    let upload_limit = state.config.server.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/auth/login", post(handle_login))
        .route(
            "/upload-file",
            post(handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/files", get(handle_list_files))
        .route(
            "/files/{file_id}",
            get(handle_get_file).delete(handle_delete_file),
        )
        .route("/chat", post(handle_chat))
        .route("/chat/", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server.
///
/// Loads auth secrets from Key Vault when `[key_vault].url` is set, builds
/// the Azure backends and serves until the process is terminated.
pub async fn run_server(mut config: Config) -> anyhow::Result<()> {
    let credential = default_credential();

    if let Some(url) = config.key_vault.url.clone() {
        crate::keyvault::load_auth_secrets(&url, credential.clone(), &mut config.auth).await?;
    }
    config.require_auth()?;

    let bind_addr = config.server.bind.clone();
    let state = AppState::azure(config, credential)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "API server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error Handling ============

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.is_client_error() {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        } else {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            status: "error".to_string(),
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn form_rejection(rejection: FormRejection) -> ServiceError {
    ServiceError::Validation(format!("body: {}", rejection.body_text()))
}

fn json_rejection(rejection: JsonRejection) -> ServiceError {
    ServiceError::Validation(format!("body: {}", rejection.body_text()))
}

fn path_rejection(rejection: PathRejection) -> ServiceError {
    ServiceError::Validation(format!("file_id: {}", rejection.body_text()))
}

/// A multipart stream error; an oversized body surfaces here as 413.
fn multipart_error(err: MultipartError, max_upload_bytes: usize) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        size_error(max_upload_bytes)
    } else {
        ServiceError::Validation(format!("file: {}", err.body_text()))
    }
}

// ============ POST /auth/login ============

async fn handle_login(
    State(state): State<AppState>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Result<Json<TokenResponse>, ServiceError> {
    let Form(form) = form.map_err(form_rejection)?;
    state.auth.validate_user(&form.username, &form.password)?;
    let access_token = state.auth.create_access_token(&form.username, None)?;
    tracing::info!(username = %form.username, "login succeeded");
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

// ============ POST /upload-file ============

async fn handle_upload(
    State(state): State<AppState>,
    _user: AuthUser,
    multipart: Result<Multipart, axum::extract::multipart::MultipartRejection>,
) -> Result<Json<UploadFileResponse>, ServiceError> {
    let max_bytes = state.config.server.max_upload_bytes;
    let mut multipart =
        multipart.map_err(|e| ServiceError::Validation(format!("file: {}", e.body_text())))?;

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        validate_filename(&filename)?;

        let mut limit = SizeLimit::new(max_bytes);
        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| multipart_error(e, max_bytes))?
        {
            if let Err(e) = limit.add(chunk.len()) {
                // drain the remainder; the body limit bounds it
                while let Ok(Some(_)) = field.chunk().await {}
                return Err(e);
            }
            bytes.extend_from_slice(&chunk);
        }
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) =
        upload.ok_or_else(|| ServiceError::Validation("file: Field required".to_string()))?;
    tracing::info!(filename = %filename, bytes = bytes.len(), "received upload");

    let name = filename.clone();
    let content = tokio::task::spawn_blocking(move || read_file(&name, &bytes))
        .await
        .map_err(|e| ServiceError::Internal(e.into()))?
        .map_err(|e| match e {
            ExtractError::UnsupportedFileType(_) => ServiceError::FileValidation(e.to_string()),
            ExtractError::Parse { .. } => ServiceError::FileProcessing(e.to_string()),
        })?;

    let result = state.files.process_file(&filename, &content).await?;
    Ok(Json(result))
}

// ============ /files ============

async fn handle_list_files(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<ListFilesResponse>, ServiceError> {
    let files = state.files.metadata().list_files().await?;
    Ok(Json(ListFilesResponse { files }))
}

async fn handle_get_file(
    State(state): State<AppState>,
    _user: AuthUser,
    file_id: Result<Path<String>, PathRejection>,
) -> Result<Json<GetFileResponse>, ServiceError> {
    let Path(file_id) = file_id.map_err(path_rejection)?;
    let file = state.files.metadata().get_file(&file_id).await?;
    Ok(Json(GetFileResponse { file }))
}

async fn handle_delete_file(
    State(state): State<AppState>,
    _user: AuthUser,
    file_id: Result<Path<String>, PathRejection>,
) -> Result<Json<DeleteFileResponse>, ServiceError> {
    let Path(file_id) = file_id.map_err(path_rejection)?;
    let deleted = state.files.delete_file(&file_id).await?;
    Ok(Json(DeleteFileResponse { file_id, deleted }))
}

// ============ POST /chat ============

async fn handle_chat(
    State(state): State<AppState>,
    _user: AuthUser,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ServiceError> {
    let Json(request) = request.map_err(json_rejection)?;
    if request.question.trim().is_empty() {
        return Err(ServiceError::Validation("Question cannot be empty".to_string()));
    }

    let search = &state.config.search;
    let context = state
        .files
        .vectors()
        .similarity_search(&request.question, search.top_k, search.score_threshold, None)
        .await?;

    let response = state
        .chat
        .chat_with_context(&request.question, request.chat_history.as_deref(), &context)
        .await?;
    Ok(Json(response))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
