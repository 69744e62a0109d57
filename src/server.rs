use axum::{
    extract::{FromRequest, Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    ask::{AskOutcome, Asker},
    auth::{require_auth, AuthService, AuthUser},
    chat::{Chat, ChatSummary},
    error::{ApiError, ApiResult},
    store::Store,
};

// -----------------------------------------------------------------------------
// Request / response bodies
// -----------------------------------------------------------------------------

/// `Json` extractor whose rejections go through [`ApiError`], so malformed
/// bodies get a 400 with the usual `{"error": ...}` body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl CredentialsRequest {
    fn parts(&self) -> (&str, &str) {
        (
            self.username.as_deref().unwrap_or_default(),
            self.password.as_deref().unwrap_or_default(),
        )
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub query: Option<String>,
    pub chat_id: Option<String>,
}

// -----------------------------------------------------------------------------
// Server State
// -----------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub auth: AuthService,
    pub asker: Asker,
}

// -----------------------------------------------------------------------------
// Implementation
// -----------------------------------------------------------------------------

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        let protected = Router::new()
            .route("/api/chats", get(list_chats_handler))
            .route("/api/chats/:id", get(get_chat_handler))
            .route("/api/ask", post(ask_handler))
            .route_layer(middleware::from_fn_with_state(
                self.state.auth.clone(),
                require_auth,
            ));

        Router::new()
            .route("/api/auth/register", post(register_handler))
            .route("/api/auth/login", post(login_handler))
            .merge(protected)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }
}

async fn register_handler(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CredentialsRequest>,
) -> ApiResult<impl IntoResponse> {
    let (username, password) = body.parts();
    let token = state.auth.register(username, password).await?;
    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

async fn login_handler(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CredentialsRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let (username, password) = body.parts();
    let token = state.auth.login(username, password).await?;
    info!("User {} logged in", username);
    Ok(Json(TokenResponse { token }))
}

async fn list_chats_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<ChatSummary>>> {
    Ok(Json(state.store.list_chats(&user.user_id).await?))
}

async fn get_chat_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<Chat>> {
    Ok(Json(state.store.get_chat(&chat_id, &user.user_id).await?))
}

async fn ask_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(body): ApiJson<AskRequest>,
) -> ApiResult<Json<AskOutcome>> {
    let outcome = state
        .asker
        .ask(
            &user.user_id,
            body.query.as_deref(),
            body.chat_id.as_deref(),
        )
        .await?;
    Ok(Json(outcome))
}
