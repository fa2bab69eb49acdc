use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use tower_http::trace::TraceLayer;

use tracing::info;

use crate::AppState;
use crate::config::{AppConfig, MIN_SECRET_LEN};
use crate::error::AppError;
use crate::llm::OllamaClient;
use crate::normalized::sse_event;
use crate::relay::ConversationRelay;
use crate::session::{Message, SessionToken};
use crate::store::SessionStore;
use crate::transcript::{ACKNOWLEDGEMENT, Acknowledgement, TranscriptOutcome};
use crate::{sentiment, speech};

/// Request-level limits applied by the router.
#[derive(Debug, Clone, Copy)]
pub struct HttpLimits {
    pub body_limit_bytes: usize,
    pub request_timeout: Duration,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            body_limit_bytes: 1024 * 1024,
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let settings = config.llm_settings();
    info!(
        name: "llm.config.loaded",
        endpoint = %settings.endpoint,
        model = %settings.model,
        "LLM configuration loaded"
    );

    let store = SessionStore::connect(&config.persistence).await?;
    info!(
        name: "store.connected",
        provider = %config.persistence.provider,
        "Session store ready"
    );

    let relay = ConversationRelay::new(
        store,
        Arc::new(OllamaClient::new(settings)),
        sentiment::from_config(&config.sentiment),
        config.prompt_settings(),
    )
    .with_scoring_timeout(Duration::from_millis(config.sentiment.timeout_ms));

    let state = AppState {
        relay,
        speech: speech::from_config(&config.speech),
        cookie_key: cookie_key(config.session.secret.as_deref()),
        cookie_name: Arc::from(config.session.cookie_name.as_str()),
    };

    let app = build_router(
        state,
        HttpLimits {
            body_limit_bytes: config.server.body_limit_bytes,
            request_timeout: config.request_timeout(),
        },
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(name: "server.stopping", "Shutdown signal received");
}

/// Cookie signing key from the configured secret, or a random one.
pub fn cookie_key(secret: Option<&str>) -> Key {
    match secret {
        Some(secret) if secret.len() >= MIN_SECRET_LEN => Key::derive_from(secret.as_bytes()),
        Some(_) => {
            tracing::warn!("Session secret too short; using a random key");
            Key::generate()
        }
        None => {
            tracing::warn!("No session secret configured; sessions will not survive a restart");
            Key::generate()
        }
    }
}

/// Build the application router with all routes and layers.
pub fn build_router(state: AppState, limits: HttpLimits) -> Router {
    let timeout_duration = limits.request_timeout;

    Router::new()
        .route("/chat", post(chat))
        .route("/chat-stream", post(chat_stream))
        .route("/chat/reset", post(reset_chat))
        .route("/start-session", post(start_session))
        .route("/end-session", post(end_session))
        .route("/session/{id}", get(restore_session))
        .route("/api/sessions/{id}/messages", get(session_messages))
        .route("/tts", post(tts))
        .layer(DefaultBodyLimit::max(limits.body_limit_bytes))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Session cookie
// ─────────────────────────────────────────────────────────────────────────────

fn read_token(state: &AppState, jar: &SignedCookieJar) -> SessionToken {
    jar.get(&state.cookie_name)
        .and_then(|c| SessionToken::decode(c.value()))
        .unwrap_or_default()
}

fn write_token(state: &AppState, jar: SignedCookieJar, token: &SessionToken) -> SignedCookieJar {
    let cookie = Cookie::build((state.cookie_name.to_string(), token.encode()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    jar.add(cookie)
}

fn clear_token(state: &AppState, jar: SignedCookieJar) -> SignedCookieJar {
    jar.remove(Cookie::build((state.cookie_name.to_string(), "")).path("/"))
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for both chat endpoints.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    reply: String,
}

/// POST /chat - Complete reply in one response.
async fn chat(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(req): Json<ChatRequest>,
) -> Result<(SignedCookieJar, Json<ChatResponse>), AppError> {
    let token = read_token(&state, &jar);
    let (reply, token) = state.relay.handle_message(token, &req.message).await?;
    Ok((
        write_token(&state, jar, &token),
        Json(ChatResponse { reply }),
    ))
}

/// POST /chat-stream - Reply as an event stream.
async fn chat_stream(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(req): Json<ChatRequest>,
) -> Result<(SignedCookieJar, Response), AppError> {
    let token = read_token(&state, &jar);
    let (events, token) = state
        .relay
        .handle_message_stream(token, &req.message)
        .await?;

    let sse_stream = events.map(|event| Ok::<String, std::convert::Infallible>(sse_event(&event)));
    let body = Body::from_stream(sse_stream);
    Ok((write_token(&state, jar, &token), build_sse_response(body)))
}

fn build_sse_response(body: Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    h.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    h.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    resp
}

#[derive(Debug, Deserialize)]
struct StartSessionRequest {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct StartSessionResponse {
    session_id: String,
}

/// POST /start-session - Attach to (or create) a session.
async fn start_session(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(req): Json<StartSessionRequest>,
) -> Result<(SignedCookieJar, Json<StartSessionResponse>), AppError> {
    let token = read_token(&state, &jar);
    let (session_id, token) = state
        .relay
        .start_session(token, req.email.as_deref())
        .await?;
    Ok((
        write_token(&state, jar, &token),
        Json(StartSessionResponse { session_id }),
    ))
}

/// POST /end-session - Close the session and download its transcript.
async fn end_session(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    let token = read_token(&state, &jar);
    let (outcome, _) = state.relay.end_session(token).await;
    let jar = clear_token(&state, jar);

    match outcome {
        TranscriptOutcome::Full(doc) | TranscriptOutcome::Minimal(doc) => (
            jar,
            [
                (
                    header::CONTENT_TYPE,
                    "text/plain; charset=utf-8".to_string(),
                ),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", doc.filename),
                ),
            ],
            doc.body,
        )
            .into_response(),
        TranscriptOutcome::Acknowledgement => (
            jar,
            Json(Acknowledgement {
                message: ACKNOWLEDGEMENT,
            }),
        )
            .into_response(),
    }
}

/// POST /chat/reset - Forget the client-side session.
async fn reset_chat(State(state): State<AppState>, jar: SignedCookieJar) -> impl IntoResponse {
    let token = state.relay.reset(read_token(&state, &jar));
    let jar = if token.is_empty() {
        clear_token(&state, jar)
    } else {
        write_token(&state, jar, &token)
    };
    (jar, StatusCode::NO_CONTENT)
}

/// GET /session/{id} - Re-attach to an earlier session.
async fn restore_session(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Path(id): Path<String>,
) -> Result<(SignedCookieJar, Json<crate::relay::RestoredSession>), AppError> {
    let (restored, token) = state.relay.restore(&id).await?;
    info!(name: "session.restored", session_id = %id, "Session restored");
    Ok((write_token(&state, jar, &token), Json(restored)))
}

/// GET /api/sessions/{id}/messages - Ordered message log.
async fn session_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, AppError> {
    Ok(Json(state.relay.messages(&id).await?))
}

#[derive(Debug, Deserialize)]
struct TtsRequest {
    #[serde(default)]
    text: String,
}

/// POST /tts - Synthesize speech for a reply.
async fn tts(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> Result<Response, AppError> {
    if req.text.trim().is_empty() {
        return Err(AppError::BadRequest("Missing text".to_string()));
    }

    let audio = state.speech.synthesize(&req.text).await.map_err(|e| {
        tracing::warn!(name: "speech.failed", error = %e, "Speech synthesis failed");
        AppError::from(e)
    })?;

    Ok(([(header::CONTENT_TYPE, audio.content_type)], audio.bytes).into_response())
}
