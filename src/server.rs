//! Server assembly: axum router, shared state, WebSocket and health routes

use anyhow::{Context, Result};
use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::claude::client::ClaudeClient;
use crate::claude::executor::ToolExecutor;
use crate::config::{Settings, WorkspaceConfig};
use crate::safety::PathSandbox;
use crate::stt::{SttEngine, WhisperStt};
use crate::tts::{OpenAiTts, TtsEngine};
use crate::ws::session::{Session, SessionRegistry};

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub claude: Arc<ClaudeClient>,
    /// Executor bound to the default workspace root, used until a
    /// workspace is selected
    pub default_executor: Arc<ToolExecutor>,
    pub stt: Option<Arc<dyn SttEngine>>,
    pub tts: Option<Arc<dyn TtsEngine>>,
    pub workspaces: Arc<Vec<WorkspaceConfig>>,
    pub registry: Arc<SessionRegistry>,
}

/// Wire up engines and shared state from loaded settings.
pub fn build_state(settings: Settings) -> Result<AppState> {
    let settings = Arc::new(settings);

    let sandbox = PathSandbox::new(&settings.workspace_root)
        .context("Failed to set up workspace root sandbox")?;
    let default_executor = Arc::new(ToolExecutor::new(
        sandbox,
        settings.safety.blocked_commands.clone(),
        settings.safety.command_timeout,
    ));

    if settings.anthropic_api_key.is_empty() {
        warn!("No Anthropic API key configured — Claude requests will fail");
    }
    let claude = Arc::new(ClaudeClient::new(
        settings.anthropic_api_key.clone(),
        settings.claude.model.clone(),
        settings.claude.max_tokens,
    ));

    let (stt, tts): (Option<Arc<dyn SttEngine>>, Option<Arc<dyn TtsEngine>>) =
        if settings.openai_api_key.is_empty() {
            warn!("No OpenAI API key — STT and TTS disabled");
            (None, None)
        } else {
            info!("STT engine configured: Whisper {}", settings.stt.model_size);
            info!("TTS engine configured: OpenAI {}", settings.tts.model);
            (
                Some(Arc::new(WhisperStt::new(
                    settings.openai_api_key.clone(),
                    settings.stt.model_size.clone(),
                    settings.stt.language.clone(),
                ))),
                Some(Arc::new(OpenAiTts::new(
                    settings.openai_api_key.clone(),
                    &settings.tts,
                ))),
            )
        };

    let workspaces = Arc::new(settings.workspaces.clone());
    let registry = Arc::new(SessionRegistry::new());

    Ok(AppState {
        settings,
        claude,
        default_executor,
        stt,
        tts,
        workspaces,
        registry,
    })
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server and block until shutdown.
pub async fn start(settings: Settings) -> Result<()> {
    let state = build_state(settings)?;
    state.registry.start_cleanup();

    let addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()
    .context("Invalid server address")?;

    info!("Starting server on {}", addr);
    info!("Workspace root: {}", state.settings.workspace_root);
    if !state.workspaces.is_empty() {
        let names: Vec<&str> = state.workspaces.iter().map(|w| w.name.as_str()).collect();
        info!("Workspaces: {:?}", names);
    }

    let registry = state.registry.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    registry.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    stt: bool,
    tts: bool,
    active_sessions: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stt: state.stt.is_some(),
        tts: state.tts.is_some(),
        active_sessions: state.registry.len(),
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let session = Arc::new(Session::new(state.settings.clone()));
        let session_id = session.session_id.clone();
        state.registry.add(session.clone());
        info!("New connection: session {}", session_id);

        crate::ws::handler::handle(socket, state.clone(), session).await;

        state.registry.remove(&session_id);
        info!("Session {} removed from registry", session_id);
    })
}
