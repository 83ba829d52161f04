use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use lector_core::adapters::{DiagramRenderer, ImageLookup, QuestionClassifier, SlidePlanner, VoiceoverSynthesizer};
use lector_core::protocol::ErrorCode;
use lector_core::store::LectureStore;
use lector_engine::{AssetAdapters, AssetOrchestrator, GenerationRequest, LectureGenerator, OrchestratorConfig, QuestionResponder};
use lector_store::{CachedLectureStore, SqliteAssetStore, StoreError};
use lector_telemetry::MetricsRecorder;

use crate::client::{self, ClientRegistry, Outbox};
use crate::session::{Session, SessionDeps};

pub const LECTURE_ID_HEADER: &str = "x-lecture-id";

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9091,
            max_send_queue: 256,
            cache_ttl_secs: 300,
            cache_capacity: 1024,
        }
    }
}

/// Backends the server wires together at startup.
pub struct Services {
    pub lectures: Arc<dyn LectureStore>,
    pub assets: SqliteAssetStore,
    pub classifier: Arc<dyn QuestionClassifier>,
    pub planner: Arc<dyn SlidePlanner>,
    pub diagrams: Arc<dyn DiagramRenderer>,
    pub images: Arc<dyn ImageLookup>,
    pub voiceover: Arc<dyn VoiceoverSynthesizer>,
    pub orchestrator: OrchestratorConfig,
    pub metrics: Arc<MetricsRecorder>,
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub client_registry: Arc<ClientRegistry>,
    pub session_deps: SessionDeps,
    pub generator: Arc<LectureGenerator>,
    pub assets: SqliteAssetStore,
    pub metrics: Arc<MetricsRecorder>,
    pub progress_buffer: usize,
}

impl AppState {
    pub fn new(config: &ServerConfig, services: Services) -> Self {
        let lectures: Arc<dyn LectureStore> = Arc::new(CachedLectureStore::new(
            services.lectures,
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_capacity,
        ));
        let orchestrator = Arc::new(
            AssetOrchestrator::new(
                AssetAdapters {
                    diagrams: services.diagrams,
                    images: services.images,
                    voiceover: services.voiceover,
                    assets: Arc::new(services.assets.clone()),
                },
                Arc::clone(&lectures),
                services.orchestrator,
            )
            .with_metrics(Arc::clone(&services.metrics)),
        );
        let responder = Arc::new(QuestionResponder::new(
            services.classifier,
            Arc::clone(&services.planner),
            Arc::clone(&orchestrator),
        ));

        Self {
            client_registry: Arc::new(ClientRegistry::new(config.max_send_queue)),
            session_deps: SessionDeps { lectures, responder },
            generator: Arc::new(LectureGenerator::new(services.planner, orchestrator)),
            assets: services.assets,
            metrics: services.metrics,
            progress_buffer: config.max_send_queue,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/lectures", post(create_lecture_handler))
        .route("/assets/{id}", get(asset_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps it running.
pub async fn start(config: ServerConfig, services: Services) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(&config, services);

    let cleanup = client::start_cleanup_task(Arc::clone(&state.client_registry), Duration::from_secs(60));

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(port = local_addr.port(), "lector server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            warn!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
        _cleanup: cleanup,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (session_id, rx) = state.client_registry.register();
    info!(session_id = %session_id, "websocket client connected");

    let outbox = Outbox::new(Arc::clone(&state.client_registry), session_id.clone());
    let session = Session::new(session_id, state.session_deps, outbox);
    client::handle_ws_connection(socket, session, rx, state.client_registry).await;
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "clients": state.client_registry.count(),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

fn error_response(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Response {
    let body = json!({ "error": code, "message": message.into() });
    (status, Json(body)).into_response()
}

/// Create a lecture and stream its generation progress as NDJSON.
async fn create_lecture_handler(State(state): State<AppState>, Json(request): Json<GenerationRequest>) -> Response {
    if request.topic.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, ErrorCode::BadRequest, "topic must not be empty");
    }

    let (lecture_id, rx) = match state.generator.start(request, state.progress_buffer).await {
        Ok(started) => started,
        Err(e) => {
            warn!(error = %e, "failed to create lecture");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::PersistenceFailed, e.to_string());
        }
    };
    info!(lecture_id = %lecture_id, "lecture generation started");

    let lines = ReceiverStream::new(rx).map(|msg| {
        let mut line = serde_json::to_string(&msg).unwrap_or_else(|e| {
            json!({"type": "error", "error": ErrorCode::Internal, "message": e.to_string()}).to_string()
        });
        line.push('\n');
        Ok::<_, Infallible>(line)
    });

    let mut response = Response::new(Body::from_stream(lines));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
    if let Ok(value) = HeaderValue::from_str(lecture_id.as_str()) {
        headers.insert(LECTURE_ID_HEADER, value);
    }
    response
}

async fn asset_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.assets.load(&id) {
        Ok(payload) => ([(header::CONTENT_TYPE, payload.mime)], payload.data).into_response(),
        Err(StoreError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, ErrorCode::NotFound, format!("asset {id}")),
        Err(e) => {
            warn!(asset_id = %id, error = %e, "failed to load asset");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::PersistenceFailed, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lector_adapters::mock::{MockAssets, MockClassifier, MockPlanner};
    use lector_core::lecture::{DiagramKind, LectureDocument, SlideDraft};
    use lector_core::protocol::ProgressMessage;
    use lector_store::{Database, SqliteLectureStore};

    fn services(db: &Database, planner: MockPlanner) -> Services {
        let assets = Arc::new(MockAssets::new().with_inline_voiceover());
        Services {
            lectures: Arc::new(SqliteLectureStore::new(db.clone())),
            assets: SqliteAssetStore::new(db.clone()),
            classifier: Arc::new(MockClassifier::simple("ok")),
            planner: Arc::new(planner),
            diagrams: assets.clone(),
            images: assets.clone(),
            voiceover: assets,
            orchestrator: OrchestratorConfig::default(),
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    async fn start_test_server(planner: MockPlanner) -> (Database, ServerHandle) {
        let db = Database::in_memory().unwrap();
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let handle = start(config, services(&db, planner)).await.unwrap();
        (db, handle)
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let (_db, handle) = start_test_server(MockPlanner::new(vec![])).await;
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["clients"], 0);
    }

    #[tokio::test]
    async fn create_lecture_streams_progress() {
        let plan = vec![
            SlideDraft::new("Intro", "body", "hello").with_diagram(DiagramKind::Timeline, "history"),
            SlideDraft::new("End", "body", "bye"),
        ];
        let (db, handle) = start_test_server(MockPlanner::new(plan)).await;

        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{}/lectures", handle.port))
            .json(&json!({"topic": "Clocks", "permitted_users": ["bob"]}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let lecture_id = resp.headers()[LECTURE_ID_HEADER].to_str().unwrap().to_string();
        assert!(lecture_id.starts_with("lec_"));

        let body = resp.text().await.unwrap();
        let messages: Vec<ProgressMessage> = body.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(messages.len(), 1 + 3 + 3 + 1);
        assert_eq!(messages.last(), Some(&ProgressMessage::CompletedAll));

        let store = SqliteLectureStore::new(db.clone());
        let raw = store.get(&lector_core::ids::LectureId::from_raw(lecture_id)).await.unwrap();
        let doc = LectureDocument::from_value(raw).unwrap();
        assert_eq!(doc.slides.len(), 2);

        // Inline narration was moved into the asset table and is served back.
        let voiceover = doc.slides[0].voiceover_url.clone().unwrap();
        let asset_id = voiceover.strip_prefix("asset://").unwrap();
        let asset = reqwest::get(format!("http://127.0.0.1:{}/assets/{asset_id}", handle.port))
            .await
            .unwrap();
        assert_eq!(asset.status(), 200);
        assert_eq!(asset.headers()[header::CONTENT_TYPE], "audio/mpeg");
    }

    #[tokio::test]
    async fn create_lecture_rejects_empty_topic() {
        let (_db, handle) = start_test_server(MockPlanner::new(vec![])).await;
        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{}/lectures", handle.port))
            .json(&json!({"topic": "  "}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn missing_asset_is_404() {
        let (_db, handle) = start_test_server(MockPlanner::new(vec![])).await;
        let resp = reqwest::get(format!("http://127.0.0.1:{}/assets/deadbeef", handle.port))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn metrics_reflect_generated_jobs() {
        let (_db, handle) = start_test_server(MockPlanner::new(vec![SlideDraft::new("a", "b", "c")])).await;
        let base = format!("http://127.0.0.1:{}", handle.port);
        reqwest::Client::new()
            .post(format!("{base}/lectures"))
            .json(&json!({"topic": "Tides"}))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        let samples: Vec<serde_json::Value> = reqwest::get(format!("{base}/metrics")).await.unwrap().json().await.unwrap();
        assert!(samples
            .iter()
            .any(|s| s["name"] == "batches_persisted_total" && s["value"] == 1));
    }
}
