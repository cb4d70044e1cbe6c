use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::assistant::{
    error::{ChatError, FailureReason},
    graph::ResearchGraph,
    state::{ConversationTurn, ExtractionCounts, ResearchSession, StatusUpdate},
};

pub struct AppState {
    graph: ResearchGraph,
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<ResearchSession>>>>,
    status_tx: broadcast::Sender<StatusUpdate>,
}

#[derive(Deserialize)]
pub struct ResearchRequest {
    topic: String,
    /// Lets the caller follow the run on `/events` before the response arrives.
    #[serde(default)]
    run_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ResearchResponse {
    pub session_id: Uuid,
    pub status: String,
    pub reason: Option<String>,
    pub report: Option<String>,
    pub sources: Vec<String>,
    pub queries: Vec<String>,
    pub counts: ExtractionCounts,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    session_id: Uuid,
    question: String,
}

/// One row of the session history view.
#[derive(Serialize, Deserialize, Debug)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub topic: String,
    pub status: String,
    pub started_at: u64,
    pub counts: ExtractionCounts,
    pub turns: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ChatResponse {
    pub answer: String,
    pub history: Vec<ConversationTurn>,
}

// Error type for our API
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn session_not_found(id: Uuid) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("no research session {}", id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let status = match err {
            ChatError::NoReport => StatusCode::CONFLICT,
            ChatError::EmptyQuestion => StatusCode::BAD_REQUEST,
            ChatError::Model(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, err.to_string())
    }
}

/// Router with every route and a status channel wired into the graph.
pub fn app(mut graph: ResearchGraph) -> Router {
    let (status_tx, _) = broadcast::channel(100);
    graph.set_status_sender(status_tx.clone());

    let state = Arc::new(AppState {
        graph,
        sessions: RwLock::new(HashMap::new()),
        status_tx,
    });

    Router::new()
        .route("/", get(serve_index))
        .route("/research", post(handle_research))
        .route("/chat", post(handle_chat))
        .route("/events", get(handle_events))
        .route("/sessions", get(handle_list_sessions))
        .route("/sessions/:id", get(handle_session).delete(handle_delete_session))
        .route("/sessions/:id/report.md", get(handle_report_download))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(graph: ResearchGraph, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Starting server on http://{}", listener.local_addr()?);

    axum::serve(listener, app(graph).into_make_service()).await?;
    Ok(())
}

async fn handle_research(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResearchRequest>,
) -> Result<Response, ApiError> {
    let run_id = request.run_id.unwrap_or_else(Uuid::new_v4);
    if state.sessions.read().await.contains_key(&run_id) {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("research session {} already exists", run_id),
        ));
    }

    let context = state
        .graph
        .research_with_id(run_id, &request.topic, &CancellationToken::new())
        .await;

    let session_id = context.id;
    let status_code = match context.failure() {
        None => StatusCode::OK,
        Some(FailureReason::InvalidTopic) => StatusCode::BAD_REQUEST,
        Some(FailureReason::NoUsableContent) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(FailureReason::ModelUnavailable(_)) | Some(FailureReason::NoQueries) => StatusCode::BAD_GATEWAY,
        Some(FailureReason::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
    };
    if let Some(reason) = context.failure() {
        warn!(%session_id, reason = %reason, "research run failed");
    }

    let response = ResearchResponse {
        session_id,
        status: context.phase.name().to_string(),
        reason: context.failure().map(|r| r.to_string()),
        report: context.report.as_ref().map(|r| r.body.clone()),
        sources: context.sources.clone(),
        queries: context.queries.clone(),
        counts: context.counts(),
    };

    // Failed runs are kept too, for diagnostics.
    state
        .sessions
        .write()
        .await
        .insert(session_id, Arc::new(Mutex::new(ResearchSession::new(context))));

    Ok((status_code, Json(response)).into_response())
}

async fn handle_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let session = find_session(&state, request.session_id).await?;

    // Held across the model call so turns on one session stay in order.
    let mut session = session.lock().await;
    let ResearchSession { context, history } = &mut *session;
    let turn = state
        .graph
        .continue_chat(context, history, &request.question)
        .await?;

    Ok(Json(ChatResponse {
        answer: turn.text,
        history: history.clone(),
    }))
}

async fn handle_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResearchSession>, ApiError> {
    let session = find_session(&state, id).await?;
    let session = session.lock().await;
    Ok(Json(session.clone()))
}

async fn handle_list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    let handles: Vec<Arc<Mutex<ResearchSession>>> =
        state.sessions.read().await.values().cloned().collect();

    let mut summaries = Vec::with_capacity(handles.len());
    for handle in handles {
        let session = handle.lock().await;
        summaries.push(SessionSummary {
            session_id: session.context.id,
            topic: session.context.topic.clone(),
            status: session.context.phase.name().to_string(),
            started_at: session.context.started_at,
            counts: session.context.counts(),
            turns: session.history.len(),
        });
    }
    // Newest first.
    summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Json(summaries)
}

async fn handle_delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    match state.sessions.write().await.remove(&id) {
        Some(_) => {
            info!(session_id = %id, "cleared research session");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::session_not_found(id)),
    }
}

async fn handle_report_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let session = find_session(&state, id).await?;
    let session = session.lock().await;
    let report = session
        .context
        .report
        .as_ref()
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "session has no report"))?;

    Ok((
        [
            (CONTENT_TYPE, "text/markdown; charset=utf-8"),
            (CONTENT_DISPOSITION, "attachment; filename=\"report.md\""),
        ],
        report.to_markdown(&session.context.topic),
    )
        .into_response())
}

async fn handle_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let mut rx = state.status_tx.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(update) => {
                    yield Event::default().event(update.phase.clone()).json_data(&update);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn find_session(state: &AppState, id: Uuid) -> Result<Arc<Mutex<ResearchSession>>, ApiError> {
    state
        .sessions
        .read()
        .await
        .get(&id)
        .cloned()
        .ok_or_else(|| ApiError::session_not_found(id))
}

async fn serve_index() -> Html<&'static str> {
    Html(r#"
    <!DOCTYPE html>
    <html>
    <head>
        <title>Deep Search</title>
        <style>
            body { font-family: Arial, sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; }
            .container { display: flex; flex-direction: column; gap: 20px; }
            textarea { width: 100%; height: 80px; padding: 10px; }
            button { padding: 10px 20px; background-color: #007bff; color: white; border: none; border-radius: 4px; cursor: pointer; }
            #status { padding: 10px; background-color: #f8f9fa; border-radius: 4px; }
            #result, #chat { white-space: pre-wrap; padding: 20px; border: 1px solid #ddd; border-radius: 4px; }
            .step { padding: 8px; margin: 4px 0; background-color: #e9ecef; border-radius: 4px; }
            .step.active { background-color: #cce5ff; }
            .step.completed { background-color: #d4edda; }
            .step.failed { background-color: #f8d7da; }
        </style>
    </head>
    <body>
        <div class="container">
            <h1>Deep Search</h1>
            <div>
                <label for="topic">Research Topic:</label>
                <textarea id="topic" placeholder="Enter your research topic..."></textarea>
            </div>
            <button onclick="submitResearch()">Start Research</button>
            <div id="steps">
                <div class="step" id="step-planning">1. Generating Search Queries</div>
                <div class="step" id="step-searching">2. Searching the Web and Wikipedia</div>
                <div class="step" id="step-extracting">3. Extracting Page Content</div>
                <div class="step" id="step-synthesizing">4. Writing the Report</div>
            </div>
            <div id="status"></div>
            <div id="result"></div>
            <a id="download" style="display:none">Download report</a>
            <button onclick="clearSession()">Clear Results</button>
            <div>
                <label for="question">Follow-up Question:</label>
                <textarea id="question"></textarea>
                <button onclick="ask()">Ask</button>
            </div>
            <div id="chat"></div>
            <h2>History</h2>
            <ul id="history"></ul>
        </div>

        <script>
        const steps = ['planning', 'searching', 'extracting', 'synthesizing'];
        let sessionId = null;
        let currentRun = null;

        const events = new EventSource('/events');
        events.onmessage = () => {};
        ['planning', 'searching', 'extracting', 'synthesizing', 'done', 'failed'].forEach((phase) => {
            events.addEventListener(phase, (e) => {
                const update = JSON.parse(e.data);
                if (update.run_id !== currentRun) return;
                updateStep(update.phase, update.message);
            });
        });

        function updateStep(phase, message) {
            const current = steps.indexOf(phase);
            steps.forEach((step, index) => {
                const el = document.getElementById(`step-${step}`);
                if (phase === 'done' || index < current) {
                    el.className = 'step completed';
                } else if (index === current) {
                    el.className = 'step active';
                } else if (phase !== 'failed') {
                    el.className = 'step';
                }
            });
            if (phase === 'failed') {
                document.querySelector('.step.active')?.classList.add('failed');
            }
            document.getElementById('status').textContent = message;
        }

        async function submitResearch() {
            const topic = document.getElementById('topic').value;
            const result = document.getElementById('result');
            result.textContent = 'Starting research...';
            document.getElementById('chat').textContent = '';
            currentRun = crypto.randomUUID();
            try {
                const response = await fetch('/research', {
                    method: 'POST',
                    headers: { 'Content-Type': 'application/json' },
                    body: JSON.stringify({ topic, run_id: currentRun }),
                });
                const data = await response.json();
                sessionId = data.session_id;
                const counts = `${data.counts.ok} sources used, ${data.counts.failed} failed, ${data.counts.skipped} skipped`;
                result.textContent = data.report
                    ? `${data.report}\n\nSources:\n${data.sources.join('\n')}\n\n(${counts})`
                    : `Research failed: ${data.reason}\n(${counts})`;
                const link = document.getElementById('download');
                link.style.display = data.report ? 'inline' : 'none';
                link.href = `/sessions/${sessionId}/report.md`;
            } catch (error) {
                result.textContent = `Error: ${error.message}`;
            }
            loadHistory();
        }

        async function loadHistory() {
            const response = await fetch('/sessions');
            const sessions = await response.json();
            const list = document.getElementById('history');
            list.innerHTML = '';
            sessions.forEach((s) => {
                const item = document.createElement('li');
                item.textContent = `${s.topic} (${s.status}, ${s.counts.ok} sources, ${s.turns} chat turns)`;
                item.style.cursor = 'pointer';
                item.onclick = () => openSession(s.session_id);
                list.appendChild(item);
            });
        }

        async function openSession(id) {
            const response = await fetch(`/sessions/${id}`);
            if (!response.ok) return;
            const session = await response.json();
            sessionId = id;
            const report = session.context.report;
            document.getElementById('topic').value = session.context.topic;
            document.getElementById('result').textContent = report
                ? `${report.body}\n\nSources:\n${report.sources.join('\n')}`
                : `Research ${session.context.phase.phase}`;
            document.getElementById('chat').textContent = session.history
                .map((t) => `${t.role}: ${t.text}`)
                .join('\n\n');
        }

        async function clearSession() {
            if (sessionId) {
                await fetch(`/sessions/${sessionId}`, { method: 'DELETE' });
            }
            sessionId = null;
            currentRun = null;
            document.getElementById('result').textContent = '';
            document.getElementById('chat').textContent = '';
            document.getElementById('status').textContent = '';
            document.getElementById('download').style.display = 'none';
            steps.forEach((step) => {
                document.getElementById(`step-${step}`).className = 'step';
            });
            loadHistory();
        }

        loadHistory();

        async function ask() {
            if (!sessionId) return;
            const question = document.getElementById('question').value;
            const response = await fetch('/chat', {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify({ session_id: sessionId, question }),
            });
            const data = await response.json();
            document.getElementById('chat').textContent = data.error
                ? `Error: ${data.error}`
                : data.history.map((t) => `${t.role}: ${t.text}`).join('\n\n');
        }
        </script>
    </body>
    </html>
    "#)
}
