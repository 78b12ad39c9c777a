//! HTTP ingress for the Parley server.
//!
//! Each route validates its parameters, then makes a single call into the
//! chat room. Join and message accept either a query string (what the
//! browser client sends) or a JSON body.

use crate::config::Config;
use crate::metrics::{self, PollMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parley_core::{ChatRoom, Event, PollError};
use parley_protocol::{
    codec, JoinRequest, MessageRequest, PollRequest, ProtocolError, WireEvent, WireUser,
    PROTOCOL_VERSION,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The chat room.
    pub room: Arc<ChatRoom>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            room: Arc::new(ChatRoom::with_config(config.room_config())),
            config,
        }
    }
}

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request failed validation.
    #[error(transparent)]
    BadRequest(ProtocolError),

    /// The room's event stream is gone (shutting down).
    #[error("Chat room unavailable")]
    Unavailable,

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ProtocolError> for ApiError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Json(e) => ApiError::Internal(e.to_string()),
            other => ApiError::BadRequest(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "validation"),
            ApiError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        metrics::record_error(kind);
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(error = %self, "Request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/join", get(join_query_handler).post(join_json_handler))
        .route(
            "/message",
            get(message_query_handler).post(message_json_handler),
        )
        .route("/eventpoll", get(poll_handler))
        .route("/users", get(users_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP server until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let sweeper = state.room.spawn_sweeper();
    let recorder = metrics::spawn_event_recorder(&state.room);

    let app = router(Arc::clone(&state));

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Parley server listening on {}", addr);
    info!("Poll endpoint: http://{}/eventpoll", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    recorder.abort();
    info!("Parley server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.room.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION,
        "lastSequence": stats.last_sequence,
        "present": stats.present,
        "pendingPolls": stats.pending_polls,
    }))
}

async fn join_query_handler(
    State(state): State<Arc<AppState>>,
    Query(request): Query<JoinRequest>,
) -> Result<Json<Value>, ApiError> {
    join(&state, request)
}

async fn join_json_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JoinRequest>,
) -> Result<Json<Value>, ApiError> {
    join(&state, request)
}

fn join(state: &AppState, request: JoinRequest) -> Result<Json<Value>, ApiError> {
    metrics::record_request("join");
    let identity = request.validate()?;

    let is_new = state.room.join(&identity);
    debug!(nick = %identity, is_new, "Join");

    Ok(Json(json!({ "status": "ok" })))
}

async fn message_query_handler(
    State(state): State<Arc<AppState>>,
    Query(request): Query<MessageRequest>,
) -> Result<Json<Value>, ApiError> {
    send_message(&state, request)
}

async fn message_json_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<Value>, ApiError> {
    send_message(&state, request)
}

fn send_message(state: &AppState, request: MessageRequest) -> Result<Json<Value>, ApiError> {
    metrics::record_request("message");
    let (identity, text) = request.validate(state.config.limits.max_message_size)?;

    let sequence = state.room.send_message(&identity, text);

    Ok(Json(json!({ "status": "ok", "sequence": sequence })))
}

/// Long-poll handler.
///
/// If the client disconnects while parked, axum drops this future; the
/// parked poll and the metrics guard are released with it.
async fn poll_handler(
    State(state): State<Arc<AppState>>,
    Query(request): Query<PollRequest>,
) -> Result<Response, ApiError> {
    metrics::record_request("eventpoll");
    let (identity, since) = request.validate()?;

    let _guard = PollMetricsGuard::new();
    let start = Instant::now();

    let events = match state.room.poll(&identity, since).await {
        Ok(events) => events,
        Err(PollError::TimedOut) => {
            debug!(nick = %identity, since, "Poll idle timeout");
            Vec::new()
        }
        Err(PollError::Closed) => return Err(ApiError::Unavailable),
        Err(e @ PollError::Lagged(_)) => return Err(ApiError::Internal(e.to_string())),
    };

    metrics::record_poll_wait(start.elapsed().as_secs_f64());
    debug!(nick = %identity, since, count = events.len(), "Poll answered");

    events_response(&events)
}

/// Present identities.
async fn users_handler(State(state): State<Arc<AppState>>) -> Json<Vec<WireUser>> {
    metrics::record_request("users");
    let users = state
        .room
        .users()
        .into_iter()
        .map(|record| WireUser {
            gravatar: record.identity.gravatar(),
            nick_name: record.identity.nick_name,
        })
        .collect();
    Json(users)
}

fn events_response(events: &[Arc<Event>]) -> Result<Response, ApiError> {
    let wire: Vec<WireEvent> = events.iter().map(|e| e.to_wire()).collect();
    let body = codec::encode(&wire)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::EventKind;
    use std::time::Duration;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(Config::default()))
    }

    fn join_request(nick: &str, email: &str) -> JoinRequest {
        JoinRequest {
            nick_name: Some(nick.into()),
            email: Some(email.into()),
        }
    }

    fn message_request(nick: &str, email: &str, message: &str) -> MessageRequest {
        MessageRequest {
            nick_name: Some(nick.into()),
            email: Some(email.into()),
            message: Some(message.into()),
        }
    }

    fn poll_request(nick: &str, email: &str, since: u64) -> PollRequest {
        PollRequest {
            nick_name: Some(nick.into()),
            email: Some(email.into()),
            since: Some(since),
        }
    }

    async fn body_events(response: Response) -> Vec<WireEvent> {
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        codec::decode(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_join_then_poll_backlog() {
        let state = state();
        join(&state, join_request("alice", "a@x")).unwrap();
        join(&state, join_request("bob", "b@x")).unwrap();

        let response = poll_handler(State(Arc::clone(&state)), Query(poll_request("alice", "a@x", 0)))
            .await
            .unwrap();
        let events = body_events(response).await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[0].kind, EventKind::Join);
        assert_eq!(events[0].nick_name, "alice");
        assert_eq!(
            events[0].gravatar.as_deref(),
            Some(parley_protocol::gravatar_url("a@x").as_str())
        );
        assert_eq!(events[1].nick_name, "bob");
    }

    #[tokio::test]
    async fn test_message_returns_sequence() {
        let state = state();
        join(&state, join_request("alice", "a@x")).unwrap();
        join(&state, join_request("bob", "b@x")).unwrap();

        let Json(body) = send_message(&state, message_request("alice", "a@x", "hi")).unwrap();
        assert_eq!(body["sequence"], 3);

        let response = poll_handler(State(Arc::clone(&state)), Query(poll_request("bob", "b@x", 2)))
            .await
            .unwrap();
        let events = body_events(response).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Message);
        assert_eq!(events[0].message.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_validation_errors_are_bad_requests() {
        let state = state();

        let err = join(
            &state,
            JoinRequest {
                nick_name: Some("alice".into()),
                email: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err = send_message(&state, message_request("alice", "a@x", "  ")).unwrap_err();
        assert!(matches!(
            err,
            ApiError::BadRequest(ProtocolError::MissingField("message"))
        ));

        let response = poll_handler(
            State(Arc::clone(&state)),
            Query(PollRequest {
                nick_name: None,
                email: Some("c@x".into()),
                since: None,
            }),
        )
        .await
        .unwrap_err()
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Nothing reached the room.
        assert_eq!(state.room.stats().last_sequence, 0);
    }

    #[tokio::test]
    async fn test_message_size_limit() {
        let mut config = Config::default();
        config.limits.max_message_size = 8;
        let state = AppState::new(config);

        let err = send_message(&state, message_request("alice", "a@x", "far too long")).unwrap_err();
        assert!(matches!(
            err,
            ApiError::BadRequest(ProtocolError::FieldTooLong { field: "message", .. })
        ));
    }

    #[tokio::test]
    async fn test_parked_poll_answered_by_message() {
        let state = state();
        join(&state, join_request("alice", "a@x")).unwrap();
        join(&state, join_request("bob", "b@x")).unwrap();
        send_message(&state, message_request("alice", "a@x", "hi")).unwrap();

        let waiter = tokio::spawn(poll_handler(
            State(Arc::clone(&state)),
            Query(poll_request("carol", "c@x", 3)),
        ));
        while state.room.stats().pending_polls == 0 {
            tokio::task::yield_now().await;
        }

        send_message(&state, message_request("bob", "b@x", "yo")).unwrap();

        let events = body_events(waiter.await.unwrap().unwrap()).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sequence, 4);
        assert_eq!(events[0].nick_name, "bob");
        assert_eq!(events[0].message.as_deref(), Some("yo"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_poll_answers_empty_array() {
        let mut config = Config::default();
        config.poll.idle_timeout_ms = 1_000;
        let state = Arc::new(AppState::new(config));
        join(&state, join_request("alice", "a@x")).unwrap();

        let response = poll_handler(State(Arc::clone(&state)), Query(poll_request("alice", "a@x", 1)))
            .await
            .unwrap();
        assert!(body_events(response).await.is_empty());
        assert_eq!(state.room.stats().pending_polls, 0);

        // Still present: the timeout re-marked alice as an ordinary poller.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(state.room.sweep(tokio::time::Instant::now()).is_empty());
    }

    #[tokio::test]
    async fn test_users_lists_present_identities() {
        let state = state();
        join(&state, join_request("alice", "a@x")).unwrap();
        join(&state, join_request("bob", "b@x")).unwrap();

        let Json(users) = users_handler(State(Arc::clone(&state))).await;
        let nicks: Vec<&str> = users.iter().map(|u| u.nick_name.as_str()).collect();
        assert_eq!(nicks, vec!["alice", "bob"]);
        assert!(users.iter().all(|u| u.gravatar.is_some()));
    }

    #[tokio::test]
    async fn test_health() {
        let state = state();
        let response = health_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
