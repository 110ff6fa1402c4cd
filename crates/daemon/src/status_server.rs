//! Status HTTP Server
//!
//! Exposes a read-only view of the scheduler and the displays for monitoring
//! tools.

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::display::{DisplayId, SharedDisplays};
use crate::scheduler::Scheduler;
use crate::video::VideoRef;

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address {0}")]
    Address(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Current URL of one display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayStatus {
    pub id: DisplayId,
    pub current_url: Option<String>,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp_unix_ms: i64,
    pub queue_len: usize,
    /// Queued videos in claim order
    pub queued: Vec<VideoRef>,
    pub live_roster: Vec<String>,
    pub active: Vec<String>,
    pub displays: Vec<DisplayStatus>,
}

/// State shared with the status handlers
#[derive(Clone)]
pub struct StatusState {
    pub scheduler: Arc<Scheduler>,
    pub displays: SharedDisplays,
}

impl StatusState {
    pub async fn snapshot(&self) -> StatusSnapshot {
        let scheduler = self.scheduler.snapshot();
        let displays = self
            .displays
            .read()
            .await
            .iter()
            .map(|(id, url)| DisplayStatus {
                id: *id,
                current_url: url.clone(),
            })
            .collect();

        StatusSnapshot {
            timestamp_unix_ms: chrono::Utc::now().timestamp_millis(),
            queue_len: scheduler.queued.len(),
            queued: scheduler.queued,
            live_roster: scheduler.live_roster,
            active: scheduler.active,
            displays,
        }
    }
}

/// Handler for GET /status
async fn get_status(State(state): State<StatusState>) -> Json<StatusSnapshot> {
    Json(state.snapshot().await)
}

/// Creates the axum Router with the status endpoint
pub fn create_status_router(state: StatusState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(state)
}

/// Runs the status HTTP server until `cancel` fires
///
/// # Arguments
/// * `state` - Scheduler and display state to serve
/// * `bind` - Listen address, e.g. `127.0.0.1:7878`
/// * `cancel` - Token that triggers graceful shutdown
///
/// # Returns
/// * `Ok(())` if server shuts down gracefully
/// * `Err(ServerError)` if server fails to start
pub async fn run_status_server(
    state: StatusState,
    bind: &str,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| ServerError::Address(bind.to_string()))?;
    let app = create_status_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "status server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::VideoKind;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> StatusState {
        StatusState {
            scheduler: Arc::new(Scheduler::new()),
            displays: SharedDisplays::default(),
        }
    }

    async fn fetch(state: StatusState) -> (StatusCode, String) {
        let response = create_status_router(state)
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_status_reports_queue_and_displays() {
        let state = state();
        state.scheduler.enqueue(vec![
            VideoRef::live("L1"),
            VideoRef::popular("P1"),
            VideoRef::popular("P2"),
        ]);
        let claimed = state.scheduler.claim_next(None).unwrap();
        state.displays.write().await.insert(0, Some(claimed.url));
        state.displays.write().await.insert(1, None);

        let (status, body) = fetch(state).await;
        assert_eq!(status, StatusCode::OK);

        let snapshot: StatusSnapshot = serde_json::from_str(&body).unwrap();
        assert_eq!(snapshot.queue_len, 2);
        assert_eq!(snapshot.queued[0].url, "P1");
        assert_eq!(snapshot.queued[0].kind, VideoKind::Popular);
        assert_eq!(snapshot.live_roster, vec!["L1".to_string()]);
        assert_eq!(snapshot.active, vec!["L1".to_string()]);
        assert_eq!(
            snapshot.displays,
            vec![
                DisplayStatus {
                    id: 0,
                    current_url: Some("L1".to_string())
                },
                DisplayStatus {
                    id: 1,
                    current_url: None
                },
            ]
        );
        assert!(snapshot.timestamp_unix_ms > 0);
    }

    #[tokio::test]
    async fn test_status_json_field_names() {
        let (_, body) = fetch(state()).await;

        for field in [
            "timestamp_unix_ms",
            "queue_len",
            "queued",
            "live_roster",
            "active",
            "displays",
        ] {
            assert!(body.contains(field), "missing {}", field);
        }
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = create_status_router(state())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_bind_address() {
        let result = run_status_server(state(), "not an address", CancellationToken::new()).await;
        assert!(matches!(result, Err(ServerError::Address(_))));
    }

    #[tokio::test]
    async fn test_server_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_status_server(state(), "127.0.0.1:0", cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
