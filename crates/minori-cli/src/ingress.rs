//! WebSocket ingress for browser extensions, plus a local status endpoint.
//!
//! Extensions connect to `/ws` and stream viewing states as JSON frames;
//! each frame lands in the same queue the player pollers feed. `/status`
//! answers with the state currently shown on Discord so an extension can
//! tell whether it owns the presence.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use minori_core::ViewingState;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_PORT: u16 = 56727;

/// Origin charged with a release when a socket dies before sending any
/// state of its own.
const FALLBACK_ORIGIN: &str = "web";

#[derive(Clone)]
struct IngressState {
    application_id: u64,
    states: mpsc::Sender<ViewingState>,
    status: watch::Receiver<ViewingState>,
    cancel: CancellationToken,
}

/// Runs the ingress until `cancel` fires. A bind failure cancels the token:
/// extensions would otherwise stream into the void with no one noticing.
pub async fn serve(
    port: u16,
    application_id: u64,
    states: mpsc::Sender<ViewingState>,
    status: watch::Receiver<ViewingState>,
    cancel: CancellationToken,
) {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/status", get(status_handler))
        .with_state(IngressState {
            application_id,
            states,
            status,
            cancel: cancel.clone(),
        });

    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Cannot bind the ingress on port {port}: {e}");
            cancel.cancel();
            return;
        }
    };

    info!("Serving WS on {port}");
    let shutdown = cancel.clone();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        error!("Ingress server failed: {e}");
        cancel.cancel();
    }
}

async fn ws_handler(State(state): State<IngressState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn status_handler(State(state): State<IngressState>) -> Json<ViewingState> {
    Json(state.status.borrow().clone())
}

async fn handle_socket(mut socket: WebSocket, state: IngressState) {
    if socket.send(Message::Text("Hello!".into())).await.is_err() {
        return;
    }

    // Origin of the last state this socket delivered; the disconnect
    // release is sent on its behalf. Reads race the shutdown token: the
    // graceful shutdown waits for open connections, it does not close them.
    let mut origin = FALLBACK_ORIGIN.to_string();
    loop {
        let message = tokio::select! {
            _ = state.cancel.cancelled() => break,
            message = socket.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        match message {
            Ok(Message::Text(text)) => {
                let text = text.as_str();
                if text == "keepalive" {
                    continue;
                }
                let Some(incoming) = parse_state(text, state.application_id) else {
                    continue;
                };
                if let Some(tag) = &incoming.origin {
                    origin = tag.clone();
                }
                if state.states.send(incoming).await.is_err() {
                    break;
                }
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(_) => break,
            Err(e) => {
                debug!("WebSocket receive failed: {e}");
                break;
            }
        }
    }

    debug!(origin = %origin, "Extension disconnected, releasing its state");
    let _ = state.states.send(ViewingState::release(&origin)).await;
}

/// Parses one extension frame. A state without an origin cannot be
/// arbitrated and is dropped; a non-empty state missing its application id
/// gets the daemon-wide fallback. Release states stay untouched so they
/// keep reading as empty.
fn parse_state(text: &str, application_id: u64) -> Option<ViewingState> {
    let mut state: ViewingState = match serde_json::from_str(text) {
        Ok(state) => state,
        Err(e) => {
            warn!("Discarding a malformed extension frame: {e}");
            return None;
        }
    };
    if state.origin.is_none() {
        debug!("Discarding a state without an origin");
        return None;
    }
    if !state.is_empty() {
        state.application_id.get_or_insert(application_id);
    }
    Some(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state_requires_origin() {
        assert!(parse_state(r#"{"title": "Dandadan"}"#, 7).is_none());
    }

    #[test]
    fn test_parse_state_stamps_fallback_application_id() {
        let state =
            parse_state(r#"{"title": "Dandadan", "origin": "www.bilibili.tv"}"#, 7).unwrap();
        assert_eq!(state.application_id, Some(7));
    }

    #[test]
    fn test_parse_state_keeps_explicit_application_id() {
        let state = parse_state(
            r#"{"title": "Dandadan", "origin": "www.bilibili.tv", "application_id": 9}"#,
            7,
        )
        .unwrap();
        assert_eq!(state.application_id, Some(9));
    }

    #[test]
    fn test_parse_release_state_stays_empty() {
        let state = parse_state(r#"{"origin": "www.bilibili.tv"}"#, 7).unwrap();
        assert!(state.is_empty());
        assert!(state.application_id.is_none());
    }

    #[test]
    fn test_parse_state_rejects_garbage() {
        assert!(parse_state("not json", 7).is_none());
    }
}
