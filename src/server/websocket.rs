//! WebSocket connection acceptor
//!
//! Clients connect with `ws://host/?clientId=<id>` or `ws://host/<id>`. The id
//! becomes the session id; a connection without one is refused before upgrade.

use crate::config::ServerConfig;
use crate::server::connections::{Outbound, Session};
use crate::server::dispatcher::Dispatcher;
use crate::server::messages::{JsonObject, Message};
use crate::server::router::{ConnectionEvent, MessageRouter};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

/// Shared state for WebSocket handlers
#[derive(Clone)]
pub struct WsState {
    pub dispatcher: Dispatcher,
    pub router: MessageRouter,
    pub config: Arc<ServerConfig>,
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    #[serde(rename = "clientId")]
    client_id: Option<String>,
}

/// Create the WebSocket router
pub fn create_router(state: WsState) -> Router {
    Router::new()
        .route("/", get(ws_query_handler))
        .route("/health", get(health_handler))
        .route("/{client_id}", get(ws_path_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn ws_query_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<WsState>,
) -> Response {
    admit(ws, query.client_id, state)
}

async fn ws_path_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<WsState>,
) -> Response {
    admit(ws, Some(client_id), state)
}

fn admit(ws: WebSocketUpgrade, client_id: Option<String>, state: WsState) -> Response {
    let Some(client_id) = client_id.filter(|id| !id.is_empty()) else {
        warn!("Rejected connection without a client id");
        return (StatusCode::BAD_REQUEST, "clientId is required").into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

async fn handle_socket(socket: WebSocket, client_id: String, state: WsState) {
    let (sender, receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Outbound>(state.config.outbound_buffer);

    let was_pending = state.dispatcher.pending().consume(&client_id);
    let session = Arc::new(Session::new(client_id.clone(), tx, JsonObject::new()));

    // Queued before the session is visible so it is always the first frame
    session.send(&Message::session_init(&client_id));

    if let Some(previous) = state.dispatcher.sessions().put(session.clone()) {
        previous.close();
        if state.config.retain_data_on_reconnect {
            session.merge_data(previous.data());
        }
        info!(session_id = %client_id, "Client reconnected, replaced previous connection");
    }

    info!(
        session_id = %client_id,
        conn_id = %session.connection_id(),
        was_pending,
        "Client connected"
    );

    tokio::spawn(write_frames(sender, rx, session.clone()));

    state.router.run(&session, connection_events(receiver)).await;

    session.close();
    if state.dispatcher.sessions().remove_if_current(&session) {
        info!(session_id = %client_id, "Client disconnected");
    } else {
        debug!(session_id = %client_id, conn_id = %session.connection_id(), "Connection ended after session was replaced or closed");
    }
}

/// Translate transport frames into connection events
fn connection_events(
    receiver: impl Stream<Item = Result<WsMessage, axum::Error>>,
) -> impl Stream<Item = ConnectionEvent> {
    receiver.filter_map(|frame| {
        let event = match frame {
            Ok(WsMessage::Text(text)) => Some(ConnectionEvent::Text(text.to_string())),
            Ok(WsMessage::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => Some(ConnectionEvent::Text(text)),
                Err(_) => {
                    debug!(len = data.len(), "Ignoring non-UTF-8 binary frame");
                    None
                }
            },
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => Some(ConnectionEvent::Liveness),
            Ok(WsMessage::Close(_)) => Some(ConnectionEvent::Closed),
            Err(e) => {
                debug!(error = %e, "WebSocket error");
                Some(ConnectionEvent::Closed)
            }
        };
        futures::future::ready(event)
    })
}

/// How long a closing connection gets to flush queued frames and the close frame
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Forward queued frames to the socket until the session closes
///
/// On close, frames already queued are flushed before the close frame, within
/// [`CLOSE_FLUSH_TIMEOUT`]. A write still pending when the session closes is
/// abandoned, so a peer that stopped reading cannot hold the socket open.
async fn write_frames<S>(mut sender: S, mut rx: mpsc::Receiver<Outbound>, session: Arc<Session>)
where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let closed = session.closed_token();

    loop {
        let frame = tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            () = closed.cancelled() => break,
        };

        tokio::select! {
            biased;
            result = sender.send(to_ws(frame)) => {
                if let Err(e) = result {
                    debug!(session_id = %session.id(), error = %e, "Write failed");
                    session.close();
                    return;
                }
            }
            () = closed.cancelled() => {
                debug!(session_id = %session.id(), "Closed with a write in flight, dropping connection");
                return;
            }
        }
    }

    let flush = async {
        while let Ok(frame) = rx.try_recv() {
            if sender.send(to_ws(frame)).await.is_err() {
                return;
            }
        }
        let _ = sender.send(WsMessage::Close(None)).await;
    };
    if time::timeout(CLOSE_FLUSH_TIMEOUT, flush).await.is_err() {
        debug!(session_id = %session.id(), "Close flush timed out, dropping connection");
    }
}

fn to_ws(frame: Outbound) -> WsMessage {
    match frame {
        Outbound::Text(json) => WsMessage::Text(json.to_string().into()),
        Outbound::Ping => WsMessage::Ping(Vec::new().into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as peer;
    use futures::stream;

    fn queued_session(id: &str, lines: usize) -> (Arc<Session>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(16);
        let session = Arc::new(Session::new(id, tx, JsonObject::new()));
        for i in 0..lines {
            assert!(session.send(&Message::log(format!("line {i}"))));
        }
        (session, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_exits_when_peer_stops_reading() {
        // Room for one frame; the peer never reads, so the second write stalls
        let (sink, _peer) = peer::channel::<WsMessage>(0);
        let (session, rx) = queued_session("stalled", 8);

        let writer = tokio::spawn(write_frames(sink, rx, session.clone()));
        time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        session.close();
        time::timeout(Duration::from_secs(5), writer)
            .await
            .expect("writer still blocked after close")
            .unwrap();
        assert_eq!(Arc::strong_count(&session), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_queued_frames_then_close_frame() {
        let (sink, peer) = peer::channel::<WsMessage>(16);
        let (session, rx) = queued_session("flushing", 3);
        session.close();

        write_frames(sink, rx, session.clone()).await;

        let frames: Vec<WsMessage> = peer.collect().await;
        assert_eq!(frames.len(), 4);
        assert!(frames[..3].iter().all(|f| matches!(f, WsMessage::Text(_))));
        assert!(matches!(frames[3], WsMessage::Close(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flush_gives_up_on_stuck_peer() {
        let (mut sink, _peer) = peer::channel::<WsMessage>(0);
        // Fill the only slot so the close frame cannot be written
        sink.try_send(WsMessage::Ping(Vec::new().into())).unwrap();
        let (session, rx) = queued_session("stuck", 0);
        session.close();

        let started = time::Instant::now();
        write_frames(sink, rx, session.clone()).await;

        assert!(started.elapsed() >= CLOSE_FLUSH_TIMEOUT);
        assert!(started.elapsed() < CLOSE_FLUSH_TIMEOUT * 2);
    }

    #[tokio::test]
    async fn test_frames_become_events() {
        let frames = stream::iter(vec![
            Ok(WsMessage::Text(String::from(r#"{"type":"ping"}"#).into())),
            Ok(WsMessage::Binary(vec![0xff, 0xfe].into())),
            Ok(WsMessage::Binary(b"{}".to_vec().into())),
            Ok(WsMessage::Pong(Vec::new().into())),
            Ok(WsMessage::Close(None)),
        ]);

        let events: Vec<ConnectionEvent> = connection_events(frames).collect().await;

        assert_eq!(
            events,
            vec![
                ConnectionEvent::Text(r#"{"type":"ping"}"#.to_string()),
                ConnectionEvent::Text("{}".to_string()),
                ConnectionEvent::Liveness,
                ConnectionEvent::Closed,
            ]
        );
    }

    #[test]
    fn test_outbound_frames_map_to_ws() {
        assert!(matches!(to_ws(Outbound::Ping), WsMessage::Ping(_)));
        match to_ws(Outbound::Text(Arc::from(r#"{"type":"pong"}"#))) {
            WsMessage::Text(text) => assert_eq!(text.as_str(), r#"{"type":"pong"}"#),
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}
