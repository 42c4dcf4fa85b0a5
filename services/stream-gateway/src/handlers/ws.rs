use crate::backpressure::Frame;
use crate::error::AppError;
use crate::registry::{CloseReason, SessionHandle};
use crate::state::AppState;
use axum::{
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How long the writer may keep flushing after the session ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    // 1. Per-IP connection limit, before the upgrade
    let session = state.hub.registry.register(remote.ip())?;

    let registry = Arc::clone(&state.hub.registry);
    let id = session.id;

    Ok(ws
        .on_failed_upgrade(move |err| {
            warn!(conn_id = %id, error = %err, "WebSocket upgrade failed");
            registry.deregister(id, CloseReason::TransportClosed);
        })
        .on_upgrade(move |socket| handle_socket(socket, state, session)))
}

async fn handle_socket(socket: WebSocket, state: AppState, session: SessionHandle) {
    let SessionHandle {
        id,
        outbound,
        mut closed,
    } = session;
    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_frames(sink, outbound));
    let router = Arc::clone(&state.hub.router);

    // Inbound frames are handled one at a time, in arrival order
    let reason = loop {
        tokio::select! {
            reason = &mut closed => {
                break reason.unwrap_or(CloseReason::Shutdown);
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    router.process(id, text.as_str()).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    router.reject_binary(id);
                }
                Some(Ok(Message::Close(_))) | None => break CloseReason::ClientClosed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(conn_id = %id, error = %e, "WebSocket read failed");
                    break CloseReason::TransportClosed;
                }
            },
        }
    };

    // No-op when the hub already closed the session
    state.hub.registry.deregister(id, reason);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
    debug!(conn_id = %id, reason = %reason, "WebSocket closed");
}

/// Drain the outbound queue into the socket, then close it.
async fn write_frames(mut sink: SplitSink<WebSocket, Message>, mut outbound: mpsc::Receiver<Frame>) {
    while let Some(frame) = outbound.recv().await {
        if sink.send(Message::Text(frame.as_ref().into())).await.is_err() {
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}
