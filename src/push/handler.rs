//! Push Connection Handler
//!
//! Handles the `/events` WebSocket upgrade and drives a session's read and
//! write loops. Authentication and authorization hooks run before the
//! upgrade completes, so a failed handshake never registers a session.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::server::security::{check_authentication, check_authorization, RequestContext};
use crate::server::AppState;

use super::hub::{HubState, PushHub};
use super::session::PushSession;

/// WebSocket upgrade handler for the `/events` endpoint
pub async fn events_handler(
    ws: WebSocketUpgrade,
    Query(parameters): Query<HashMap<String, String>>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let context = RequestContext::new(parameters.clone(), headers.clone(), remote_addr);

    if let Err(error) = check_authentication(state.authenticator(), &context).await {
        return error.into_response();
    }
    if let Err(error) = check_authorization(state.authorizer(), &context).await {
        return error.into_response();
    }

    let Some(hub) = state.hub().cloned() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    ws.on_upgrade(move |socket| run_session(socket, hub, parameters, headers, remote_addr))
}

/// Drive one session from registration to connection release.
///
/// Both loops are awaited before the socket halves are dropped, so the
/// connection is observably released only after read and write have
/// stopped.
async fn run_session(
    socket: WebSocket,
    hub: Arc<PushHub>,
    parameters: HashMap<String, String>,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
) {
    let buffer = hub.config().session_buffer;
    let (session, frames) = PushSession::new(parameters, headers, remote_addr, buffer);

    if hub.register(Arc::clone(&session)).await.is_err() {
        tracing::warn!(
            session_id = %session.identifier(),
            "push hub not running, dropping connection"
        );
        return;
    }

    let (sink, stream) = socket.split();
    let write_task = tokio::spawn(write_loop(
        sink,
        frames,
        session.write_token(),
        Arc::clone(&session),
    ));
    let read_task = tokio::spawn(read_loop(
        stream,
        session.read_token(),
        Arc::clone(&session),
    ));

    // A hub that stops while our registration is still queued would never
    // deliver a close signal, so watch its lifecycle state as well.
    let mut hub_state = hub.subscribe_state();
    tokio::select! {
        _ = session.closed() => {}
        _ = hub_state.wait_for(|state| *state == HubState::Stopped) => {
            session.close();
        }
    }

    if session.stop() {
        let _ = write_task.await;
        let _ = read_task.await;

        if hub.unregister(Arc::clone(&session)).await.is_err() {
            tracing::debug!(
                session_id = %session.identifier(),
                "push hub already stopped during unregistration"
            );
        }
        tracing::info!(session_id = %session.identifier(), "push session closed");
    }
}

/// Forward encoded frames from the session's outbound channel to the socket
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: tokio::sync::mpsc::Receiver<String>,
    cancel: CancellationToken,
    session: Arc<PushSession>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if sink.send(Message::Text(frame)).await.is_err() {
                    tracing::debug!(
                        session_id = %session.identifier(),
                        "write failed, closing session"
                    );
                    session.close();
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

/// Watch the peer for disconnection. The push channel is one-way; inbound
/// frames other than close are drained and ignored.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    cancel: CancellationToken,
    session: Arc<PushSession>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(
                            session_id = %session.identifier(),
                            "peer closed connection"
                        );
                        session.close();
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::debug!(
                            session_id = %session.identifier(),
                            error = %error,
                            "read error, closing session"
                        );
                        session.close();
                        break;
                    }
                }
            }
        }
    }
}
