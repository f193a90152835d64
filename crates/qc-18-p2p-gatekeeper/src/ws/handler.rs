//! WebSocket transport adapter.
//!
//! Admission runs on the HTTP upgrade request; a rejected peer gets `403`
//! and never reaches the socket layer. Admitted sockets are pumped frame by
//! frame through a [`PeerSession`].

use crate::domain::error::{Disposition, GatekeeperError};
use crate::service::{Frame, FrameOutcome, GatekeeperWorker, PeerSession};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Router with the single peer endpoint
pub fn router(worker: Arc<GatekeeperWorker>) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .with_state(worker)
}

/// Serve peers on an already bound listener until the server stops
pub async fn serve(
    worker: Arc<GatekeeperWorker>,
    listener: TcpListener,
) -> Result<(), GatekeeperError> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Accepting peer connections");
    axum::serve(
        listener,
        router(worker).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Bind the configured address and serve
pub async fn bind_and_serve(worker: Arc<GatekeeperWorker>) -> Result<(), GatekeeperError> {
    let bind = worker.config().bind;
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| GatekeeperError::Bind(format!("{bind}: {e}")))?;
    serve(worker, listener).await
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(worker): State<Arc<GatekeeperWorker>>,
) -> Response {
    match worker.admit(remote).await {
        Ok(session) => ws.on_upgrade(move |socket| pump(socket, session)),
        Err(rejection) => match rejection.disposition() {
            Disposition::Drop => {
                debug!(remote = %remote, reason = %rejection, "Connection refused");
                StatusCode::FORBIDDEN.into_response()
            }
            Disposition::Respond | Disposition::Terminate { .. } => {
                debug!(remote = %remote, reason = %rejection, "Connection refused after upgrade");
                ws.on_upgrade(|mut socket| async move {
                    let _ = socket.send(Message::Close(None)).await;
                })
            }
        },
    }
}

async fn pump(socket: WebSocket, mut session: PeerSession) {
    let id = session.connection().id();
    let (mut sink, mut stream) = socket.split();

    while let Some(message) = stream.next().await {
        let frame = match message {
            Ok(message) => match into_frame(message) {
                Some(frame) => frame,
                None => break,
            },
            Err(e) => {
                debug!(connection = %id, error = %e, "Socket read failed");
                break;
            }
        };

        match session.handle_frame(frame).await {
            FrameOutcome::Continue => {}
            FrameOutcome::Reply(text) => {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            FrameOutcome::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            FrameOutcome::Terminate(_) => break,
        }
    }

    debug!(connection = %id, "Session ended");
}

/// Map a socket message to a gatekeeper frame; `None` means the peer closed
fn into_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(bytes) => Some(Frame::Binary(bytes)),
        Message::Ping(_) => Some(Frame::Ping),
        Message::Pong(_) => Some(Frame::Pong),
        Message::Close(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_mapping() {
        assert_eq!(
            into_frame(Message::Text("#2".into())),
            Some(Frame::Text("#2".into()))
        );
        assert_eq!(
            into_frame(Message::Binary(vec![1, 2])),
            Some(Frame::Binary(vec![1, 2]))
        );
        assert_eq!(into_frame(Message::Ping(vec![])), Some(Frame::Ping));
        assert_eq!(into_frame(Message::Pong(vec![])), Some(Frame::Pong));
        assert_eq!(into_frame(Message::Close(None)), None);
    }
}
