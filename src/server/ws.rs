//! Websocket listeners: every connection receives the aggregator's
//! `item ...` and `updated ...` events as text frames.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::Result;
use crate::daemon::AggregatorHandle;

pub fn build_router(handle: AggregatorHandle) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(handle)
}

pub async fn serve(listener: TcpListener, handle: AggregatorHandle) -> Result<()> {
    info!(addr = ?listener.local_addr().ok(), "Websocket server listening");
    axum::serve(listener, build_router(handle)).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(handle): State<AggregatorHandle>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, handle))
}

async fn handle_socket(socket: WebSocket, handle: AggregatorHandle) {
    let (id, events) = match handle.register_listener().await {
        Ok(registration) => registration,
        Err(e) => {
            warn!("Websocket refused: {}", e);
            return;
        }
    };
    debug!(listener = id, "Websocket session started");

    let (sender, receiver) = socket.split();
    forward_events(sender, receiver, events).await;

    let _ = handle.unregister_listener(id).await;
    debug!(listener = id, "Websocket session ended");
}

/// Push events to the client until it goes away or the aggregator stops.
async fn forward_events<S, R, E>(
    mut sender: S,
    mut receiver: R,
    mut events: mpsc::UnboundedReceiver<String>,
) where
    S: Sink<Message> + Unpin,
    R: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                if sender.send(Message::Text(event)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Websocket error: {}", e);
                    break;
                }
            },
        }
    }
}
