//! Subscriber endpoint
//!
//! WebSocket listener for one topic. The channel is taken from the query of
//! the upgrade request (`ws://host:port/stream/live?05` or `?channel=05`);
//! the path is ignored.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::registry::ChannelKey;
use crate::session::{Control, SubscriberHandle, SubscriberQueues};
use crate::topic::{CloseReason, Topic};

/// Upper bound on flushing the close reply to a closing peer
const CLOSE_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Build the subscriber router for a topic
pub(crate) fn router(topic: Arc<Topic>) -> Router {
    Router::new()
        .fallback(subscribe_handler)
        .with_state(topic)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Extract the channel key from an upgrade request's query string
///
/// Accepts either the bare key (`05`) or a `channel=05` parameter.
pub fn channel_from_query(query: Option<&str>) -> Option<ChannelKey> {
    let query = query?.trim();
    if query.is_empty() {
        return None;
    }

    if !query.contains('=') {
        return Some(ChannelKey::from(query));
    }

    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == "channel")
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
        .map(ChannelKey::from)
}

async fn subscribe_handler(
    State(topic): State<Arc<Topic>>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> Response {
    let channel = channel_from_query(query.as_deref());
    let known = channel
        .as_ref()
        .is_some_and(|channel| topic.is_known_channel(channel.as_str()));

    if !known {
        tracing::warn!(
            topic = %topic.name(),
            query = ?query,
            peer = %peer_addr,
            "Subscribe request for unknown channel"
        );
        if topic.rejects_unknown_channels() {
            return StatusCode::NOT_FOUND.into_response();
        }
    }

    ws.on_upgrade(move |socket| run_subscriber(socket, topic, peer_addr, channel))
}

/// Per-connection task; lives for the whole WebSocket session
async fn run_subscriber(
    socket: WebSocket,
    topic: Arc<Topic>,
    peer_addr: SocketAddr,
    channel: Option<ChannelKey>,
) {
    let (handle, queues) = topic.attach(peer_addr, channel).await;
    let (mut sink, stream) = socket.split();

    let reason = tokio::select! {
        reason = write_loop(&mut sink, queues, handle.id()) => reason,
        reason = read_loop(stream, &handle) => reason,
        _ = handle.terminated() => CloseReason::Terminated,
    };

    // Flush the close reply queued when the peer's close frame was read
    if reason == CloseReason::ClientClosed {
        if let Ok(Err(e)) = tokio::time::timeout(CLOSE_REPLY_TIMEOUT, sink.close()).await {
            tracing::debug!(conn_id = handle.id(), error = %e, "Close handshake failed");
        }
    }

    topic.detach(&handle, reason).await;
}

/// Drain the outbound queue and control requests into the socket
async fn write_loop(
    sink: &mut SplitSink<WebSocket, Message>,
    queues: SubscriberQueues,
    conn_id: u64,
) -> CloseReason {
    let SubscriberQueues {
        mut outbound,
        mut control,
    } = queues;

    loop {
        let message = tokio::select! {
            biased;
            Some(ctrl) = control.recv() => match ctrl {
                Control::Ping => Message::Ping(Bytes::new()),
            },
            payload = outbound.recv() => match payload {
                Some(payload) => Message::Binary(payload),
                None => return CloseReason::Terminated,
            },
        };

        if let Err(e) = sink.send(message).await {
            tracing::debug!(conn_id = conn_id, error = %e, "Subscriber write failed");
            return CloseReason::Transport(e.to_string());
        }
    }
}

/// Observe pongs and close from the peer; data frames are ignored
async fn read_loop(mut stream: SplitStream<WebSocket>, handle: &SubscriberHandle) -> CloseReason {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Pong(_)) => handle.mark_alive(),
            Ok(Message::Close(_)) => return CloseReason::ClientClosed,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = handle.id(), error = %e, "Subscriber read failed");
                return CloseReason::Transport(e.to_string());
            }
        }
    }
    CloseReason::ClientClosed
}
