//! Ingest endpoint
//!
//! HTTP listener accepting pushed streams at `/<prefix>/<channel>`. Every
//! body frame is relayed as soon as it arrives; the relay imposes no framing
//! of its own.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{StatusCode, Uri};
use axum::routing::post;
use axum::Router;
use futures_util::StreamExt;
use serde::Deserialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::registry::ChannelKey;
use crate::server::config::IngestRoute;
use crate::session::{IngestEnd, IngestSession};
use crate::topic::Topic;

/// State shared by one route's handler
#[derive(Clone)]
struct IngestState {
    topic: Arc<Topic>,
    idle_timeout: Duration,
    next_session_id: Arc<AtomicU64>,
}

/// Build the router for one ingest listener
///
/// `routes` are all routes bound to the same address, possibly belonging to
/// different topics.
pub(crate) fn router(routes: &[(IngestRoute, Arc<Topic>)], idle_timeout: Duration) -> Router {
    let next_session_id = Arc::new(AtomicU64::new(1));

    let mut router = Router::new();
    for (route, topic) in routes {
        let state = IngestState {
            topic: Arc::clone(topic),
            idle_timeout,
            next_session_id: Arc::clone(&next_session_id),
        };
        for path in route.paths() {
            router = router.route(
                &path,
                post(ingest_handler)
                    .put(ingest_handler)
                    .with_state(state.clone()),
            );
        }
    }

    router
        .fallback(unknown_route)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

async fn unknown_route(uri: Uri) -> StatusCode {
    tracing::warn!(path = %uri.path(), "Ingest request for unknown route");
    StatusCode::NOT_FOUND
}

/// Path parameters of an ingest request; trailing segments are ignored
#[derive(Deserialize)]
struct IngestPath {
    channel: String,
}

async fn ingest_handler(
    State(state): State<IngestState>,
    Path(IngestPath { channel }): Path<IngestPath>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    body: Body,
) -> StatusCode {
    let topic = &state.topic;
    let channel = ChannelKey::from(channel);
    let routed = topic.is_known_channel(channel.as_str());
    let session_id = state.next_session_id.fetch_add(1, Ordering::Relaxed);

    let mut session = IngestSession::new(
        session_id,
        peer_addr,
        topic.name().clone(),
        channel.clone(),
        routed,
    );

    if routed {
        tracing::info!(
            session_id = session_id,
            topic = %topic.name(),
            channel = %channel,
            peer = %peer_addr,
            "Ingest session started"
        );
    } else {
        tracing::warn!(
            session_id = session_id,
            topic = %topic.name(),
            channel = %channel,
            peer = %peer_addr,
            "Ingest for unknown channel, data will be discarded"
        );
    }

    topic.stats().ingest_started();
    let (end, status) = relay_body(&mut session, topic, body, state.idle_timeout).await;
    topic.stats().ingest_ended();

    session.finish(end);
    status
}

/// Relay body frames until the stream ends, fails, or goes idle
async fn relay_body(
    session: &mut IngestSession,
    topic: &Topic,
    body: Body,
    idle_timeout: Duration,
) -> (IngestEnd, StatusCode) {
    let mut frames = body.into_data_stream();

    loop {
        let chunk = match tokio::time::timeout(idle_timeout, frames.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(e))) => {
                tracing::debug!(
                    session_id = session.session_id,
                    error = %e,
                    "Ingest stream reset"
                );
                return (IngestEnd::Reset, StatusCode::BAD_REQUEST);
            }
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(
                    session_id = session.session_id,
                    idle_timeout_ms = idle_timeout.as_millis() as u64,
                    "Ingest session idle, closing"
                );
                return (IngestEnd::TimedOut, StatusCode::REQUEST_TIMEOUT);
            }
        };

        if chunk.is_empty() {
            continue;
        }

        let len = chunk.len();
        if session.routed {
            let report = topic.broadcast(session.channel.as_str(), chunk).await;
            session.record_relayed(len, &report);
        } else {
            session.record_discarded(len);
        }
    }

    let status = if session.routed {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (IngestEnd::Completed, status)
}
