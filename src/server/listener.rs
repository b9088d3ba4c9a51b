//! Relay server
//!
//! Binds every ingest and subscribe listener, spawns one liveness monitor per
//! topic, and serves until shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::registry::TopicName;
use crate::server::config::{IngestRoute, RelayConfig};
use crate::server::{ingest, subscribe};
use crate::topic::Topic;

/// What a listener serves
#[derive(Debug, Clone, PartialEq, Eq)]
enum ListenerKind {
    /// HTTP push endpoint, possibly shared by several topics
    Ingest,
    /// WebSocket endpoint of one topic
    Subscribe(TopicName),
}

struct BoundListener {
    kind: ListenerKind,
    local_addr: SocketAddr,
    listener: TcpListener,
    router: Router,
}

/// Relay server with all listeners bound
pub struct RelayServer {
    config: RelayConfig,
    topics: Vec<Arc<Topic>>,
    listeners: Vec<BoundListener>,
    ingest_addrs: HashMap<TopicName, Vec<SocketAddr>>,
}

impl RelayServer {
    /// Validate the configuration, build the topics and bind every listener
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        config.validate()?;

        let topics: Vec<Arc<Topic>> = config
            .topics
            .iter()
            .map(|tc| Arc::new(Topic::new(tc.clone(), &config)))
            .collect();

        let mut listeners = Vec::new();

        for topic in &topics {
            let addr = topic.config().subscribe_addr;
            let listener = bind_listener(addr).await?;
            listeners.push(BoundListener {
                kind: ListenerKind::Subscribe(topic.name().clone()),
                local_addr: listener.local_addr()?,
                listener,
                router: subscribe::router(Arc::clone(topic)),
            });
        }

        // Routes sharing a configured address share one listener
        let mut groups: Vec<(SocketAddr, Vec<(IngestRoute, Arc<Topic>)>)> = Vec::new();
        for topic in &topics {
            for route in &topic.config().ingest {
                match groups.iter_mut().find(|(addr, _)| *addr == route.addr) {
                    Some((_, routes)) => routes.push((route.clone(), Arc::clone(topic))),
                    None => groups.push((route.addr, vec![(route.clone(), Arc::clone(topic))])),
                }
            }
        }

        let mut ingest_addrs: HashMap<TopicName, Vec<SocketAddr>> = HashMap::new();
        for (addr, routes) in groups {
            let listener = bind_listener(addr).await?;
            let local_addr = listener.local_addr()?;

            for (_, topic) in &routes {
                ingest_addrs
                    .entry(topic.name().clone())
                    .or_default()
                    .push(local_addr);
            }

            listeners.push(BoundListener {
                kind: ListenerKind::Ingest,
                local_addr,
                listener,
                router: ingest::router(&routes, config.ingest_idle_timeout),
            });
        }

        Ok(Self {
            config,
            topics,
            listeners,
            ingest_addrs,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn topics(&self) -> &[Arc<Topic>] {
        &self.topics
    }

    /// Look up a topic by name
    pub fn topic(&self, name: &str) -> Option<&Arc<Topic>> {
        self.topics.iter().find(|t| t.name().as_str() == name)
    }

    /// Bound address of a topic's WebSocket listener
    pub fn subscribe_addr(&self, topic: &str) -> Option<SocketAddr> {
        self.listeners.iter().find_map(|l| match &l.kind {
            ListenerKind::Subscribe(name) if name.as_str() == topic => Some(l.local_addr),
            _ => None,
        })
    }

    /// Bound addresses of a topic's ingest routes, in configuration order
    pub fn ingest_addrs(&self, topic: &str) -> &[SocketAddr] {
        self.ingest_addrs
            .get(topic)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Run the server until a listener fails
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let monitors: Vec<_> = self
            .topics
            .iter()
            .map(|topic| topic.liveness().spawn())
            .collect();

        let mut servers = JoinSet::new();
        for bound in self.listeners {
            match &bound.kind {
                ListenerKind::Ingest => {
                    tracing::info!(addr = %bound.local_addr, "Listening for push streams");
                }
                ListenerKind::Subscribe(topic) => {
                    tracing::info!(
                        topic = %topic,
                        addr = %bound.local_addr,
                        "Awaiting WebSocket subscribers"
                    );
                }
            }

            let service = bound
                .router
                .into_make_service_with_connect_info::<SocketAddr>();
            servers.spawn(async move {
                axum::serve(bound.listener, service)
                    .await
                    .map_err(Error::from)
            });
        }

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            Some(joined) = servers.join_next() => match joined {
                Ok(result) => result,
                Err(e) => Err(Error::Io(std::io::Error::other(e))),
            },
        };

        servers.abort_all();
        for monitor in monitors {
            monitor.abort();
        }
        for topic in &self.topics {
            let closed = topic.terminate_all().await;
            if closed > 0 {
                tracing::info!(topic = %topic.name(), connections = closed, "Subscribers terminated");
            }
        }

        result
    }
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Bind { addr, source })
}
