//! Relay configuration
//!
//! The default configuration reproduces the classic three-topic layout:
//!
//! | topic               | subscribe | ingest                                   |
//! |---------------------|-----------|------------------------------------------|
//! | `video`             | 10002     | `:19650/<ch>`, `:13300/arcstream/<ch>`   |
//! | `encoder-status`    | 13200     | `:13100/<ch>`, `:13300/encoder/<ch>`     |
//! | `nicmonitor-status` | 13400     | `:13300/nicmonitor/<ch>`                 |

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::{ChannelSet, TopicName};
use crate::session::OverflowPolicy;

pub const VIDEO_INGEST_PORT: u16 = 19650;
pub const VIDEO_SUBSCRIBE_PORT: u16 = 10002;
pub const ENCODER_STATUS_INGEST_PORT: u16 = 13100;
pub const ENCODER_STATUS_SUBSCRIBE_PORT: u16 = 13200;
pub const SHARED_INGEST_PORT: u16 = 13300;
pub const NIC_MONITOR_STATUS_SUBSCRIBE_PORT: u16 = 13400;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "RELAY_";

/// One ingest route: `http://<addr>/<prefix>/<channel>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRoute {
    /// Listener address; routes sharing an address share one listener
    pub addr: SocketAddr,

    /// Path prefix without slashes; empty for `/<channel>`
    #[serde(default)]
    pub prefix: String,
}

impl IngestRoute {
    pub fn new(addr: SocketAddr, prefix: impl Into<String>) -> Self {
        Self {
            addr,
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    /// Axum route path for this prefix
    pub fn path(&self) -> String {
        if self.prefix.is_empty() {
            "/{channel}".to_string()
        } else {
            format!("/{}/{{channel}}", self.prefix)
        }
    }

    /// Every route path served for this prefix
    ///
    /// Anything after the channel segment is accepted and ignored, so
    /// `/05/` and `/nicmonitor/05/x` still feed channel `05`.
    pub fn paths(&self) -> [String; 3] {
        let base = self.path();
        [
            format!("{}/", base),
            format!("{}/{{*rest}}", base),
            base,
        ]
    }
}

/// Configuration of one topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: TopicName,

    /// WebSocket listener address
    pub subscribe_addr: SocketAddr,

    /// Accepted channel keys
    #[serde(default)]
    pub channels: ChannelSet,

    /// Where sources push data for this topic
    #[serde(default)]
    pub ingest: Vec<IngestRoute>,
}

impl TopicConfig {
    /// Create a topic with the default channel set and no ingest routes
    pub fn new(name: impl Into<TopicName>, subscribe_addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            subscribe_addr,
            channels: ChannelSet::default(),
            ingest: Vec::new(),
        }
    }

    /// Set the accepted channel keys
    pub fn channels(mut self, channels: ChannelSet) -> Self {
        self.channels = channels;
        self
    }

    /// Add an ingest route
    pub fn ingest_route(mut self, addr: SocketAddr, prefix: impl Into<String>) -> Self {
        self.ingest.push(IngestRoute::new(addr, prefix));
        self
    }
}

/// Relay configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay topics
    pub topics: Vec<TopicConfig>,

    /// Liveness probe period
    #[serde(rename = "probe_interval_ms", with = "duration_ms")]
    pub probe_interval: Duration,

    /// End an ingest session after this long without data
    #[serde(rename = "ingest_idle_timeout_ms", with = "duration_ms")]
    pub ingest_idle_timeout: Duration,

    /// Outbound messages buffered per subscriber
    pub subscriber_queue_capacity: usize,

    /// Behaviour when a subscriber's queue is full
    pub overflow_policy: OverflowPolicy,

    /// Refuse WebSocket upgrades for unknown channels instead of accepting
    /// them as inert connections
    pub reject_unknown_channels: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        let addr = |port| SocketAddr::new(any, port);

        Self {
            topics: vec![
                TopicConfig::new("video", addr(VIDEO_SUBSCRIBE_PORT))
                    .ingest_route(addr(VIDEO_INGEST_PORT), "")
                    .ingest_route(addr(SHARED_INGEST_PORT), "arcstream"),
                TopicConfig::new("encoder-status", addr(ENCODER_STATUS_SUBSCRIBE_PORT))
                    .ingest_route(addr(ENCODER_STATUS_INGEST_PORT), "")
                    .ingest_route(addr(SHARED_INGEST_PORT), "encoder"),
                TopicConfig::new("nicmonitor-status", addr(NIC_MONITOR_STATUS_SUBSCRIBE_PORT))
                    .ingest_route(addr(SHARED_INGEST_PORT), "nicmonitor"),
            ],
            probe_interval: Duration::from_secs(2),
            ingest_idle_timeout: Duration::from_secs(30),
            subscriber_queue_capacity: 256,
            overflow_policy: OverflowPolicy::DropNewest,
            reject_unknown_channels: false,
        }
    }
}

impl RelayConfig {
    /// Configuration with no topics
    pub fn empty() -> Self {
        Self {
            topics: Vec::new(),
            ..Default::default()
        }
    }

    /// Load defaults, then an optional TOML file, then `RELAY_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(RelayConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: RelayConfig = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        Ok(config)
    }

    /// Add a topic
    pub fn topic(mut self, topic: TopicConfig) -> Self {
        self.topics.push(topic);
        self
    }

    /// Set the liveness probe period
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the ingest idle timeout
    pub fn ingest_idle_timeout(mut self, timeout: Duration) -> Self {
        self.ingest_idle_timeout = timeout;
        self
    }

    /// Set the per-subscriber queue capacity
    pub fn subscriber_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity;
        self
    }

    /// Set the queue overflow policy
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Refuse upgrades for unknown channels
    pub fn reject_unknown_channels(mut self, reject: bool) -> Self {
        self.reject_unknown_channels = reject;
        self
    }

    /// Rebind every listener to `host`, keeping ports
    pub fn bind_host(mut self, host: IpAddr) -> Self {
        for topic in &mut self.topics {
            topic.subscribe_addr.set_ip(host);
            for route in &mut topic.ingest {
                route.addr.set_ip(host);
            }
        }
        self
    }

    /// Look up a topic by name
    pub fn find_topic(&self, name: &str) -> Option<&TopicConfig> {
        self.topics.iter().find(|t| t.name.as_str() == name)
    }

    /// Check the configuration for conflicts
    pub fn validate(&self) -> Result<()> {
        if self.topics.is_empty() {
            return Err(Error::Config("no topics configured".into()));
        }
        if self.probe_interval.is_zero() {
            return Err(Error::Config("probe interval must be non-zero".into()));
        }
        if self.ingest_idle_timeout.is_zero() {
            return Err(Error::Config("ingest idle timeout must be non-zero".into()));
        }
        if self.subscriber_queue_capacity == 0 {
            return Err(Error::Config("subscriber queue capacity must be non-zero".into()));
        }

        let mut names = HashSet::new();
        let mut subscribe_addrs = HashSet::new();
        let mut routes = HashSet::new();

        for topic in &self.topics {
            if !names.insert(topic.name.as_str()) {
                return Err(Error::DuplicateTopic(topic.name.to_string()));
            }
            if topic.channels.is_empty() {
                return Err(Error::Config(format!("topic {} has no channels", topic.name)));
            }
            // Port 0 asks the OS for a fresh port, so it never conflicts
            if topic.subscribe_addr.port() != 0 && !subscribe_addrs.insert(topic.subscribe_addr) {
                return Err(Error::Config(format!(
                    "subscribe address {} used by more than one topic",
                    topic.subscribe_addr
                )));
            }
            for route in &topic.ingest {
                if !routes.insert((route.addr, route.prefix.as_str())) {
                    return Err(Error::Config(format!(
                        "ingest route {}{} used more than once",
                        route.addr,
                        route.path()
                    )));
                }
            }
        }

        for topic in &self.topics {
            for route in &topic.ingest {
                if subscribe_addrs.contains(&route.addr) {
                    return Err(Error::Config(format!(
                        "address {} is both an ingest and a subscribe listener",
                        route.addr
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Serde adapter for durations expressed in milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(config.topics.len(), 3);
        assert_eq!(config.probe_interval, Duration::from_secs(2));
        assert_eq!(config.ingest_idle_timeout, Duration::from_secs(30));
        assert_eq!(config.overflow_policy, OverflowPolicy::DropNewest);
        assert!(!config.reject_unknown_channels);
        tokio_test::assert_ok!(config.validate());

        let video = config.find_topic("video").unwrap();
        assert_eq!(video.subscribe_addr.port(), VIDEO_SUBSCRIBE_PORT);
        assert_eq!(video.channels.len(), 16);
        assert_eq!(video.ingest[0].addr.port(), VIDEO_INGEST_PORT);
        assert_eq!(video.ingest[0].path(), "/{channel}");
        assert_eq!(video.ingest[1].addr.port(), SHARED_INGEST_PORT);
        assert_eq!(video.ingest[1].path(), "/arcstream/{channel}");

        let nic = config.find_topic("nicmonitor-status").unwrap();
        assert_eq!(nic.subscribe_addr.port(), NIC_MONITOR_STATUS_SUBSCRIBE_PORT);
        assert_eq!(nic.ingest.len(), 1);
    }

    #[test]
    fn test_ingest_route_prefix_trimmed() {
        let route = IngestRoute::new(local(1), "/nicmonitor/");

        assert_eq!(route.prefix, "nicmonitor");
        assert_eq!(route.path(), "/nicmonitor/{channel}");
    }

    #[test]
    fn test_ingest_route_paths_accept_trailing_segments() {
        let root = IngestRoute::new(local(1), "");
        assert_eq!(root.paths(), ["/{channel}/", "/{channel}/{*rest}", "/{channel}"]);

        let nested = IngestRoute::new(local(1), "encoder");
        assert!(nested.paths().contains(&"/encoder/{channel}/{*rest}".to_string()));
    }

    #[test]
    fn test_builder_chaining() {
        let config = RelayConfig::empty()
            .topic(TopicConfig::new("video", local(0)).ingest_route(local(0), ""))
            .probe_interval(Duration::from_millis(100))
            .ingest_idle_timeout(Duration::from_secs(5))
            .subscriber_queue_capacity(8)
            .overflow_policy(OverflowPolicy::Disconnect)
            .reject_unknown_channels(true);

        assert_eq!(config.topics.len(), 1);
        assert_eq!(config.probe_interval, Duration::from_millis(100));
        assert_eq!(config.ingest_idle_timeout, Duration::from_secs(5));
        assert_eq!(config.subscriber_queue_capacity, 8);
        assert_eq!(config.overflow_policy, OverflowPolicy::Disconnect);
        assert!(config.reject_unknown_channels);
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_bind_host() {
        let config = RelayConfig::default().bind_host(IpAddr::V4(Ipv4Addr::LOCALHOST));

        for topic in &config.topics {
            assert!(topic.subscribe_addr.ip().is_loopback());
            assert!(topic.ingest.iter().all(|r| r.addr.ip().is_loopback()));
        }
        let video = config.find_topic("video").unwrap();
        assert_eq!(video.subscribe_addr.port(), VIDEO_SUBSCRIBE_PORT);
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(matches!(RelayConfig::empty().validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_topic() {
        let config = RelayConfig::empty()
            .topic(TopicConfig::new("video", local(1000)))
            .topic(TopicConfig::new("video", local(1001)));

        assert!(matches!(config.validate(), Err(Error::DuplicateTopic(name)) if name == "video"));
    }

    #[test]
    fn test_validate_rejects_shared_subscribe_addr() {
        let config = RelayConfig::empty()
            .topic(TopicConfig::new("a", local(1000)))
            .topic(TopicConfig::new("b", local(1000)));

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_route() {
        let config = RelayConfig::empty()
            .topic(TopicConfig::new("a", local(1000)).ingest_route(local(2000), "x"))
            .topic(TopicConfig::new("b", local(1001)).ingest_route(local(2000), "x"));

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = RelayConfig::default().subscriber_queue_capacity(0);

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_channels() {
        let config = RelayConfig::empty()
            .topic(TopicConfig::new("a", local(1000)).channels(ChannelSet::from_iter(Vec::<&str>::new())));

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_defaults_without_file() {
        let config = tokio_test::assert_ok!(RelayConfig::load(None));

        assert_eq!(config.topics.len(), 3);
        assert_eq!(config.probe_interval, Duration::from_secs(2));
    }
}
