//! Registry error types

use super::key::{ChannelKey, TopicName};

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Channel is not part of the topic's known channel set
    #[error("unknown channel {channel} on topic {topic}")]
    UnknownChannel {
        topic: TopicName,
        channel: ChannelKey,
    },
}
