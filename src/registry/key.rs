//! Topic and channel identifiers
//!
//! A topic is one independent relay instance (video, encoder status, ...).
//! Within a topic, a channel key selects one logical stream out of a small,
//! fixed set.

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identifier of one logical stream within a topic (e.g. "05")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelKey(Arc<str>);

impl ChannelKey {
    /// Create a new channel key
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ChannelKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ChannelKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a relay topic (e.g. "video")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicName(Arc<str>);

impl TopicName {
    /// Create a new topic name
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TopicName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TopicName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TopicName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The fixed set of channel keys a topic accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelSet(BTreeSet<ChannelKey>);

impl ChannelSet {
    /// Zero-padded numeric keys, e.g. `numbered(1..=16, 2)` gives "01".."16"
    pub fn numbered(range: RangeInclusive<u32>, width: usize) -> Self {
        range
            .map(|n| ChannelKey::new(format!("{:0width$}", n, width = width)))
            .collect()
    }

    /// Check whether a key belongs to the set
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelKey> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Channels "01" through "16"
impl Default for ChannelSet {
    fn default() -> Self {
        Self::numbered(1..=16, 2)
    }
}

impl FromIterator<ChannelKey> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = ChannelKey>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(ChannelKey::from).collect()
    }
}
