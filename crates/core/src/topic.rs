// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-level mailbox identifier.
//!
//! A topic is the string `"<mosaic_id>#<node_id>"`. It uniquely identifies
//! one node's transport mailbox across the whole process: the broker
//! republishes frames on the topic it received them with, and each node
//! transport subscribes to exactly its own topic.

use crate::id::{MosaicId, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Separator between the mosaic id and the node id.
const SEPARATOR: char = '#';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("malformed topic (expected \"<mosaic_id>#<node_id>\"): {0:?}")]
    Malformed(String),
    #[error("non-numeric mosaic id in topic: {0:?}")]
    MosaicId(String),
}

/// Mailbox address of a node on the event mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic {
    mosaic_id: MosaicId,
    node_id: NodeId,
}

impl Topic {
    pub fn new(mosaic_id: MosaicId, node_id: NodeId) -> Self {
        Self { mosaic_id, node_id }
    }

    /// Parse a wire topic string.
    ///
    /// Rejects strings without exactly one separator, with an empty node
    /// part, or with a non-numeric mosaic part.
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        let mut parts = raw.splitn(2, SEPARATOR);
        let mosaic_part = parts.next().unwrap_or_default();
        let node_part = parts.next().ok_or_else(|| TopicError::Malformed(raw.to_string()))?;

        if node_part.is_empty() || node_part.contains(SEPARATOR) {
            return Err(TopicError::Malformed(raw.to_string()));
        }

        let mosaic_id = mosaic_part
            .parse::<i64>()
            .map_err(|_| TopicError::MosaicId(raw.to_string()))?;

        Ok(Self { mosaic_id: MosaicId(mosaic_id), node_id: NodeId::new(node_part) })
    }

    pub fn mosaic_id(&self) -> MosaicId {
        self.mosaic_id
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.mosaic_id, SEPARATOR, self.node_id)
    }
}

impl TryFrom<String> for Topic {
    type Error = TopicError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}

#[cfg(test)]
#[path = "topic_tests.rs"]
mod tests;
