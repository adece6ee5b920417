// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the message layer.

use mosaic_core::topic::TopicError;
use thiserror::Error;

/// A wire frame that cannot be decoded.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame missing topic part")]
    MissingTopic,
    #[error("frame missing event part")]
    MissingEvent,
    #[error("topic part is not valid UTF-8")]
    TopicEncoding,
    #[error(transparent)]
    Topic(#[from] TopicError),
    #[error("event part is not a valid envelope: {0}")]
    Event(#[from] serde_json::Error),
}

/// Errors surfaced by the broker and node transports.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Socket(#[from] zeromq::ZmqError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("transport for topic {0} is not attached")]
    Detached(String),
}
