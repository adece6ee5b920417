// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-part wire frame codec.
//!
//! Part 1 is the UTF-8 topic string, part 2 the JSON envelope. The codec
//! ignores any trailing parts so a future frame extension stays readable.

use crate::error::FrameError;
use bytes::Bytes;
use mosaic_core::{Envelope, Topic};
use zeromq::ZmqMessage;

/// Encode `(topic, envelope)` into a multipart message.
pub fn encode(topic: &Topic, envelope: &Envelope) -> Result<ZmqMessage, FrameError> {
    let body = serde_json::to_vec(envelope)?;
    let mut message = ZmqMessage::from(topic.to_string());
    message.push_back(Bytes::from(body));
    Ok(message)
}

/// Decode a multipart message back into `(topic, envelope)`.
pub fn decode(message: &ZmqMessage) -> Result<(Topic, Envelope), FrameError> {
    let topic_part = message.get(0).ok_or(FrameError::MissingTopic)?;
    let event_part = message.get(1).ok_or(FrameError::MissingEvent)?;

    let topic_str = std::str::from_utf8(topic_part).map_err(|_| FrameError::TopicEncoding)?;
    let topic = Topic::parse(topic_str)?;
    let envelope: Envelope = serde_json::from_slice(event_part)?;

    Ok((topic, envelope))
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
