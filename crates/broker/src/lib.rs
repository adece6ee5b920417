// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ZeroMQ message layer for the mosaic event mesh.
//!
//! Pattern: PULL-PUB on the broker side, PUSH-SUB on the node side.
//! Topic format: `{mosaic_id}#{node_id}`. The broker is a relay and event
//! store, not a queue: it republishes each frame immediately and persists
//! the event on a detached task.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod broker;
mod error;
mod frame;
mod transport;

pub use broker::{Broker, BrokerEndpoints};
pub use error::{FrameError, TransportError};
pub use transport::{NodeTransport, TransportHandler};
