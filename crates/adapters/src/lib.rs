// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-role adapters for the mosaic runtime.
//!
//! Four concrete roles implement the session application hook: **agent**
//! (LLM-driven, with persisted messages and token accounting),
//! **scheduler** (cron-triggered broadcaster, runtime-only), **email**
//! (event-triggered SMTP effect, runtime-only), and **aggregator**
//! (buffer + batch flush on close). [`StandardRoles`] wires them up by
//! node kind.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod agent;
mod aggregator;
mod alignment;
mod email;
mod registry;
mod scheduler;

pub use agent::{AgentRole, LlmDriver, LlmReply, LlmUsage, ScriptedDriver};
pub use aggregator::AggregatorRole;
pub use email::EmailRole;
pub use registry::StandardRoles;
pub use scheduler::{SchedulerRole, SCHEDULER_SESSION_ID};
