// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime configuration.
//!
//! Every field is required; there are no defaults for broker addresses or
//! the worker-pool size. Missing sections or fields surface as
//! [`RuntimeError::Config`].

use crate::error::RuntimeError;
use serde::{Deserialize, Serialize};

/// Broker bind addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub pull_port: u16,
    pub publish_port: u16,
}

impl BrokerConfig {
    pub fn pull_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.pull_port)
    }

    pub fn publish_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.publish_port)
    }
}

/// Worker-pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeOptions {
    pub max_threads: usize,
}

/// Full runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshConfig {
    pub broker: BrokerConfig,
    pub runtime: RuntimeOptions,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    broker: Option<RawBroker>,
    runtime: Option<RawRuntime>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBroker {
    host: Option<String>,
    pull_port: Option<u16>,
    publish_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRuntime {
    max_threads: Option<usize>,
}

impl MeshConfig {
    pub fn new(broker: BrokerConfig, max_threads: usize) -> Self {
        Self { broker, runtime: RuntimeOptions { max_threads } }
    }

    /// Parse and validate a TOML configuration document.
    pub fn from_toml_str(raw: &str) -> Result<Self, RuntimeError> {
        let raw: RawConfig =
            toml::from_str(raw).map_err(|e| RuntimeError::Config(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, RuntimeError> {
        let broker = raw.broker.ok_or_else(|| RuntimeError::Config("[broker]".into()))?;
        let runtime = raw.runtime.ok_or_else(|| RuntimeError::Config("[runtime]".into()))?;

        let host = broker.host.ok_or_else(|| RuntimeError::Config("broker.host".into()))?;
        let pull_port =
            broker.pull_port.ok_or_else(|| RuntimeError::Config("broker.pull_port".into()))?;
        let publish_port = broker
            .publish_port
            .ok_or_else(|| RuntimeError::Config("broker.publish_port".into()))?;

        let max_threads =
            runtime.max_threads.ok_or_else(|| RuntimeError::Config("runtime.max_threads".into()))?;
        if max_threads == 0 {
            return Err(RuntimeError::Config("runtime.max_threads must be > 0".into()));
        }

        Ok(Self {
            broker: BrokerConfig { host, pull_port, publish_port },
            runtime: RuntimeOptions { max_threads },
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
