// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Role registry: node kind → role adapter.

use crate::agent::{AgentRole, LlmDriver};
use crate::aggregator::AggregatorRole;
use crate::email::EmailRole;
use crate::scheduler::SchedulerRole;
use mosaic_core::{NodeKind, NodeRecord, RuntimeError};
use mosaic_runtime::{RoleAdapter, RoleFactory};
use std::sync::Arc;

/// The standard four roles. Agent sessions delegate to the injected LLM
/// driver; everything else is pure runtime.
pub struct StandardRoles {
    driver: Arc<dyn LlmDriver>,
}

impl StandardRoles {
    pub fn new(driver: Arc<dyn LlmDriver>) -> Self {
        Self { driver }
    }
}

impl RoleFactory for StandardRoles {
    fn build(&self, node: &NodeRecord) -> Result<Arc<dyn RoleAdapter>, RuntimeError> {
        Ok(match node.kind {
            NodeKind::Agent => Arc::new(AgentRole::new(Arc::clone(&self.driver))),
            NodeKind::Scheduler => Arc::new(SchedulerRole::new()),
            NodeKind::Email => Arc::new(EmailRole::new()),
            NodeKind::Aggregator => Arc::new(AggregatorRole::new()),
        })
    }
}
