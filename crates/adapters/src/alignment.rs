// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared auto-close decision for alignment-driven sessions.

use mosaic_core::{Envelope, EventType, SessionAlignment};
use tracing::{debug, info, warn};

/// Decide whether a downstream session closes after handling `envelope`,
/// given the alignment of the connection it arrived over.
///
/// `TASKING` closes after every event; `MIRRORING` closes when the
/// upstream session ends; `AGENT_DRIVEN` closes only through the
/// explicit task-complete signal, which the caller handles before asking
/// here. No connection means no auto-close.
pub(crate) fn close_by_alignment(
    alignment: Option<SessionAlignment>,
    envelope: &Envelope,
) -> bool {
    let Some(alignment) = alignment else {
        debug!(
            source = %envelope.source_node_id,
            "no connection from event source, session will not auto-close"
        );
        return false;
    };

    match alignment {
        SessionAlignment::Tasking => {
            info!(event = %envelope.event_id, "tasking session completed its event, will auto-close");
            true
        }
        SessionAlignment::Mirroring => {
            let close = envelope.event_type == EventType::SessionEnd;
            if close {
                info!(source = %envelope.source_session_id, "mirrored upstream session ended, will auto-close");
            }
            close
        }
        SessionAlignment::AgentDriven => false,
    }
}

/// True when an event can never trigger auto-close regardless of
/// alignment: user input and events without a resolvable source.
pub(crate) fn exempt_from_auto_close(envelope: &Envelope) -> bool {
    if envelope.event_type == EventType::UserMessage {
        return true;
    }
    if envelope.source_node_id.is_empty() {
        warn!(event = %envelope.event_id, "event missing source node, session will not auto-close");
        return true;
    }
    false
}

#[cfg(test)]
#[path = "alignment_tests.rs"]
mod tests;
