// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Streaming module - live subscriber fan-out

mod websocket;

pub use websocket::*;

use serde::{Deserialize, Serialize};

use crate::core::LiveEvent;

/// Streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Enable WebSocket server
    pub websocket_enabled: bool,
    pub websocket_port: u16,
    pub websocket_max_clients: usize,

    /// Buffered events per subscriber before it starts skipping
    pub event_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            websocket_enabled: false,
            websocket_port: 8765,
            websocket_max_clients: 10,
            event_capacity: 1024,
        }
    }
}

/// Destination of live events.
///
/// Implementations must return immediately; a slow or gone subscriber never
/// holds up the caller.
pub trait EventSink: Send + Sync {
    fn broadcast(&self, stream_id: &str, event: LiveEvent);
}
