// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Vertac - industrial cycle monitoring
//!
//! Turns raw sensor streams into bounded operational cycles, compares every
//! finished cycle against a reference and ships edge data to the backend
//! without losing samples on a flaky network.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────── edge ────────────────┐      ┌──────────────────── backend ─────────────────────┐
//! │ SensorSimulator → ResilienceBuffer ──┼─────→│ Engine → CycleStateMachine (one per stream)      │
//! │                   (SQLite queue)     │ HTTP │    ↓ observer channel                            │
//! └──────────────────────────────────────┘      │ Dispatcher → Database → AnalysisEngine           │
//!                                               │    ↓                                             │
//!                                               │ EventBus → WebSocketServer                       │
//!                                               └──────────────────────────────────────────────────┘
//! ```

pub mod analysis;
pub mod buffer;
pub mod config;
pub mod core;
pub mod cycle;
pub mod db;
pub mod edge;
pub mod error;
pub mod model;
pub mod storage;
pub mod streaming;

// Re-exports for convenience
pub use analysis::AnalysisEngine;
pub use buffer::{HttpTransport, IngestTransport, ResilienceBuffer};
pub use config::Config;
pub use core::{Engine, EventBus, LocalTransport};
pub use cycle::{CycleEvent, CycleState, CycleStateMachine};
pub use db::Database;
pub use edge::EdgeConnector;
pub use error::{Result, VertacError};

/// Vertac version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Vertac name
pub const NAME: &str = "Vertac";
