// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Core engine module - live ingest, cycle control and event dispatch

mod engine;
mod event_bus;
mod scheduler;

pub use engine::{Engine, LocalTransport};
pub use event_bus::{Event, EventBus, LiveEvent};
pub use scheduler::Scheduler;
