// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Task scheduler for timed operations

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

struct ScheduledTask {
    name: String,
    handle: JoinHandle<()>,
}

/// Runs named periodic tasks until shutdown
pub struct Scheduler {
    tasks: Mutex<Vec<ScheduledTask>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Run `task` every `period`, first after one period. A slow run delays
    /// the next one instead of bursting.
    pub fn every<F, Fut>(&self, name: &str, period: Duration, mut task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        let task_name = name.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => task().await,
                    _ = shutdown.recv() => break,
                }
            }
            debug!("Task '{}' stopped", task_name);
        });

        debug!("Scheduled task '{}' with interval {:?}", name, period);
        self.tasks.lock().push(ScheduledTask {
            name: name.to_string(),
            handle,
        });
    }

    /// Receiver fired once on shutdown, for loops not run by the scheduler
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.lock().iter().map(|t| t.name.clone()).collect()
    }

    /// Signal every task and wait for them to finish
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let tasks: Vec<ScheduledTask> = std::mem::take(&mut *self.tasks.lock());

        for task in tasks {
            if let Err(e) = task.handle.await {
                warn!("Task '{}' ended abnormally: {}", task.name, e);
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
