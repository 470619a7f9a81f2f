// Copyright (c) 2024 The Botho Foundation

//! Fixed-interval tick loop.

use std::time::Duration;
use tokio::{
    sync::broadcast,
    time::{self, MissedTickBehavior},
};
use tracing::{error, info};

use crate::workflow::{MintWorkflow, TickReport};

/// Runs the workflow on a timer until shutdown is signalled.
///
/// The first tick fires immediately. Shutdown is observed between ticks, so
/// a deposit in flight always reaches an outcome first.
pub struct Scheduler {
    workflow: MintWorkflow,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl Scheduler {
    pub fn new(
        workflow: MintWorkflow,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            workflow,
            interval,
            shutdown,
        }
    }

    /// Run until shutdown. Hands the workflow back to the caller.
    pub async fn run(mut self) -> MintWorkflow {
        info!("Polling every {}s", self.interval.as_secs());

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.recv() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    run_once(&mut self.workflow).await;
                }
            }
        }

        self.workflow
    }
}

/// Run a single tick and log a failed fetch.
pub async fn run_once(workflow: &mut MintWorkflow) -> Option<TickReport> {
    match workflow.tick().await {
        Ok(report) => Some(report),
        Err(e) => {
            error!(stage = e.stage(), "Tick aborted: {}", e);
            None
        }
    }
}
