//! Trigger merging for resolver runs.
//!
//! A fixed-period ticker and a feed of newly observed top token ids are
//! consumed by one loop. Runs never overlap: triggers arriving during a run
//! collapse into a single follow-up run. Shutdown is checked only between
//! runs, so an in-flight run always completes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::chain::HatchContract;
use crate::resolver::ResolveReport;

const TARGET: &str = "hatchery::scheduler";

/// Something the scheduler can run once per trigger.
#[async_trait]
pub trait RunResolver: Send + Sync {
    async fn run_once(&self) -> Result<ResolveReport>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Tick,
    TopToken(u64),
    /// Follow-up for triggers that arrived during the previous run.
    Coalesced,
}

/// Forwards only strictly increasing token ids.
#[derive(Debug, Default)]
pub struct TopTokenFilter {
    last: Option<u64>,
}

impl TopTokenFilter {
    pub fn accept(&mut self, token_id: u64) -> bool {
        if self.last.is_some_and(|last| token_id <= last) {
            return false;
        }
        self.last = Some(token_id);
        true
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub runs: u64,
    pub failed_runs: u64,
    /// Triggers folded into a follow-up run.
    pub coalesced_triggers: u64,
}

pub struct Scheduler {
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(poll_interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            poll_interval,
            shutdown,
        }
    }

    /// Runs until shutdown. The first tick fires immediately.
    pub async fn run(
        self,
        resolver: &dyn RunResolver,
        mut top_tokens: mpsc::UnboundedReceiver<u64>,
    ) -> SchedulerStats {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut filter = TopTokenFilter::default();
        let mut feed_open = true;
        let mut stats = SchedulerStats::default();

        tracing::info!(
            target: TARGET,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Scheduler started"
        );

        loop {
            let trigger = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => Trigger::Tick,
                next = top_tokens.recv(), if feed_open => match next {
                    Some(token_id) if filter.accept(token_id) => Trigger::TopToken(token_id),
                    Some(_) => continue,
                    None => {
                        tracing::debug!(target: TARGET, "Top token feed closed");
                        feed_open = false;
                        continue;
                    }
                },
            };

            let mut next_trigger = Some(trigger);
            while let Some(trigger) = next_trigger.take() {
                let mut pending = 0u64;
                let run = resolver.run_once();
                tokio::pin!(run);

                let outcome = loop {
                    tokio::select! {
                        outcome = &mut run => break outcome,
                        _ = ticker.tick() => pending += 1,
                        next = top_tokens.recv(), if feed_open => match next {
                            Some(token_id) => {
                                if filter.accept(token_id) {
                                    pending += 1;
                                }
                            }
                            None => feed_open = false,
                        },
                    }
                };

                stats.runs += 1;
                match outcome {
                    Ok(report) => tracing::debug!(
                        target: TARGET,
                        ?trigger,
                        hatching = report.hatching.len(),
                        promoted = report.promoted.len(),
                        "Run finished"
                    ),
                    Err(err) => {
                        stats.failed_runs += 1;
                        tracing::error!(
                            target: TARGET,
                            ?trigger,
                            error = ?err,
                            "Resolver run failed, will retry on next trigger"
                        );
                    }
                }

                if pending > 0 && !self.shutdown.is_cancelled() {
                    stats.coalesced_triggers += pending;
                    next_trigger = Some(Trigger::Coalesced);
                }
            }
        }

        tracing::info!(
            target: TARGET,
            runs = stats.runs,
            failed_runs = stats.failed_runs,
            "Scheduler stopped"
        );
        stats
    }
}

/// Polls `total_supply` and sends every increase to the returned receiver.
pub fn spawn_top_token_watcher(
    contract: Arc<dyn HatchContract>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) -> (mpsc::UnboundedReceiver<u64>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        let mut highest: Option<u64> = None;
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match contract.total_supply().await {
                Ok(supply) if !highest.is_some_and(|h| supply <= h) => {
                    highest = Some(supply);
                    if tx.send(supply).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(
                    target: TARGET,
                    error = ?err,
                    "Failed to poll total supply"
                ),
            }
        }

        tracing::debug!(target: TARGET, "Top token watcher stopped");
    });

    (rx, handle)
}
