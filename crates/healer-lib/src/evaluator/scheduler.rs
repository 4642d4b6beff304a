//! Per-node evaluation scheduling
//!
//! A single dispatcher task owns all scheduling state. Node triggers and
//! requeue timers are funneled into it, and it guarantees at most one
//! in-flight evaluation per node. A trigger for a node that is already
//! being evaluated is coalesced into one re-run after the current cycle.

use super::cycle::{CycleOutcome, NodeEvaluator, Requeue};
use crate::health::components;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Capacity of the trigger channel
    pub queue_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
            queue_size: 1024,
        }
    }
}

impl SchedulerConfig {
    /// Delay after the given number of consecutive failures (at least one)
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Cloneable handle used to request evaluations
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<String>,
}

impl SchedulerHandle {
    /// Request an evaluation; false once the scheduler has stopped
    pub async fn trigger(&self, node: impl Into<String>) -> bool {
        self.tx.send(node.into()).await.is_ok()
    }

    /// Non-blocking variant for callers outside the runtime's async context
    pub fn try_trigger(&self, node: impl Into<String>) -> bool {
        self.tx.try_send(node.into()).is_ok()
    }
}

#[derive(Debug, Default)]
struct NodeSlot {
    in_flight: bool,
    /// A trigger arrived while in flight
    pending: bool,
    /// Bumped on every start; timers from older generations are stale
    generation: u64,
    /// Consecutive cycles that asked for backoff
    failures: u32,
    /// Pending requeue timer, aborted once it can no longer fire usefully
    timer: Option<AbortHandle>,
}

impl NodeSlot {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

pub struct EvaluationScheduler {
    evaluator: Arc<NodeEvaluator>,
    config: SchedulerConfig,
    rx: mpsc::Receiver<String>,
}

impl EvaluationScheduler {
    pub fn new(evaluator: Arc<NodeEvaluator>, config: SchedulerConfig) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        (
            Self {
                evaluator,
                config,
                rx,
            },
            SchedulerHandle { tx },
        )
    }

    /// Run until shutdown; in-flight evaluations are aborted on exit
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let Self {
            evaluator,
            config,
            mut rx,
        } = self;
        let health = evaluator.health().clone();
        health.set_healthy(components::SCHEDULER).await;
        info!("Starting evaluation scheduler");

        let mut dispatcher = Dispatcher {
            evaluator,
            config,
            slots: HashMap::new(),
            workers: JoinSet::new(),
            timers: JoinSet::new(),
        };

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(in_flight = dispatcher.workers.len(), "Shutting down evaluation scheduler");
                    break;
                }
                Some(node) = rx.recv() => dispatcher.on_trigger(node),
                Some(joined) = dispatcher.workers.join_next() => match joined {
                    Ok((node, outcome)) => dispatcher.on_finished(node, outcome),
                    Err(e) => error!(error = %e, "Evaluation task failed to join"),
                },
                Some(fired) = dispatcher.timers.join_next() => {
                    if let Ok((node, generation)) = fired {
                        dispatcher.on_timer(node, generation);
                    }
                }
            }
        }

        dispatcher.workers.abort_all();
        dispatcher.timers.abort_all();
        health
            .set_unhealthy(components::SCHEDULER, "scheduler stopped")
            .await;
    }
}

struct Dispatcher {
    evaluator: Arc<NodeEvaluator>,
    config: SchedulerConfig,
    slots: HashMap<String, NodeSlot>,
    workers: JoinSet<(String, Option<CycleOutcome>)>,
    timers: JoinSet<(String, u64)>,
}

impl Dispatcher {
    fn on_trigger(&mut self, node: String) {
        let slot = self.slots.entry(node.clone()).or_default();
        if slot.in_flight {
            debug!(node = %node, "Evaluation in flight, coalescing trigger");
            slot.pending = true;
        } else {
            self.start(node);
        }
    }

    fn start(&mut self, node: String) {
        let slot = self.slots.entry(node.clone()).or_default();
        slot.in_flight = true;
        slot.pending = false;
        slot.generation += 1;
        slot.cancel_timer();

        let evaluator = Arc::clone(&self.evaluator);
        self.workers.spawn(async move {
            // a panicking cycle must not take the node out of the schedule
            let outcome = AssertUnwindSafe(evaluator.evaluate(&node))
                .catch_unwind()
                .await
                .ok();
            (node, outcome)
        });
    }

    fn on_finished(&mut self, node: String, outcome: Option<CycleOutcome>) {
        let requeue = match outcome {
            Some(outcome) => outcome.requeue,
            None => {
                error!(node = %node, "Evaluation panicked");
                Requeue::Backoff
            }
        };

        let Some(slot) = self.slots.get_mut(&node) else {
            return;
        };
        slot.in_flight = false;

        let delay = match requeue {
            Requeue::Forget => {
                if slot.pending {
                    // re-added while the deletion was being processed
                    self.start(node);
                } else if let Some(mut slot) = self.slots.remove(&node) {
                    slot.cancel_timer();
                }
                return;
            }
            Requeue::After(delay) => {
                slot.failures = 0;
                delay
            }
            Requeue::Backoff => {
                slot.failures = slot.failures.saturating_add(1);
                self.config.backoff(slot.failures)
            }
        };

        if slot.pending {
            self.start(node);
            return;
        }

        let generation = slot.generation;
        debug!(node = %node, delay_secs = delay.as_secs_f64(), "Evaluation requeued");
        let timer = self.timers.spawn({
            let node = node.clone();
            async move {
                tokio::time::sleep(delay).await;
                (node, generation)
            }
        });
        if let Some(slot) = self.slots.get_mut(&node) {
            slot.timer = Some(timer);
        }
    }

    fn on_timer(&mut self, node: String, generation: u64) {
        if let Some(slot) = self.slots.get_mut(&node) {
            if slot.generation == generation {
                slot.timer = None;
            }
        }
        let due = self
            .slots
            .get(&node)
            .map(|slot| !slot.in_flight && slot.generation == generation)
            .unwrap_or(false);
        if due {
            self.start(node);
        }
    }
}
