//! Evaluation loop
//!
//! [`NodeEvaluator`] runs one cycle for one node; [`EvaluationScheduler`]
//! decides when each node runs next.

mod cycle;
mod scheduler;

pub use cycle::{
    CycleOutcome, EvaluatorConfig, NodeEvaluator, NodeEvaluatorBuilder, Requeue, INTERRUPTED,
};
pub use scheduler::{EvaluationScheduler, SchedulerConfig, SchedulerHandle};
