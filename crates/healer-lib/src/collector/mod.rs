//! Node health signal collection
//!
//! The evaluation loop asks a [`SignalCollector`] for the raw signals of one
//! node per cycle. Values are expected in [0, 1]; the scorer clamps anything
//! outside that range.

mod prometheus;

pub use self::prometheus::PrometheusCollector;

use crate::error::Result;
use crate::models::SignalSet;
use async_trait::async_trait;

/// Source of per-node health signals
#[async_trait]
pub trait SignalCollector: Send + Sync {
    /// Collect the current signals for a node
    ///
    /// A signal the source has no data for is omitted from the set rather
    /// than reported as zero. An unreachable source is an error.
    async fn collect(&self, node: &str) -> Result<SignalSet>;
}
