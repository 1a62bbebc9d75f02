// Metrics hooks for the matcher.
//
// Install a global `MatchMetrics` implementation with [`set_match_metrics`];
// every `TieredMatcher` lookup then reports the tier that answered, its
// latency and the number of peers returned.
use std::sync::{Arc, RwLock};
use std::time::Duration;

use index::Tier;
use once_cell::sync::OnceCell;

pub trait MatchMetrics: Send + Sync {
    /// A lookup finished. `tier` is the last tier consulted and `hit_count`
    /// the number of peers after filtering.
    fn record_lookup(&self, tier: Tier, latency: Duration, hit_count: usize);

    /// A Tier 1 or Tier 2 index call ran out of time and was treated as a miss.
    fn record_timeout(&self, _tier: Tier) {}
}

fn metrics_lock() -> &'static RwLock<Option<Arc<dyn MatchMetrics>>> {
    static METRICS: OnceCell<RwLock<Option<Arc<dyn MatchMetrics>>>> = OnceCell::new();
    METRICS.get_or_init(|| RwLock::new(None))
}

pub(crate) fn metrics_recorder() -> Option<Arc<dyn MatchMetrics>> {
    let guard = metrics_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.clone()
}

/// Install or clear the global match metrics recorder.
pub fn set_match_metrics(recorder: Option<Arc<dyn MatchMetrics>>) {
    let mut guard = metrics_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = recorder;
}
