//! Lightweight counters for cache and compilation events.
//!
//! Deliberately global so every shim instance reports into the same tally,
//! matching how operators inspect hit/miss/evict rates in one place.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

static COUNTERS: OnceLock<Mutex<HashMap<&'static str, u64>>> = OnceLock::new();

fn counters() -> &'static Mutex<HashMap<&'static str, u64>> {
    COUNTERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Bumps the named event counter.
pub fn cache_event(name: &'static str) {
    let mut counters = counters().lock().expect("profiling counter mutex poisoned");
    *counters.entry(name).or_insert(0) += 1;
}

/// Returns the current value of a single counter.
pub fn counter(name: &str) -> u64 {
    let counters = counters().lock().expect("profiling counter mutex poisoned");
    counters.get(name).copied().unwrap_or(0)
}

/// Copies all counters, for reports and debugging.
pub fn snapshot() -> HashMap<&'static str, u64> {
    counters()
        .lock()
        .expect("profiling counter mutex poisoned")
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_snapshot() {
        let before = counter("profiling_test_event");
        cache_event("profiling_test_event");
        cache_event("profiling_test_event");
        assert_eq!(counter("profiling_test_event"), before + 2);
        assert!(snapshot().contains_key("profiling_test_event"));
    }
}
