//! Lightweight counters and timing scopes for cache observability.
//!
//! The dispatcher reports library builds and generation passes here so
//! callers (and tests) can see hit/miss behavior without a debugger.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

static CACHE_EVENTS: OnceLock<Mutex<HashMap<&'static str, u64>>> = OnceLock::new();
static SCOPE_TOTALS: OnceLock<Mutex<HashMap<&'static str, Duration>>> = OnceLock::new();

fn cache_events() -> &'static Mutex<HashMap<&'static str, u64>> {
    CACHE_EVENTS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn scope_totals() -> &'static Mutex<HashMap<&'static str, Duration>> {
    SCOPE_TOTALS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Counts one occurrence of a named cache event.
pub fn cache_event(name: &'static str) {
    let mut events = cache_events().lock().unwrap_or_else(|err| err.into_inner());
    *events.entry(name).or_insert(0) += 1;
}

/// Current count for a named cache event.
pub fn cache_event_count(name: &'static str) -> u64 {
    let events = cache_events().lock().unwrap_or_else(|err| err.into_inner());
    events.get(name).copied().unwrap_or(0)
}

/// Times a compilation/generation scope; the elapsed time is accumulated
/// under `name` when the guard drops.
pub fn compile_scope(name: &'static str) -> ScopeGuard {
    ScopeGuard {
        name,
        start: Instant::now(),
    }
}

/// Accumulated wall time for a named scope.
pub fn scope_total(name: &'static str) -> Duration {
    let totals = scope_totals().lock().unwrap_or_else(|err| err.into_inner());
    totals.get(name).copied().unwrap_or(Duration::ZERO)
}

pub struct ScopeGuard {
    name: &'static str,
    start: Instant,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let mut totals = scope_totals().lock().unwrap_or_else(|err| err.into_inner());
        *totals.entry(self.name).or_insert(Duration::ZERO) += elapsed;
    }
}
