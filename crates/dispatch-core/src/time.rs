use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock instant in milliseconds since the Unix epoch. Every timestamp
/// in the dispatch model (samples, transitions, events) uses this unit.
pub type EpochMillis = u64;

pub fn now_epoch_millis() -> EpochMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as EpochMillis)
        .unwrap_or_default()
}

/// Milliseconds from `earlier` to `later`, zero when the clock went backwards.
pub fn age_millis(earlier: EpochMillis, later: EpochMillis) -> u64 {
    later.saturating_sub(earlier)
}
