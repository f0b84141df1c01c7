use crate::{KeyValueStore, StorageResult};
use doc_model::UsageCounters;

pub const USAGE_KEY: &str = "usage-stats";

/// Read the process-wide counters, creating the record on first access.
pub fn load_counters(store: &mut impl KeyValueStore) -> StorageResult<UsageCounters> {
    if let Some(json) = store.get(USAGE_KEY)? {
        match serde_json::from_str(&json) {
            Ok(counters) => return Ok(counters),
            Err(err) => tracing::warn!(%err, "usage counters unreadable, starting from zero"),
        }
    }

    let counters = UsageCounters::default();
    store.put(USAGE_KEY, &serde_json::to_string(&counters)?)?;
    Ok(counters)
}

/// Count one successful session save.
pub fn record_save(store: &mut impl KeyValueStore) -> StorageResult<UsageCounters> {
    let mut counters = load_counters(store)?;
    counters.saved_count = counters.saved_count.saturating_add(1);
    store.put(USAGE_KEY, &serde_json::to_string(&counters)?)?;
    Ok(counters)
}

pub fn reset_counters(store: &mut impl KeyValueStore) -> StorageResult<UsageCounters> {
    let counters = UsageCounters::default();
    store.put(USAGE_KEY, &serde_json::to_string(&counters)?)?;
    Ok(counters)
}
