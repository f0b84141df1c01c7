//! Recently opened documents, most recent first.

use crate::{KeyValueStore, StorageResult};
use chrono::{DateTime, Utc};
use doc_model::{DocumentHistoryEntry, SessionKey};

pub const HISTORY_KEY: &str = "pdf-history";

pub const MAX_HISTORY_ENTRIES: usize = 10;

pub fn load_history(store: &impl KeyValueStore) -> StorageResult<Vec<DocumentHistoryEntry>> {
    let Some(json) = store.get(HISTORY_KEY)? else {
        return Ok(Vec::new());
    };

    Ok(serde_json::from_str(&json)?)
}

/// Move a document to the front of the history, creating its entry if needed.
///
/// The original upload time is kept for documents already in the list; the list
/// is capped at [`MAX_HISTORY_ENTRIES`].
pub fn record_document(
    store: &mut impl KeyValueStore,
    key: &SessionKey,
    name: &str,
    size_bytes: u64,
    measurement_count: usize,
    now: DateTime<Utc>,
) -> StorageResult<Vec<DocumentHistoryEntry>> {
    let mut entries = load_history(store)?;

    let uploaded_at = entries
        .iter()
        .find(|entry| &entry.id == key)
        .map_or(now, |entry| entry.uploaded_at);
    entries.retain(|entry| &entry.id != key);

    entries.insert(
        0,
        DocumentHistoryEntry {
            id: key.clone(),
            name: name.to_owned(),
            size_bytes,
            uploaded_at,
            last_accessed: now,
            measurement_count,
        },
    );
    entries.truncate(MAX_HISTORY_ENTRIES);

    store.put(HISTORY_KEY, &serde_json::to_string(&entries)?)?;
    Ok(entries)
}

pub fn remove_document(
    store: &mut impl KeyValueStore,
    key: &SessionKey,
) -> StorageResult<Vec<DocumentHistoryEntry>> {
    let mut entries = load_history(store)?;
    entries.retain(|entry| &entry.id != key);
    store.put(HISTORY_KEY, &serde_json::to_string(&entries)?)?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use chrono::Duration;

    #[test]
    fn empty_store_has_no_history() {
        let store = MemoryStore::new();
        assert!(load_history(&store).expect("load should succeed").is_empty());
    }

    #[test]
    fn reopening_moves_document_to_front_and_keeps_upload_time() {
        let mut store = MemoryStore::new();
        let first = SessionKey::for_document("a.pdf", 10);
        let second = SessionKey::for_document("b.pdf", 20);
        let t0 = Utc::now();

        record_document(&mut store, &first, "a.pdf", 10, 0, t0).expect("record should succeed");
        record_document(&mut store, &second, "b.pdf", 20, 0, t0 + Duration::seconds(1))
            .expect("record should succeed");
        let entries = record_document(&mut store, &first, "a.pdf", 10, 3, t0 + Duration::seconds(2))
            .expect("record should succeed");

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, first);
        assert_eq!(entries[0].uploaded_at, t0);
        assert_eq!(entries[0].last_accessed, t0 + Duration::seconds(2));
        assert_eq!(entries[0].measurement_count, 3);
        assert_eq!(load_history(&store).expect("load should succeed"), entries);
    }

    #[test]
    fn history_is_capped() {
        let mut store = MemoryStore::new();
        let now = Utc::now();

        for index in 0..(MAX_HISTORY_ENTRIES + 3) {
            let name = format!("doc-{index}.pdf");
            let key = SessionKey::for_document(&name, 1);
            record_document(&mut store, &key, &name, 1, 0, now).expect("record should succeed");
        }

        let entries = load_history(&store).expect("load should succeed");
        assert_eq!(entries.len(), MAX_HISTORY_ENTRIES);
        assert_eq!(entries[0].name, format!("doc-{}.pdf", MAX_HISTORY_ENTRIES + 2));
    }

    #[test]
    fn remove_document_drops_entry() {
        let mut store = MemoryStore::new();
        let key = SessionKey::for_document("a.pdf", 10);
        record_document(&mut store, &key, "a.pdf", 10, 0, Utc::now()).expect("record should succeed");

        let entries = remove_document(&mut store, &key).expect("remove should succeed");
        assert!(entries.is_empty());
    }
}
