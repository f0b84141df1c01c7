//! Session persistence with a debounced auto-save slot.
//!
//! A session is written as one JSON record keyed by its [`SessionKey`]. Mutations
//! re-arm a single pending save instead of writing immediately, so a burst of
//! edits produces one write of the latest snapshot once the quiet window passes.

use crate::{KeyValueStore, StorageError, StorageResult};
use doc_model::{Session, SessionKey};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutosaveConfig {
    /// Time without further mutations before the pending save becomes due.
    pub quiet_window: Duration,

    /// Upper bound on how long a continuously re-armed save may be deferred.
    /// `None` keeps deferring for as long as mutations keep arriving.
    pub max_delay: Option<Duration>,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self { quiet_window: Duration::from_secs(1), max_delay: None }
    }
}

impl AutosaveConfig {
    pub fn with_quiet_window(mut self, quiet_window: Duration) -> Self {
        self.quiet_window = quiet_window;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }
}

#[derive(Debug, Clone)]
struct PendingSave {
    key: SessionKey,
    snapshot: Session,
    first_scheduled_at: Instant,
    last_scheduled_at: Instant,
}

impl PendingSave {
    fn is_due(&self, config: &AutosaveConfig, now: Instant) -> bool {
        let quiet = now.saturating_duration_since(self.last_scheduled_at) >= config.quiet_window;
        let overdue = config
            .max_delay
            .is_some_and(|max| now.saturating_duration_since(self.first_scheduled_at) >= max);
        quiet || overdue
    }
}

#[derive(Debug)]
pub struct SessionStore<S> {
    backing: S,
    config: AutosaveConfig,
    pending: Option<PendingSave>,
}

impl<S: KeyValueStore> SessionStore<S> {
    pub fn new(backing: S) -> Self {
        Self::with_config(backing, AutosaveConfig::default())
    }

    pub fn with_config(backing: S, config: AutosaveConfig) -> Self {
        Self { backing, config, pending: None }
    }

    pub fn config(&self) -> &AutosaveConfig {
        &self.config
    }

    pub fn backing(&self) -> &S {
        &self.backing
    }

    pub fn backing_mut(&mut self) -> &mut S {
        &mut self.backing
    }

    /// Write `session` now. Backing-store rejections surface as
    /// [`StorageError::PersistenceUnavailable`].
    pub fn save(&mut self, key: &SessionKey, session: &Session) -> StorageResult<()> {
        let json = serde_json::to_string(session)?;
        self.backing.put(&key.record_key(), &json).map_err(|err| match err {
            StorageError::PersistenceUnavailable(_) => err,
            other => StorageError::PersistenceUnavailable(other.to_string()),
        })?;

        tracing::debug!(session = %key, measurements = session.measurements.len(), "session saved");
        Ok(())
    }

    pub fn load(&self, key: &SessionKey) -> StorageResult<Option<Session>> {
        let Some(json) = self.backing.get(&key.record_key())? else {
            return Ok(None);
        };

        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Load a session, or an empty one (no calibrations) when none was stored.
    pub fn load_or_default(&self, key: &SessionKey, default_unit: &str) -> StorageResult<Session> {
        Ok(self.load(key)?.unwrap_or_else(|| Session::new(default_unit)))
    }

    pub fn remove(&mut self, key: &SessionKey) -> StorageResult<()> {
        if self.pending.as_ref().is_some_and(|pending| &pending.key == key) {
            self.pending = None;
        }
        self.backing.remove(&key.record_key())
    }

    /// Arm (or re-arm) the pending save with the latest snapshot.
    pub fn schedule(&mut self, key: SessionKey, snapshot: Session, now: Instant) {
        let first_scheduled_at = match &self.pending {
            Some(pending) if pending.key == key => pending.first_scheduled_at,
            _ => now,
        };

        self.pending = Some(PendingSave { key, snapshot, first_scheduled_at, last_scheduled_at: now });
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// When the pending save becomes due if nothing re-arms it.
    pub fn pending_due_at(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| {
            let quiet_due = pending.last_scheduled_at + self.config.quiet_window;
            match self.config.max_delay {
                Some(max) => quiet_due.min(pending.first_scheduled_at + max),
                None => quiet_due,
            }
        })
    }

    /// Hand out the pending snapshot once its quiet window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<(SessionKey, Session)> {
        if !self.pending.as_ref().is_some_and(|pending| pending.is_due(&self.config, now)) {
            return None;
        }
        self.take_pending()
    }

    /// Hand out the pending snapshot regardless of timing.
    pub fn take_pending(&mut self) -> Option<(SessionKey, Session)> {
        self.pending.take().map(|pending| (pending.key, pending.snapshot))
    }

    pub fn cancel_pending(&mut self) {
        self.pending = None;
    }

    /// Write the pending snapshot immediately. Returns whether anything was written.
    pub fn flush(&mut self) -> StorageResult<bool> {
        let Some((key, snapshot)) = self.take_pending() else {
            return Ok(false);
        };

        self.save(&key, &snapshot)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileStore, MemoryStore};

    fn key() -> SessionKey {
        SessionKey::for_document("site.pdf", 4096)
    }

    fn session_with_unit(unit: &str) -> Session {
        Session::new(unit)
    }

    #[test]
    fn save_and_load_round_trip() {
        let mut store = SessionStore::new(MemoryStore::new());
        let mut session = Session::new("mm");
        session.page_names.insert(0, "Ground floor".to_owned());

        store.save(&key(), &session).expect("save should succeed");
        let loaded = store.load(&key()).expect("load should succeed");

        assert_eq!(loaded, Some(session));
    }

    #[test]
    fn absent_key_yields_empty_session() {
        let store = SessionStore::new(MemoryStore::new());

        assert_eq!(store.load(&key()).expect("load should succeed"), None);

        let session = store.load_or_default(&key(), "cm").expect("load should succeed");
        assert!(session.is_empty());
        assert_eq!(session.default_unit, "cm");
    }

    #[test]
    fn quota_rejection_is_persistence_unavailable() {
        let mut store = SessionStore::new(MemoryStore::with_quota(8));

        let err = store.save(&key(), &Session::default()).expect_err("write should be rejected");
        assert!(matches!(err, StorageError::PersistenceUnavailable(_)));
    }

    #[test]
    fn io_failures_are_reported_as_persistence_unavailable() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").expect("blocker file should be written");

        let mut store = SessionStore::new(FileStore::with_root(blocker.join("nested")));
        let err = store.save(&key(), &Session::default()).expect_err("write should fail");

        assert!(matches!(err, StorageError::PersistenceUnavailable(_)));
    }

    #[test]
    fn corrupt_record_is_a_serde_error() {
        let mut backing = MemoryStore::new();
        backing.put(&key().record_key(), "{not json").expect("put should succeed");
        let store = SessionStore::new(backing);

        assert!(matches!(store.load(&key()), Err(StorageError::Serde(_))));
    }

    #[test]
    fn pending_save_waits_for_quiet_window() {
        let mut store = SessionStore::new(MemoryStore::new());
        let start = Instant::now();

        store.schedule(key(), session_with_unit("m"), start);
        assert!(store.take_due(start + Duration::from_millis(999)).is_none());

        let (due_key, snapshot) =
            store.take_due(start + Duration::from_secs(1)).expect("save should be due");
        assert_eq!(due_key, key());
        assert_eq!(snapshot.default_unit, "m");
        assert!(!store.is_pending());
    }

    #[test]
    fn rescheduling_coalesces_to_latest_snapshot() {
        let mut store = SessionStore::new(MemoryStore::new());
        let start = Instant::now();

        store.schedule(key(), session_with_unit("m"), start);
        store.schedule(key(), session_with_unit("cm"), start + Duration::from_millis(600));
        store.schedule(key(), session_with_unit("mm"), start + Duration::from_millis(1200));

        assert!(store.take_due(start + Duration::from_millis(2000)).is_none());
        assert_eq!(store.pending_due_at(), Some(start + Duration::from_millis(2200)));

        let (_, snapshot) =
            store.take_due(start + Duration::from_millis(2200)).expect("save should be due");
        assert_eq!(snapshot.default_unit, "mm");
        assert!(store.take_due(start + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn max_delay_forces_a_due_save() {
        let config = AutosaveConfig::default().with_max_delay(Duration::from_millis(1500));
        let mut store = SessionStore::with_config(MemoryStore::new(), config);
        let start = Instant::now();

        for step in 0..4 {
            store.schedule(key(), Session::default(), start + Duration::from_millis(step * 500));
        }

        assert!(store.take_due(start + Duration::from_millis(1500)).is_some());
    }

    #[test]
    fn cancel_discards_pending_save() {
        let mut store = SessionStore::new(MemoryStore::new());
        let start = Instant::now();

        store.schedule(key(), Session::default(), start);
        store.cancel_pending();

        assert!(store.take_due(start + Duration::from_secs(5)).is_none());
        assert!(!store.flush().expect("flush should succeed"));
    }

    #[test]
    fn flush_writes_pending_snapshot() {
        let mut store = SessionStore::new(MemoryStore::new());

        store.schedule(key(), session_with_unit("ft"), Instant::now());
        assert!(store.flush().expect("flush should succeed"));

        let loaded = store.load(&key()).expect("load should succeed").expect("session stored");
        assert_eq!(loaded.default_unit, "ft");
        assert!(!store.is_pending());
    }

    #[test]
    fn remove_clears_record_and_matching_pending_save() {
        let mut store = SessionStore::new(MemoryStore::new());
        store.save(&key(), &Session::default()).expect("save should succeed");
        store.schedule(key(), Session::default(), Instant::now());

        store.remove(&key()).expect("remove should succeed");

        assert!(!store.is_pending());
        assert_eq!(store.load(&key()).expect("load should succeed"), None);
    }
}
