//! One open document and everything the user does to it
//!
//! [`Workspace`] is the single writer of a document's [`Session`]. UI events
//! arrive as `&mut self` calls; each one that changes the session re-arms the
//! debounced save and marks the overlay dirty. The host drives persistence with
//! [`Workspace::tick`] and repaints from [`Workspace::take_overlay`].
//!
//! Persistence failures are logged and swallowed: the in-memory session stays
//! authoritative and the next mutation schedules another attempt.

use chrono::Utc;
use doc_model::{
    CalibrationProfile, Color, DocumentHistoryEntry, MeasurementId, MeasurementKind, Point,
    Session, SessionKey, UsageCounters,
};
use pdf_engine::{DocumentRasterizer, LopdfEngine, Raster, RasterizeError, DEFAULT_RENDER_SCALE};
use std::time::Instant;
use storage::{AutosaveConfig, KeyValueStore, SessionStore};

use crate::calibration::{CalibrationError, CalibrationManager, CalibrationPhase};
use crate::measurement::{self, MeasurementEngine, MeasurementError};
use crate::overlay::{self, DraftOverlay, DrawInstruction, OverlayInput, OverlayStyle};
use crate::usage::{self, GatingDecision, UsageLimits};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Measurement(#[from] MeasurementError),

    #[error("failed to load document: {0}")]
    DocumentLoad(#[from] RasterizeError),

    #[error("no document is open")]
    NoDocument,
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceConfig {
    pub limits: UsageLimits,
    pub autosave: AutosaveConfig,
    /// Unit of sessions created for documents seen for the first time
    pub default_unit: String,
    /// Pixels per PDF point for the bundled rasterizer
    pub render_scale: f32,
    pub overlay: OverlayStyle,
    /// Whether opening a document updates the entitled document history
    pub record_history: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            limits: UsageLimits::default(),
            autosave: AutosaveConfig::default(),
            default_unit: doc_model::DEFAULT_UNIT.to_owned(),
            render_scale: DEFAULT_RENDER_SCALE,
            overlay: OverlayStyle::default(),
            record_history: true,
        }
    }
}

impl WorkspaceConfig {
    pub fn with_limits(mut self, limits: UsageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_autosave(mut self, autosave: AutosaveConfig) -> Self {
        self.autosave = autosave;
        self
    }

    pub fn with_default_unit(mut self, unit: impl Into<String>) -> Self {
        self.default_unit = unit.into();
        self
    }

    pub fn with_render_scale(mut self, render_scale: f32) -> Self {
        self.render_scale = render_scale;
        self
    }

    pub fn with_overlay(mut self, overlay: OverlayStyle) -> Self {
        self.overlay = overlay;
        self
    }

    /// Open documents without touching the document history
    pub fn without_history(mut self) -> Self {
        self.record_history = false;
        self
    }
}

/// What pointer clicks on the page currently do
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Idle,
    Calibrating(CalibrationManager),
    Drafting(MeasurementEngine),
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Calibrating(_) => "calibrating",
            Mode::Drafting(_) => "drafting",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    Opened {
        key: SessionKey,
        page_count: u32,
        restored_measurements: usize,
    },
    /// The document was refused before parsing; nothing changed
    Gated(GatingDecision),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    Ignored,
    ReferencePoint(CalibrationPhase),
    DraftPoint(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved { saved_count: u32 },
    Gated(GatingDecision),
    Failed(String),
}

struct OpenDocument {
    key: SessionKey,
    name: String,
    bytes: Vec<u8>,
    page_count: u32,
    raster: Raster,
}

pub struct Workspace<S: KeyValueStore> {
    config: WorkspaceConfig,
    store: SessionStore<S>,
    rasterizer: Box<dyn DocumentRasterizer>,
    document: Option<OpenDocument>,
    session: Session,
    page_index: u32,
    mode: Mode,
    entitled: bool,
    overlay_dirty: bool,
}

impl<S: KeyValueStore> Workspace<S> {
    /// Workspace rasterizing with the bundled lopdf backend
    pub fn new(backing: S, config: WorkspaceConfig) -> Self {
        let rasterizer = LopdfEngine::new().with_render_scale(config.render_scale);
        Self::with_rasterizer(backing, Box::new(rasterizer), config)
    }

    pub fn with_rasterizer(
        backing: S,
        rasterizer: Box<dyn DocumentRasterizer>,
        config: WorkspaceConfig,
    ) -> Self {
        Self {
            store: SessionStore::with_config(backing, config.autosave.clone()),
            session: Session::new(config.default_unit.clone()),
            config,
            rasterizer,
            document: None,
            page_index: 0,
            mode: Mode::Idle,
            entitled: false,
            overlay_dirty: false,
        }
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    pub fn page_count(&self) -> u32 {
        self.document.as_ref().map_or(0, |doc| doc.page_count)
    }

    pub fn document_key(&self) -> Option<&SessionKey> {
        self.document.as_ref().map(|doc| &doc.key)
    }

    pub fn document_name(&self) -> Option<&str> {
        self.document.as_ref().map(|doc| doc.name.as_str())
    }

    pub fn raster(&self) -> Option<&Raster> {
        self.document.as_ref().map(|doc| &doc.raster)
    }

    pub fn store(&self) -> &SessionStore<S> {
        &self.store
    }

    pub fn is_entitled(&self) -> bool {
        self.entitled
    }

    /// Unlock every gated feature for the rest of the process. Idempotent.
    pub fn grant_entitlement(&mut self) {
        if !self.entitled {
            tracing::info!("entitlement granted");
        }
        self.entitled = true;
    }

    /// Open a document and restore its session
    ///
    /// Oversized files are refused with a gating decision before anything is
    /// parsed. A document that fails to rasterize leaves the current document
    /// and session untouched. Any pending save of the previous document is
    /// written first.
    pub fn open_document(&mut self, name: &str, bytes: Vec<u8>) -> WorkspaceResult<OpenOutcome> {
        let size_bytes = bytes.len() as u64;
        let decision = usage::upload_decision(size_bytes, &self.config.limits, self.entitled);
        if !decision.allowed {
            tracing::info!(name, size_bytes, "document refused by file size limit");
            return Ok(OpenOutcome::Gated(decision));
        }

        let info = self.rasterizer.inspect(&bytes)?;
        let raster = self.rasterizer.rasterize(&bytes, 0)?;

        self.flush();

        let key = SessionKey::for_document(name, size_bytes);
        let session = match self.store.load(&key) {
            Ok(Some(session)) => session,
            Ok(None) => Session::new(self.config.default_unit.clone()),
            Err(err) => {
                tracing::warn!(session = %key, %err, "stored session unreadable, starting fresh");
                Session::new(self.config.default_unit.clone())
            }
        };
        let restored_measurements = session.measurements.len();

        if self.config.record_history && usage::history_decision(self.entitled).allowed {
            let recorded = storage::record_document(
                self.store.backing_mut(),
                &key,
                name,
                size_bytes,
                restored_measurements,
                Utc::now(),
            );
            if let Err(err) = recorded {
                tracing::warn!(%err, "could not update document history");
            }
        }

        tracing::info!(
            session = %key,
            page_count = info.page_count(),
            restored_measurements,
            "document opened"
        );

        let page_count = info.page_count();
        self.document = Some(OpenDocument {
            key: key.clone(),
            name: name.to_owned(),
            bytes,
            page_count,
            raster,
        });
        self.session = session;
        self.page_index = 0;
        self.mode = Mode::Idle;
        self.overlay_dirty = true;

        Ok(OpenOutcome::Opened {
            key,
            page_count,
            restored_measurements,
        })
    }

    /// Switch to another page, abandoning any calibration or draft in progress
    pub fn go_to_page(&mut self, page_index: u32) -> WorkspaceResult<()> {
        let doc = self.document.as_ref().ok_or(WorkspaceError::NoDocument)?;
        let raster = self.rasterizer.rasterize(&doc.bytes, page_index)?;
        self.replace_raster(raster);
        self.page_index = page_index;
        self.mode = Mode::Idle;
        Ok(())
    }

    /// Install a freshly rasterized page image
    pub fn replace_raster(&mut self, raster: Raster) {
        if let Some(doc) = self.document.as_mut() {
            doc.raster = raster;
            self.overlay_dirty = true;
        }
    }

    /// Route a click on the page to the active mode
    pub fn pointer_click(&mut self, point: Point) -> WorkspaceResult<ClickOutcome> {
        let outcome = match &mut self.mode {
            Mode::Idle => return Ok(ClickOutcome::Ignored),
            Mode::Calibrating(manager) => ClickOutcome::ReferencePoint(manager.add_reference_point(point)?),
            Mode::Drafting(engine) => ClickOutcome::DraftPoint(engine.add_point(point)?),
        };
        self.overlay_dirty = true;
        Ok(outcome)
    }

    pub fn start_calibration(&mut self, unit: Option<&str>) -> WorkspaceResult<()> {
        self.require_document()?;
        let unit = unit.map_or_else(|| self.session.unit_for_page(self.page_index).to_owned(), str::to_owned);

        let mut manager = CalibrationManager::new();
        manager.start(self.page_index, unit);
        self.mode = Mode::Calibrating(manager);
        self.overlay_dirty = true;
        Ok(())
    }

    pub fn set_calibration_unit(&mut self, unit: &str) -> WorkspaceResult<()> {
        self.calibration_mut("change unit")?.set_unit(unit)?;
        Ok(())
    }

    pub fn set_real_distance(&mut self, distance: f64) -> WorkspaceResult<()> {
        self.calibration_mut("set the real distance")?.set_real_distance(distance)?;
        Ok(())
    }

    /// Finish the calibration and make it the page's active profile
    ///
    /// Measurements already stored keep their values.
    pub fn complete_calibration(&mut self) -> WorkspaceResult<CalibrationProfile> {
        let profile = self.calibration_mut("complete calibration")?.complete()?;
        self.session.calibrations.insert(profile.page_index, profile.clone());
        self.mode = Mode::Idle;
        self.touch();
        Ok(profile)
    }

    pub fn cancel_calibration(&mut self) -> WorkspaceResult<()> {
        self.calibration_mut("cancel")?.cancel()?;
        self.mode = Mode::Idle;
        self.overlay_dirty = true;
        Ok(())
    }

    /// Start drawing a measurement of `kind`
    ///
    /// Returns the gating decision; when it is not allowed the mode is left as
    /// it was.
    pub fn begin_draft(&mut self, kind: MeasurementKind) -> WorkspaceResult<GatingDecision> {
        self.require_document()?;
        let decision = usage::draft_decision(
            kind,
            self.session.measurements.len(),
            &self.config.limits,
            self.entitled,
        );
        if !decision.allowed {
            return Ok(decision);
        }

        match &mut self.mode {
            Mode::Drafting(engine) => engine.begin_draft(kind),
            _ => {
                let mut engine = MeasurementEngine::new();
                engine.begin_draft(kind);
                self.mode = Mode::Drafting(engine);
            }
        }
        self.overlay_dirty = true;
        Ok(decision)
    }

    pub fn complete_draft(&mut self, name: Option<String>, color: Option<Color>) -> WorkspaceResult<MeasurementId> {
        let Mode::Drafting(engine) = &mut self.mode else {
            return Err(MeasurementError::NoActiveDraft.into());
        };
        let id = engine.complete_draft(&mut self.session, self.page_index, name, color)?;
        self.mode = Mode::Idle;
        self.touch();
        Ok(id)
    }

    pub fn cancel_draft(&mut self) -> bool {
        if !matches!(self.mode, Mode::Drafting(_)) {
            return false;
        }
        self.mode = Mode::Idle;
        self.overlay_dirty = true;
        true
    }

    pub fn rename(&mut self, id: MeasurementId, name: &str) -> bool {
        let changed = measurement::rename(&mut self.session, id, name);
        self.touch_if(changed)
    }

    pub fn recolor(&mut self, id: MeasurementId, color: Color) -> bool {
        let changed = measurement::recolor(&mut self.session, id, color);
        self.touch_if(changed)
    }

    pub fn move_label(&mut self, id: MeasurementId, position: Point) -> bool {
        let changed = measurement::move_label(&mut self.session, id, position);
        self.touch_if(changed)
    }

    pub fn delete(&mut self, id: MeasurementId) -> bool {
        let changed = measurement::delete(&mut self.session, id);
        self.touch_if(changed)
    }

    pub fn clear_page(&mut self, page_index: u32) -> usize {
        let removed = measurement::clear_page(&mut self.session, page_index);
        self.touch_if(removed > 0);
        removed
    }

    pub fn clear_all(&mut self) -> usize {
        let removed = measurement::clear_all(&mut self.session);
        self.touch_if(removed > 0);
        removed
    }

    /// Name a page; an empty name removes it
    pub fn rename_page(&mut self, page_index: u32, name: &str) -> bool {
        let name = name.trim();
        let changed = if name.is_empty() {
            self.session.page_names.remove(&page_index).is_some()
        } else {
            self.session.page_names.insert(page_index, name.to_owned()).as_deref() != Some(name)
        };
        self.touch_if(changed)
    }

    /// Unit for measurements on pages without a calibration
    pub fn set_default_unit(&mut self, unit: &str) -> bool {
        let changed = self.session.default_unit != unit;
        if changed {
            self.session.default_unit = unit.to_owned();
        }
        self.touch_if(changed)
    }

    pub fn usage_counters(&mut self) -> UsageCounters {
        storage::load_counters(self.store.backing_mut()).unwrap_or_else(|err| {
            tracing::warn!(%err, "usage counters unavailable");
            UsageCounters::default()
        })
    }

    pub fn save_decision(&mut self) -> GatingDecision {
        let counters = self.usage_counters();
        usage::save_decision(&counters, &self.config.limits, self.entitled)
    }

    pub fn history(&self) -> Vec<DocumentHistoryEntry> {
        storage::load_history(self.store.backing()).unwrap_or_else(|err| {
            tracing::warn!(%err, "document history unreadable");
            Vec::new()
        })
    }

    /// Write the pending save if its quiet window has elapsed
    pub fn tick(&mut self, now: Instant) -> Option<SaveOutcome> {
        let (key, snapshot) = self.store.take_due(now)?;
        Some(self.persist(&key, &snapshot))
    }

    /// Write the pending save now, if there is one
    pub fn flush(&mut self) -> Option<SaveOutcome> {
        let (key, snapshot) = self.store.take_pending()?;
        Some(self.persist(&key, &snapshot))
    }

    /// Full draw list for the current page; empty without a document
    pub fn render(&self) -> Vec<DrawInstruction> {
        let Some(doc) = &self.document else {
            return Vec::new();
        };

        let page_index = self.page_index;
        let unit = self.session.unit_for_page(page_index);
        let (draft, calibration_points) = match &self.mode {
            Mode::Idle => (None, &[][..]),
            Mode::Calibrating(manager) if manager.is_in_progress() => (None, manager.reference_points()),
            Mode::Calibrating(_) => (None, &[][..]),
            Mode::Drafting(engine) => {
                let draft = engine.draft().map(|draft| DraftOverlay {
                    kind: draft.kind,
                    points: &draft.points,
                    value: engine.draft_value(&self.session, page_index).unwrap_or_default(),
                    unit,
                });
                (draft, &[][..])
            }
        };

        let input = OverlayInput {
            raster: &doc.raster,
            measurements: self.session.measurements_for_page(page_index).collect(),
            draft,
            calibration_points,
        };
        overlay::render(&input, &self.config.overlay)
    }

    /// The draw list, if anything changed since it was last taken
    pub fn take_overlay(&mut self) -> Option<Vec<DrawInstruction>> {
        if !self.overlay_dirty {
            return None;
        }
        self.overlay_dirty = false;
        Some(self.render())
    }

    fn persist(&mut self, key: &SessionKey, snapshot: &Session) -> SaveOutcome {
        let decision = self.save_decision();
        if !decision.allowed {
            tracing::info!(session = %key, "save refused by storage limit");
            return SaveOutcome::Gated(decision);
        }

        if let Err(err) = self.store.save(key, snapshot) {
            tracing::warn!(session = %key, %err, "session not saved");
            return SaveOutcome::Failed(err.to_string());
        }

        match storage::record_save(self.store.backing_mut()) {
            Ok(counters) => SaveOutcome::Saved {
                saved_count: counters.saved_count,
            },
            Err(err) => {
                tracing::warn!(%err, "session saved but usage counter not updated");
                SaveOutcome::Saved {
                    saved_count: self.usage_counters().saved_count,
                }
            }
        }
    }

    fn require_document(&self) -> WorkspaceResult<()> {
        match self.document {
            Some(_) => Ok(()),
            None => Err(WorkspaceError::NoDocument),
        }
    }

    fn calibration_mut(&mut self, action: &'static str) -> WorkspaceResult<&mut CalibrationManager> {
        match &mut self.mode {
            Mode::Calibrating(manager) => Ok(manager),
            _ => Err(CalibrationError::InvalidState {
                action,
                phase: CalibrationPhase::Idle,
            }
            .into()),
        }
    }

    fn touch_if(&mut self, changed: bool) -> bool {
        if changed {
            self.touch();
        }
        changed
    }

    fn touch(&mut self) {
        self.overlay_dirty = true;
        if let Some(doc) = &self.document {
            self.store.schedule(doc.key.clone(), self.session.clone(), Instant::now());
        }
    }
}
