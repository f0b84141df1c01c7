//! Takeoff core library
//!
//! Scale calibration, area and length measurement, overlay drawing and usage
//! gating for plan documents. [`Workspace`] ties the pieces together for one
//! open document.

pub mod calibration;
pub mod csv_export;
pub mod geometry;
pub mod measurement;
pub mod overlay;
pub mod usage;
pub mod workspace;

pub use calibration::{CalibrationError, CalibrationManager, CalibrationPhase};
pub use csv_export::{export_measurements_csv, measurements_to_csv_string, CsvExportConfig, CsvExportError};
pub use measurement::{Draft, MeasurementEngine, MeasurementError, PALETTE};
pub use overlay::{render, DraftOverlay, DrawInstruction, OverlayInput, OverlayStyle};
pub use usage::{GatingDecision, GatingReason, UsageLimits};
pub use workspace::{
    ClickOutcome, Mode, OpenOutcome, SaveOutcome, Workspace, WorkspaceConfig, WorkspaceError,
    WorkspaceResult,
};
