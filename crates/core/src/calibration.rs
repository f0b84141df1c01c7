//! Two-point scale calibration
//!
//! The user clicks two reference points on the page and declares the real-world
//! distance between them. The ratio of that distance to the pixel distance is the
//! page's scale factor (real-world units per pixel).
//!
//! ```text
//! Idle ─start─▶ CollectingPoints(0) ─point─▶ CollectingPoints(1) ─point─▶ AwaitingDistance
//!                     ▲                                                      │ complete
//!                     └───────────────────────── start ◀── Complete ◀────────┘
//! ```
//!
//! `cancel` returns any non-idle state to `Idle` without touching profiles that
//! were already emitted.

use chrono::Utc;
use doc_model::{CalibrationProfile, Point};

use crate::geometry;

/// Validation failures while calibrating. State is unchanged when one is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    #[error("real distance must be a positive number, got {0}")]
    InvalidDistance(f64),

    #[error("reference points coincide; pick two distinct points")]
    DegenerateReference,

    #[error("enter the real distance between the reference points first")]
    MissingDistance,

    #[error("cannot {action} while {phase:?}")]
    InvalidState {
        action: &'static str,
        phase: CalibrationPhase,
    },
}

/// Externally visible calibration phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    Idle,
    /// Waiting for reference point number `n + 1` (`n` already collected)
    CollectingPoints(u8),
    AwaitingDistance,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
enum CalibrationState {
    Idle,
    CollectingPoints(Vec<Point>),
    AwaitingDistance {
        points: [Point; 2],
        real_distance: Option<f64>,
    },
    Complete(CalibrationProfile),
}

/// State machine turning two clicks and a distance into a [`CalibrationProfile`]
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationManager {
    state: CalibrationState,
    page_index: u32,
    unit: String,
}

impl CalibrationManager {
    /// Create an idle manager
    pub fn new() -> Self {
        Self {
            state: CalibrationState::Idle,
            page_index: 0,
            unit: doc_model::DEFAULT_UNIT.to_owned(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> CalibrationPhase {
        match &self.state {
            CalibrationState::Idle => CalibrationPhase::Idle,
            CalibrationState::CollectingPoints(points) => {
                CalibrationPhase::CollectingPoints(points.len() as u8)
            }
            CalibrationState::AwaitingDistance { .. } => CalibrationPhase::AwaitingDistance,
            CalibrationState::Complete(_) => CalibrationPhase::Complete,
        }
    }

    /// Whether reference points or a distance are still being collected
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self.state,
            CalibrationState::CollectingPoints(_) | CalibrationState::AwaitingDistance { .. }
        )
    }

    /// Page the calibration applies to
    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    /// Unit the real distance is expressed in
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Reference points collected so far (zero, one or two)
    pub fn reference_points(&self) -> &[Point] {
        match &self.state {
            CalibrationState::CollectingPoints(points) => points.as_slice(),
            CalibrationState::AwaitingDistance { points, .. } => &points[..],
            CalibrationState::Complete(profile) => &profile.reference_points[..],
            CalibrationState::Idle => &[],
        }
    }

    /// Distance entered so far, if any
    pub fn real_distance(&self) -> Option<f64> {
        match &self.state {
            CalibrationState::AwaitingDistance { real_distance, .. } => *real_distance,
            CalibrationState::Complete(profile) => Some(profile.real_distance),
            _ => None,
        }
    }

    /// The profile emitted by the last completion, while in `Complete`
    pub fn completed_profile(&self) -> Option<&CalibrationProfile> {
        match &self.state {
            CalibrationState::Complete(profile) => Some(profile),
            _ => None,
        }
    }

    /// Begin a new calibration for a page
    ///
    /// Any calibration in progress is discarded. Profiles already emitted stay
    /// wherever the caller stored them until a new one replaces them.
    pub fn start(&mut self, page_index: u32, unit: impl Into<String>) {
        self.page_index = page_index;
        self.unit = unit.into();
        self.state = CalibrationState::CollectingPoints(Vec::with_capacity(2));
        tracing::debug!(page_index, unit = %self.unit, "calibration started");
    }

    /// Change the unit of the in-progress calibration
    pub fn set_unit(&mut self, unit: impl Into<String>) -> Result<(), CalibrationError> {
        if !self.is_in_progress() {
            return Err(self.invalid("change unit"));
        }
        self.unit = unit.into();
        Ok(())
    }

    /// Record a reference point; the second one advances to `AwaitingDistance`
    pub fn add_reference_point(&mut self, point: Point) -> Result<CalibrationPhase, CalibrationError> {
        if !matches!(self.state, CalibrationState::CollectingPoints(_)) {
            return Err(self.invalid("add a reference point"));
        }

        let pair = match &mut self.state {
            CalibrationState::CollectingPoints(points) => {
                points.push(point);
                match points.as_slice() {
                    [first, second] => Some([*first, *second]),
                    _ => None,
                }
            }
            _ => None,
        };

        if let Some(points) = pair {
            self.state = CalibrationState::AwaitingDistance {
                points,
                real_distance: None,
            };
        }
        Ok(self.phase())
    }

    /// Declare the real-world distance between the two reference points
    pub fn set_real_distance(&mut self, distance: f64) -> Result<(), CalibrationError> {
        if !matches!(self.state, CalibrationState::AwaitingDistance { .. }) {
            return Err(self.invalid("set the real distance"));
        }
        if !distance.is_finite() || distance <= 0.0 {
            return Err(CalibrationError::InvalidDistance(distance));
        }

        if let CalibrationState::AwaitingDistance { real_distance, .. } = &mut self.state {
            *real_distance = Some(distance);
        }
        Ok(())
    }

    /// Compute the scale factor and emit a profile for the current page
    pub fn complete(&mut self) -> Result<CalibrationProfile, CalibrationError> {
        let CalibrationState::AwaitingDistance {
            points,
            real_distance,
        } = &self.state
        else {
            return Err(self.invalid("complete calibration"));
        };
        let real_distance = real_distance.ok_or(CalibrationError::MissingDistance)?;

        let pixel_distance = geometry::distance(&points[0], &points[1]);
        if pixel_distance == 0.0 {
            return Err(CalibrationError::DegenerateReference);
        }

        let profile = CalibrationProfile {
            page_index: self.page_index,
            reference_points: *points,
            real_distance,
            scale_factor: real_distance / pixel_distance,
            unit: self.unit.clone(),
            created_at: Utc::now(),
        };

        tracing::debug!(
            page_index = profile.page_index,
            scale_factor = profile.scale_factor,
            unit = %profile.unit,
            "calibration complete"
        );
        self.state = CalibrationState::Complete(profile.clone());
        Ok(profile)
    }

    /// Abandon the calibration and return to `Idle`
    pub fn cancel(&mut self) -> Result<(), CalibrationError> {
        if matches!(self.state, CalibrationState::Idle) {
            return Err(self.invalid("cancel"));
        }
        self.state = CalibrationState::Idle;
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> CalibrationError {
        CalibrationError::InvalidState {
            action,
            phase: self.phase(),
        }
    }
}

impl Default for CalibrationManager {
    fn default() -> Self {
        Self::new()
    }
}
