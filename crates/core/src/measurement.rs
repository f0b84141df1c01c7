//! Draft accumulation and scale-aware measurement values
//!
//! A [`MeasurementEngine`] holds the single in-progress draft. Completing it turns
//! the clicked pixel points into a [`Measurement`] whose value is converted with
//! the page's calibration and frozen at that moment. Edits to stored
//! measurements are free functions over the [`Session`] that owns them.

use chrono::Utc;
use doc_model::{Color, Measurement, MeasurementId, MeasurementKind, Point, Session};

use crate::geometry;

/// Colours assigned to new measurements, cycled by measurement count
pub const PALETTE: [Color; 8] = [
    Color::rgb(0x22, 0xc5, 0x5e),
    Color::rgb(0x3b, 0x82, 0xf6),
    Color::rgb(0xf5, 0x9e, 0x0b),
    Color::rgb(0xef, 0x44, 0x44),
    Color::rgb(0x8b, 0x5c, 0xf6),
    Color::rgb(0x06, 0xb6, 0xd4),
    Color::rgb(0xf9, 0x73, 0x16),
    Color::rgb(0x84, 0xcc, 0x16),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeasurementError {
    #[error("a {kind:?} needs at least {required} points, got {actual}")]
    InsufficientPoints {
        kind: MeasurementKind,
        required: usize,
        actual: usize,
    },

    #[error("no measurement is being drawn")]
    NoActiveDraft,
}

/// Points clicked so far for a measurement that has not been completed
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub kind: MeasurementKind,
    pub points: Vec<Point>,
}

impl Draft {
    pub fn new(kind: MeasurementKind) -> Self {
        Self {
            kind,
            points: Vec::new(),
        }
    }

    /// Value in pixel units: area for polygons, length for polylines
    pub fn pixel_value(&self) -> f64 {
        pixel_value(self.kind, &self.points)
    }

    /// Whether enough points exist to complete the draft
    pub fn is_completable(&self) -> bool {
        self.points.len() >= self.kind.min_points()
    }
}

/// Owner of the in-progress draft
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementEngine {
    draft: Option<Draft>,
}

impl MeasurementEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new draft, discarding any points of the previous one
    pub fn begin_draft(&mut self, kind: MeasurementKind) {
        if let Some(previous) = &self.draft {
            if !previous.points.is_empty() {
                tracing::debug!(
                    kind = previous.kind.as_str(),
                    points = previous.points.len(),
                    "discarding unfinished draft"
                );
            }
        }
        self.draft = Some(Draft::new(kind));
    }

    /// Append a point to the draft. Both kinds accept any number of points.
    pub fn add_point(&mut self, point: Point) -> Result<usize, MeasurementError> {
        let draft = self.draft.as_mut().ok_or(MeasurementError::NoActiveDraft)?;
        draft.points.push(point);
        Ok(draft.points.len())
    }

    pub fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    pub fn draft_kind(&self) -> Option<MeasurementKind> {
        self.draft.as_ref().map(|draft| draft.kind)
    }

    /// Live value of the draft in the page's real-world units, rounded
    pub fn draft_value(&self, session: &Session, page_index: u32) -> Option<f64> {
        self.draft.as_ref().map(|draft| {
            real_value(draft.kind, draft.pixel_value(), session.scale_factor(page_index))
        })
    }

    /// Turn the draft into a stored measurement on `page_index`
    ///
    /// The value uses the scale factor of the page's calibration at this moment
    /// (or `1.0` when the page is uncalibrated). On failure the draft is kept so
    /// more points can be added.
    pub fn complete_draft(
        &mut self,
        session: &mut Session,
        page_index: u32,
        name: Option<String>,
        color: Option<Color>,
    ) -> Result<MeasurementId, MeasurementError> {
        let draft = self.draft.as_ref().ok_or(MeasurementError::NoActiveDraft)?;
        if !draft.is_completable() {
            return Err(MeasurementError::InsufficientPoints {
                kind: draft.kind,
                required: draft.kind.min_points(),
                actual: draft.points.len(),
            });
        }

        let count = session.measurements.len();
        let value = real_value(draft.kind, draft.pixel_value(), session.scale_factor(page_index));
        let measurement = Measurement {
            id: uuid::Uuid::new_v4(),
            name: name.unwrap_or_else(|| format!("Measurement {}", count + 1)),
            kind: draft.kind,
            points: draft.points.clone(),
            value,
            unit: session.unit_for_page(page_index).to_owned(),
            color: color.unwrap_or(PALETTE[count % PALETTE.len()]),
            label_position: None,
            page_index,
            created_at: Utc::now(),
        };

        let id = measurement.id;
        tracing::debug!(
            %id,
            kind = measurement.kind.as_str(),
            value = measurement.value,
            unit = %measurement.unit,
            page_index,
            "measurement completed"
        );
        session.measurements.push(measurement);
        self.draft = None;
        Ok(id)
    }

    /// Drop the draft. Returns whether one existed.
    pub fn cancel_draft(&mut self) -> bool {
        self.draft.take().is_some()
    }
}

/// Pixel-space value of a shape: enclosed area or path length
pub fn pixel_value(kind: MeasurementKind, points: &[Point]) -> f64 {
    match kind {
        MeasurementKind::Polygon => geometry::polygon_area(points),
        MeasurementKind::Polyline => geometry::polyline_length(points),
    }
}

/// Convert a pixel value to real-world units, rounded to two decimals
pub fn real_value(kind: MeasurementKind, pixel_value: f64, scale_factor: f64) -> f64 {
    let converted = match kind {
        MeasurementKind::Polygon => pixel_value * scale_factor * scale_factor,
        MeasurementKind::Polyline => pixel_value * scale_factor,
    };
    geometry::round2(converted)
}

pub fn rename(session: &mut Session, id: MeasurementId, name: impl Into<String>) -> bool {
    let Some(measurement) = session.measurement_mut(id) else {
        return false;
    };
    let name = name.into();
    if measurement.name == name {
        return false;
    }
    measurement.name = name;
    true
}

pub fn recolor(session: &mut Session, id: MeasurementId, color: Color) -> bool {
    let Some(measurement) = session.measurement_mut(id) else {
        return false;
    };
    if measurement.color == color {
        return false;
    }
    measurement.color = color;
    true
}

/// Pin the label of a measurement to `position` (page pixels)
pub fn move_label(session: &mut Session, id: MeasurementId, position: Point) -> bool {
    let Some(measurement) = session.measurement_mut(id) else {
        return false;
    };
    if measurement.label_position == Some(position) {
        return false;
    }
    measurement.label_position = Some(position);
    true
}

pub fn delete(session: &mut Session, id: MeasurementId) -> bool {
    let before = session.measurements.len();
    session.measurements.retain(|measurement| measurement.id != id);
    session.measurements.len() != before
}

/// Remove every measurement on one page. Returns how many were removed.
pub fn clear_page(session: &mut Session, page_index: u32) -> usize {
    let before = session.measurements.len();
    session.measurements.retain(|measurement| measurement.page_index != page_index);
    before - session.measurements.len()
}

pub fn clear_all(session: &mut Session) -> usize {
    let removed = session.measurements.len();
    session.measurements.clear();
    removed
}

/// Sum of stored values of one kind on a page
pub fn page_total(session: &Session, page_index: u32, kind: MeasurementKind) -> f64 {
    let total: f64 = session
        .measurements_for_page(page_index)
        .filter(|measurement| measurement.kind == kind)
        .map(|measurement| measurement.value)
        .sum();
    geometry::round2(total)
}
