//! Overlay draw list
//!
//! [`render`] is a pure projection of the page raster, the stored measurements,
//! the active draft and any in-progress calibration onto an ordered list of
//! [`DrawInstruction`]s. Callers re-run it in full on every state change and
//! paint the list front to back; nothing here keeps state between frames.

use doc_model::{Color, Measurement, MeasurementKind, Point};
use pdf_engine::Raster;
use serde::Serialize;

use crate::geometry;

/// A single drawing primitive in page-pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum DrawInstruction {
    /// Clear the whole surface before drawing
    Clear { width: u32, height: u32 },

    /// Blit the page raster at the origin
    Raster { width: u32, height: u32 },

    /// Closed outline with optional fill
    #[serde(rename_all = "camelCase")]
    Polygon {
        points: Vec<Point>,
        fill: Option<Color>,
        stroke: Color,
        stroke_width: f32,
    },

    /// Open path
    #[serde(rename_all = "camelCase")]
    Polyline {
        points: Vec<Point>,
        stroke: Color,
        stroke_width: f32,
    },

    /// Line segment
    Line {
        start: Point,
        end: Point,
        color: Color,
        width: f32,
    },

    /// Filled circle with an optional centred label (point numbers)
    Marker {
        center: Point,
        radius: f32,
        fill: Color,
        label: Option<String>,
    },

    /// Text centred on `position`
    Text {
        position: Point,
        text: String,
        size: f32,
        fill: Color,
        outline: Option<Color>,
    },
}

/// Visual parameters of the overlay
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStyle {
    pub stroke_width: f32,
    pub marker_radius: f32,
    pub title_size: f32,
    pub value_size: f32,
    pub text_color: Color,
    pub text_outline: Color,
    /// Alpha applied to a measurement's colour for polygon fills
    pub fill_alpha: u8,
    pub draft_polygon_color: Color,
    pub draft_polyline_color: Color,
    pub calibration_color: Color,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            stroke_width: 3.0,
            marker_radius: 8.0,
            title_size: 16.0,
            value_size: 14.0,
            text_color: Color::WHITE,
            text_outline: Color::BLACK,
            fill_alpha: 0x40,
            draft_polygon_color: Color::rgb(0x10, 0xb9, 0x81),
            draft_polyline_color: Color::rgb(0x3b, 0x82, 0xf6),
            calibration_color: Color::rgb(0xef, 0x44, 0x44),
        }
    }
}

impl OverlayStyle {
    pub fn with_stroke_width(mut self, stroke_width: f32) -> Self {
        self.stroke_width = stroke_width;
        self
    }

    pub fn with_marker_radius(mut self, marker_radius: f32) -> Self {
        self.marker_radius = marker_radius;
        self
    }

    pub fn with_fill_alpha(mut self, fill_alpha: u8) -> Self {
        self.fill_alpha = fill_alpha;
        self
    }
}

/// The draft being drawn, with its live value already converted
#[derive(Debug, Clone, PartialEq)]
pub struct DraftOverlay<'a> {
    pub kind: MeasurementKind,
    pub points: &'a [Point],
    pub value: f64,
    pub unit: &'a str,
}

/// Everything one frame of the overlay is derived from
#[derive(Debug, Clone)]
pub struct OverlayInput<'a> {
    pub raster: &'a Raster,
    /// Completed measurements of the current page, in creation order
    pub measurements: Vec<&'a Measurement>,
    pub draft: Option<DraftOverlay<'a>>,
    /// Reference points of a calibration in progress (zero to two)
    pub calibration_points: &'a [Point],
}

const POLYLINE_LABEL_LIFT: f64 = 20.0;
const DRAFT_LABEL_LIFT: f64 = 10.0;

/// Build the draw list for one frame
///
/// Z-order: clear and raster, then completed measurements, then calibration
/// markers, then the draft.
pub fn render(input: &OverlayInput<'_>, style: &OverlayStyle) -> Vec<DrawInstruction> {
    let raster = input.raster;
    let mut out = vec![
        DrawInstruction::Clear {
            width: raster.width,
            height: raster.height,
        },
        DrawInstruction::Raster {
            width: raster.width,
            height: raster.height,
        },
    ];

    for measurement in &input.measurements {
        push_measurement(&mut out, measurement, style);
    }

    push_calibration(&mut out, input.calibration_points, style);

    if let Some(draft) = &input.draft {
        push_draft(&mut out, draft, style);
    }

    out
}

/// Where a measurement's label is drawn when the user has not moved it
pub fn default_label_position(kind: MeasurementKind, points: &[Point]) -> Option<Point> {
    match kind {
        MeasurementKind::Polygon => geometry::centroid(points),
        MeasurementKind::Polyline => {
            geometry::middle_vertex(points).map(|p| p.offset(0.0, -POLYLINE_LABEL_LIFT))
        }
    }
}

fn push_measurement(out: &mut Vec<DrawInstruction>, measurement: &Measurement, style: &OverlayStyle) {
    match measurement.kind {
        MeasurementKind::Polygon => out.push(DrawInstruction::Polygon {
            points: measurement.points.clone(),
            fill: Some(measurement.color.with_alpha(style.fill_alpha)),
            stroke: measurement.color,
            stroke_width: style.stroke_width,
        }),
        MeasurementKind::Polyline => out.push(DrawInstruction::Polyline {
            points: measurement.points.clone(),
            stroke: measurement.color,
            stroke_width: style.stroke_width,
        }),
    }

    let anchor = measurement
        .label_position
        .or_else(|| default_label_position(measurement.kind, &measurement.points));
    let Some(anchor) = anchor else {
        return;
    };

    let value_offset = match measurement.kind {
        MeasurementKind::Polygon => 25.0,
        MeasurementKind::Polyline => 20.0,
    };
    out.push(label(anchor, measurement.name.clone(), style.title_size, style));
    out.push(label(
        anchor.offset(0.0, value_offset),
        measurement.formatted_value(),
        style.value_size,
        style,
    ));
}

fn push_calibration(out: &mut Vec<DrawInstruction>, points: &[Point], style: &OverlayStyle) {
    if let [start, end] = points {
        out.push(DrawInstruction::Line {
            start: *start,
            end: *end,
            color: style.calibration_color,
            width: style.stroke_width,
        });
    }
    push_markers(out, points, style.calibration_color, style);
}

fn push_draft(out: &mut Vec<DrawInstruction>, draft: &DraftOverlay<'_>, style: &OverlayStyle) {
    let points = draft.points;
    match draft.kind {
        MeasurementKind::Polygon => {
            let color = style.draft_polygon_color;
            if points.len() >= 3 {
                out.push(DrawInstruction::Polygon {
                    points: points.to_vec(),
                    fill: Some(color.with_alpha(style.fill_alpha)),
                    stroke: color,
                    stroke_width: style.stroke_width,
                });
                if let Some(center) = geometry::centroid(points) {
                    out.push(label(
                        center,
                        format!("{:.2} {}", draft.value, draft.kind.unit_label(draft.unit)),
                        style.value_size,
                        style,
                    ));
                }
            } else if points.len() == 2 {
                out.push(DrawInstruction::Polyline {
                    points: points.to_vec(),
                    stroke: color,
                    stroke_width: style.stroke_width,
                });
            }
            push_markers(out, points, color, style);
        }
        MeasurementKind::Polyline => {
            let color = style.draft_polyline_color;
            if points.len() >= 2 {
                out.push(DrawInstruction::Polyline {
                    points: points.to_vec(),
                    stroke: color,
                    stroke_width: style.stroke_width,
                });
                if let Some(middle) = geometry::middle_vertex(points) {
                    out.push(label(
                        middle.offset(0.0, -DRAFT_LABEL_LIFT),
                        format!("{} {}", geometry::round2(draft.value), draft.unit),
                        style.value_size,
                        style,
                    ));
                }
            }
            push_markers(out, points, color, style);
        }
    }
}

fn push_markers(out: &mut Vec<DrawInstruction>, points: &[Point], fill: Color, style: &OverlayStyle) {
    out.extend(points.iter().enumerate().map(|(index, point)| DrawInstruction::Marker {
        center: *point,
        radius: style.marker_radius,
        fill,
        label: Some((index + 1).to_string()),
    }));
}

fn label(position: Point, text: String, size: f32, style: &OverlayStyle) -> DrawInstruction {
    DrawInstruction::Text {
        position,
        text,
        size,
        fill: style.text_color,
        outline: Some(style.text_outline),
    }
}
