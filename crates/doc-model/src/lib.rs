use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type MeasurementId = uuid::Uuid;

pub const DEFAULT_UNIT: &str = "m";

/// Position in page-pixel space (raster coordinates, origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self { x: self.x + dx, y: self.y + dy }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ColorParseError {
    #[error("colour must start with '#': {0}")]
    MissingHash(String),
    #[error("colour must have 6 or 8 hex digits: {0}")]
    InvalidLength(String),
    #[error("invalid hex digit in colour: {0}")]
    InvalidDigit(String),
}

/// RGBA colour persisted as `#rrggbb` (or `#rrggbbaa` when translucent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(0xff, 0xff, 0xff);
    pub const BLACK: Color = Color::rgb(0x00, 0x00, 0x00);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xff }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    pub fn to_hex(&self) -> String {
        if self.a == 0xff {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Color {
    type Err = ColorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('#').ok_or_else(|| ColorParseError::MissingHash(s.to_owned()))?;
        if !(digits.len() == 6 || digits.len() == 8) || !digits.is_ascii() {
            return Err(ColorParseError::InvalidLength(s.to_owned()));
        }

        let channel = |index: usize| {
            u8::from_str_radix(&digits[index..index + 2], 16)
                .map_err(|_| ColorParseError::InvalidDigit(s.to_owned()))
        };

        let alpha = if digits.len() == 8 { channel(6)? } else { 0xff };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?, alpha))
    }
}

impl TryFrom<String> for Color {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(value: Color) -> Self {
        value.to_hex()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementKind {
    /// Closed outline measured by enclosed area.
    Polygon,
    /// Open path measured by length.
    Polyline,
}

impl MeasurementKind {
    pub fn min_points(self) -> usize {
        match self {
            Self::Polygon => 3,
            Self::Polyline => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Polygon => "polygon",
            Self::Polyline => "polyline",
        }
    }

    /// Unit suffix for values of this kind, e.g. `m²` for areas.
    pub fn unit_label(self, unit: &str) -> String {
        match self {
            Self::Polygon => format!("{unit}²"),
            Self::Polyline => unit.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationProfile {
    /// Older records omit this; sessions fill it from the calibration map key.
    #[serde(default)]
    pub page_index: u32,
    pub reference_points: [Point; 2],
    pub real_distance: f64,
    pub scale_factor: f64,
    pub unit: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl CalibrationProfile {
    pub fn pixel_distance(&self) -> f64 {
        self.reference_points[0].distance_to(&self.reference_points[1])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub id: MeasurementId,
    pub name: String,
    pub kind: MeasurementKind,
    pub points: Vec<Point>,
    pub value: f64,
    pub unit: String,
    pub color: Color,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_position: Option<Point>,
    #[serde(default)]
    pub page_index: u32,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl Measurement {
    /// Value with two decimals and its unit, e.g. `12.50 m²`.
    pub fn formatted_value(&self) -> String {
        format!("{:.2} {}", self.value, self.kind.unit_label(&self.unit))
    }
}

/// Stable identity of a document's session: `"{name}-{size}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn for_document(name: &str, size_bytes: u64) -> Self {
        Self(format!("{name}-{size_bytes}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the persisted session record in a key-value store.
    pub fn record_key(&self) -> String {
        format!("pdf-session-{}", self.0)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "SessionRecord")]
pub struct Session {
    pub measurements: Vec<Measurement>,
    pub calibrations: BTreeMap<u32, CalibrationProfile>,
    pub default_unit: String,
    pub page_names: BTreeMap<u32, String>,
}

/// Stored shape of a [`Session`]; the calibration map key is authoritative for
/// each profile's page.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SessionRecord {
    measurements: Vec<Measurement>,
    calibrations: BTreeMap<u32, CalibrationProfile>,
    default_unit: String,
    page_names: BTreeMap<u32, String>,
}

impl Default for SessionRecord {
    fn default() -> Self {
        let Session { measurements, calibrations, default_unit, page_names } = Session::default();
        Self { measurements, calibrations, default_unit, page_names }
    }
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        let mut calibrations = record.calibrations;
        for (page_index, profile) in calibrations.iter_mut() {
            profile.page_index = *page_index;
        }
        Self {
            measurements: record.measurements,
            calibrations,
            default_unit: record.default_unit,
            page_names: record.page_names,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_UNIT)
    }
}

impl Session {
    pub fn new(default_unit: impl Into<String>) -> Self {
        Self {
            measurements: Vec::new(),
            calibrations: BTreeMap::new(),
            default_unit: default_unit.into(),
            page_names: BTreeMap::new(),
        }
    }

    pub fn measurement(&self, id: MeasurementId) -> Option<&Measurement> {
        self.measurements.iter().find(|measurement| measurement.id == id)
    }

    pub fn measurement_mut(&mut self, id: MeasurementId) -> Option<&mut Measurement> {
        self.measurements.iter_mut().find(|measurement| measurement.id == id)
    }

    pub fn measurements_for_page(&self, page_index: u32) -> impl Iterator<Item = &Measurement> {
        self.measurements.iter().filter(move |measurement| measurement.page_index == page_index)
    }

    pub fn calibration(&self, page_index: u32) -> Option<&CalibrationProfile> {
        self.calibrations.get(&page_index)
    }

    /// Real-world units per pixel on a page; `1.0` when uncalibrated.
    pub fn scale_factor(&self, page_index: u32) -> f64 {
        self.calibration(page_index).map_or(1.0, |profile| profile.scale_factor)
    }

    /// Unit new measurements on a page are recorded in.
    pub fn unit_for_page(&self, page_index: u32) -> &str {
        self.calibration(page_index).map_or(self.default_unit.as_str(), |profile| &profile.unit)
    }

    pub fn page_name(&self, page_index: u32) -> Option<&str> {
        self.page_names.get(&page_index).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty() && self.calibrations.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageCounters {
    pub saved_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentHistoryEntry {
    pub id: SessionKey,
    pub name: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub measurement_count: usize,
}
