//! CSV export for measurements
//!
//! Writes one row per stored measurement of a session so quantities can be
//! taken into a spreadsheet or estimating tool.

use doc_model::{Point, Session};
use std::io::Write;

/// Error types for CSV export
#[derive(Debug, thiserror::Error)]
pub enum CsvExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV serialization error: {0}")]
    Csv(#[from] csv::Error),
}

pub type CsvExportResult<T> = Result<T, CsvExportError>;

/// Configuration for CSV export
#[derive(Debug, Clone)]
pub struct CsvExportConfig {
    /// Include column headers in the output
    pub include_headers: bool,

    /// CSV delimiter character
    pub delimiter: u8,

    /// Export only measurements on these pages (None = all pages)
    pub page_filter: Option<Vec<u32>>,
}

impl Default for CsvExportConfig {
    fn default() -> Self {
        Self {
            include_headers: true,
            delimiter: b',',
            page_filter: None,
        }
    }
}

impl CsvExportConfig {
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_page_filter(mut self, pages: Vec<u32>) -> Self {
        self.page_filter = Some(pages);
        self
    }

    pub fn without_headers(mut self) -> Self {
        self.include_headers = false;
        self
    }

    fn includes_page(&self, page_index: u32) -> bool {
        self.page_filter
            .as_ref()
            .map_or(true, |pages| pages.contains(&page_index))
    }
}

/// Export measurements to CSV format
///
/// CSV columns:
/// - ID: Measurement identifier
/// - Page: Page index (0-based)
/// - Page Name: User-assigned page name, empty if none
/// - Kind: `polygon` or `polyline`
/// - Name: Measurement name
/// - Value: Stored value with two decimals
/// - Unit: Unit label (`m²` for areas)
/// - Color: Hex colour
/// - Points: `x,y` pairs in page pixels, separated by `;`
/// - Created: RFC 3339 creation timestamp
///
/// Rows follow creation order.
pub fn export_measurements_csv<W: Write>(
    writer: W,
    session: &Session,
    config: &CsvExportConfig,
) -> CsvExportResult<usize> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(config.delimiter)
        .has_headers(config.include_headers)
        .from_writer(writer);

    if config.include_headers {
        csv_writer.write_record([
            "ID",
            "Page",
            "Page Name",
            "Kind",
            "Name",
            "Value",
            "Unit",
            "Color",
            "Points",
            "Created",
        ])?;
    }

    let mut rows = 0;
    for measurement in session
        .measurements
        .iter()
        .filter(|m| config.includes_page(m.page_index))
    {
        csv_writer.write_record(&[
            measurement.id.to_string(),
            measurement.page_index.to_string(),
            session
                .page_name(measurement.page_index)
                .unwrap_or("")
                .to_string(),
            measurement.kind.as_str().to_string(),
            measurement.name.clone(),
            format!("{:.2}", measurement.value),
            measurement.kind.unit_label(&measurement.unit),
            measurement.color.to_hex(),
            format_points(&measurement.points),
            measurement.created_at.to_rfc3339(),
        ])?;
        rows += 1;
    }

    csv_writer.flush()?;
    tracing::debug!(rows, "measurements exported to csv");
    Ok(rows)
}

/// Export to an in-memory string
pub fn measurements_to_csv_string(session: &Session, config: &CsvExportConfig) -> CsvExportResult<String> {
    let mut output = Vec::new();
    export_measurements_csv(&mut output, session, config)?;
    Ok(String::from_utf8_lossy(&output).into_owned())
}

fn format_points(points: &[Point]) -> String {
    points
        .iter()
        .map(|p| format!("{:.2},{:.2}", p.x, p.y))
        .collect::<Vec<_>>()
        .join(";")
}
