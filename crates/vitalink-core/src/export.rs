//! Reading export formats
//!
//! Writes collected readings as CSV rows or as JSON.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::protocol::CollectionReport;
use crate::reading::{BloodPressureReading, COLUMNS, FORMATS, UNITS};

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma-separated values, one header row
    Csv,
    /// Comma-separated values with column format and unit rows under the header
    CsvWithUnits,
    /// Pretty-printed JSON of the whole collection report
    Json,
}

impl ExportFormat {
    /// Detect format from file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }

    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv | ExportFormat::CsvWithUnits => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::CsvWithUnits => write!(f, "csv-units"),
            ExportFormat::Json => write!(f, "json"),
        }
    }
}

/// Returned when an export format name is not recognised
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown export format '{0}' (expected json, csv or csv-units)")]
pub struct UnknownExportFormat(
    /// The rejected name
    pub String,
);

impl FromStr for ExportFormat {
    type Err = UnknownExportFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "csv-units" => Ok(ExportFormat::CsvWithUnits),
            "json" => Ok(ExportFormat::Json),
            _ => Err(UnknownExportFormat(s.to_string())),
        }
    }
}

/// Write readings as CSV with a header row
pub fn write_csv<W: Write>(writer: &mut W, readings: &[BloodPressureReading]) -> io::Result<()> {
    writeln!(writer, "{}", COLUMNS.join(","))?;
    write_rows(writer, readings)
}

/// Write readings as CSV with the header, a column format row and a unit row
pub fn write_csv_with_units<W: Write>(
    writer: &mut W,
    readings: &[BloodPressureReading],
) -> io::Result<()> {
    writeln!(writer, "{}", COLUMNS.join(","))?;
    writeln!(writer, "{}", FORMATS.join(","))?;
    writeln!(writer, "{}", UNITS.join(","))?;
    write_rows(writer, readings)
}

fn write_rows<W: Write>(writer: &mut W, readings: &[BloodPressureReading]) -> io::Result<()> {
    for reading in readings {
        writeln!(writer, "{}", reading.values().join(","))?;
    }
    writer.flush()
}

/// Write any serializable value as pretty-printed JSON
pub fn write_json<W: Write, T: Serialize + ?Sized>(writer: &mut W, value: &T) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, value).map_err(io::Error::from)?;
    writeln!(writer)?;
    writer.flush()
}

/// Write a collection report. JSON carries the whole report, the CSV formats
/// only the kept readings.
pub fn write_report<W: Write>(
    writer: &mut W,
    format: ExportFormat,
    report: &CollectionReport<BloodPressureReading>,
) -> io::Result<()> {
    match format {
        ExportFormat::Csv => write_csv(writer, &report.readings),
        ExportFormat::CsvWithUnits => write_csv_with_units(writer, &report.readings),
        ExportFormat::Json => write_json(writer, report),
    }
}

/// Write a collection report to a file in the given format
pub fn export_to_file<P: AsRef<Path>>(
    path: P,
    format: ExportFormat,
    report: &CollectionReport<BloodPressureReading>,
) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_report(&mut writer, format, report)
}
