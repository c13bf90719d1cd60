//! Report payload decoding
//!
//! The provider does not say how a report artifact is encoded, and the
//! download URL carries no usable extension. Decoders are tried in order
//! against the leading bytes:
//!
//! 1. zip archive (`PK\x03\x04`), first entry
//! 2. gzip stream (`\x1f\x8b`)
//! 3. raw bytes
//!
//! The unwrapped text is then parsed as a JSON array of objects or as CSV
//! with a header row.

use flate2::read::GzDecoder;
use serde_json::{Map, Value};
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// One report row keyed by column name.
pub type ReportRow = Map<String, Value>;

/// Largest unwrapped report accepted from a zip entry or gzip stream.
pub const MAX_DECOMPRESSED_BYTES: u64 = 512 * 1024 * 1024;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

/// Encoding detected on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Zip archive
    Zip,
    /// Single gzip stream
    Gzip,
    /// Uncompressed
    Raw,
}

impl WireFormat {
    /// Detect the encoding from the leading bytes.
    pub fn sniff(payload: &[u8]) -> Self {
        if payload.starts_with(ZIP_MAGIC) {
            WireFormat::Zip
        } else if payload.starts_with(GZIP_MAGIC) {
            WireFormat::Gzip
        } else {
            WireFormat::Raw
        }
    }

    /// Label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Zip => "zip",
            WireFormat::Gzip => "gzip",
            WireFormat::Raw => "raw",
        }
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row layout of the unwrapped text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    /// JSON array of objects
    Json,
    /// CSV with a header row
    Csv,
}

impl std::fmt::Display for RowFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowFormat::Json => f.write_str("json"),
            RowFormat::Csv => f.write_str("csv"),
        }
    }
}

/// Decoded report artifact.
#[derive(Debug, Clone)]
pub struct DecodedReport {
    /// Wire encoding that was unwrapped
    pub format: WireFormat,
    /// Row layout that was parsed
    pub row_format: RowFormat,
    /// Parsed rows
    pub rows: Vec<ReportRow>,
}

/// Errors while decoding a downloaded report. Each carries the response content type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    /// Payload looked like a zip archive but could not be read
    #[error("invalid zip archive (content type {}): {message}", display_content_type(.content_type))]
    Archive {
        /// Response content type
        content_type: Option<String>,
        /// Reader message
        message: String,
    },

    /// Payload looked like gzip but could not be inflated
    #[error("invalid gzip stream (content type {}): {message}", display_content_type(.content_type))]
    Decompress {
        /// Response content type
        content_type: Option<String>,
        /// Inflater message
        message: String,
    },

    /// Unwrapped payload is not UTF-8 text
    #[error("unrecognized {format} report payload (content type {})", display_content_type(.content_type))]
    Unrecognized {
        /// Response content type
        content_type: Option<String>,
        /// Wire encoding that was unwrapped
        format: WireFormat,
    },

    /// Text could not be parsed into rows
    #[error("malformed {row_format} rows in {format} report (content type {}): {message}", display_content_type(.content_type))]
    Rows {
        /// Response content type
        content_type: Option<String>,
        /// Wire encoding that was unwrapped
        format: WireFormat,
        /// Row layout attempted
        row_format: RowFormat,
        /// Parser message
        message: String,
    },
}

fn display_content_type(content_type: &Option<String>) -> &str {
    content_type.as_deref().unwrap_or("unknown")
}

impl DecodeError {
    /// Content type of the response that failed to decode
    pub fn content_type(&self) -> Option<&str> {
        match self {
            Self::Archive { content_type, .. }
            | Self::Decompress { content_type, .. }
            | Self::Unrecognized { content_type, .. }
            | Self::Rows { content_type, .. } => content_type.as_deref(),
        }
    }
}

/// Unwrap and parse a downloaded report.
pub fn decode_report(payload: &[u8], content_type: Option<&str>) -> Result<DecodedReport, DecodeError> {
    let content_type = content_type.map(str::to_string);
    let format = WireFormat::sniff(payload);

    let bytes = match format {
        WireFormat::Zip => unzip_first_entry(payload, MAX_DECOMPRESSED_BYTES).map_err(|message| DecodeError::Archive {
            content_type: content_type.clone(),
            message,
        })?,
        WireFormat::Gzip => gunzip(payload, MAX_DECOMPRESSED_BYTES).map_err(|message| DecodeError::Decompress {
            content_type: content_type.clone(),
            message,
        })?,
        WireFormat::Raw => payload.to_vec(),
    };

    let text = String::from_utf8(bytes).map_err(|_| DecodeError::Unrecognized {
        content_type: content_type.clone(),
        format,
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let row_format = if text.trim_start().starts_with(['[', '{']) {
        RowFormat::Json
    } else {
        RowFormat::Csv
    };

    let rows = match row_format {
        RowFormat::Json => parse_json_rows(text),
        RowFormat::Csv => parse_csv_rows(text),
    }
    .map_err(|message| DecodeError::Rows {
        content_type,
        format,
        row_format,
        message,
    })?;

    Ok(DecodedReport {
        format,
        row_format,
        rows,
    })
}

fn unzip_first_entry(payload: &[u8], limit: u64) -> Result<Vec<u8>, String> {
    let mut archive =
        ZipArchive::new(Cursor::new(payload)).map_err(|e| format!("failed to open zip: {e}"))?;
    if archive.is_empty() {
        return Err("zip archive has no entries".to_string());
    }

    let entry = archive
        .by_index(0)
        .map_err(|e| format!("failed to read zip entry: {e}"))?;
    let name = entry.name().to_string();
    read_capped(entry, limit).map_err(|e| format!("failed to extract {name}: {e}"))
}

fn gunzip(payload: &[u8], limit: u64) -> Result<Vec<u8>, String> {
    read_capped(GzDecoder::new(payload), limit).map_err(|e| format!("failed to inflate gzip: {e}"))
}

/// Read at most `limit` bytes; a longer stream is an error. Header sizes
/// are not trusted for preallocation.
fn read_capped(reader: impl Read, limit: u64) -> Result<Vec<u8>, String> {
    let mut contents = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut contents)
        .map_err(|e| e.to_string())?;
    if contents.len() as u64 > limit {
        return Err(format!("decompressed size exceeds {limit} bytes"));
    }
    Ok(contents)
}

fn parse_json_rows(text: &str) -> Result<Vec<ReportRow>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let Value::Array(items) = value else {
        return Err("expected a JSON array of rows".to_string());
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(row) => Ok(row),
            other => Err(format!("row {index} is not an object: {other}")),
        })
        .collect()
}

fn parse_csv_rows(text: &str) -> Result<Vec<ReportRow>, String> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| e.to_string())?.clone();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| format!("record {}: {e}", line + 1))?;
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}
