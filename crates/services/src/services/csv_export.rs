//! CSV rendering of the working set.

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::record::{AuditableRecord, fields};

/// Rows rendered between cancellation checks.
pub const EXPORT_CHUNK_ROWS: usize = 500;
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExportError {
    #[error("export cancelled after {0} rows")]
    Cancelled(usize),
}

/// Header and the record field it is read from.
pub const CUSTOMER_COLUMNS: &[(&str, &str)] = &[
    ("Reference Number", fields::REFERENCE_NUMBER),
    ("Company Name", fields::COMPANY_NAME),
    ("Contact Person", fields::CONTACT_PERSON),
    ("Contact Number", fields::CONTACT_NUMBER),
    ("Email Address", fields::EMAIL_ADDRESS),
    ("Address", fields::ADDRESS),
    ("Region", fields::REGION),
    ("Type", fields::TYPE_CLIENT),
    ("Status", fields::STATUS),
    ("TSA", fields::TSA),
    ("TSM", fields::TSM),
    ("Manager", fields::MANAGER),
    ("Date Created", fields::CREATED_AT),
];

/// Wraps in double quotes, doubling any quote inside.
pub fn quote_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

pub fn join_row<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    values
        .into_iter()
        .map(quote_field)
        .collect::<Vec<_>>()
        .join(",")
}

fn cell<R: AuditableRecord>(record: &R, field: &str) -> String {
    if field == fields::CREATED_AT {
        return record
            .created_at()
            .map(|ts| ts.format(DATE_FORMAT).to_string())
            .unwrap_or_default();
    }
    record.field(field).unwrap_or_default().to_string()
}

/// Header row plus one row per record, joined by `\n`.
pub fn export_records<R: AuditableRecord>(
    records: &[&R],
    columns: &[(&str, &str)],
    cancel: &CancellationToken,
) -> Result<String, ExportError> {
    let mut lines = Vec::with_capacity(records.len() + 1);
    lines.push(join_row(columns.iter().map(|(header, _)| *header)));

    for (chunk_index, chunk) in records.chunks(EXPORT_CHUNK_ROWS).enumerate() {
        if cancel.is_cancelled() {
            let done = chunk_index * EXPORT_CHUNK_ROWS;
            info!(rows = done, total = records.len(), "CSV export cancelled");
            return Err(ExportError::Cancelled(done));
        }
        for record in chunk {
            let cells: Vec<String> = columns.iter().map(|(_, field)| cell(*record, field)).collect();
            lines.push(join_row(cells.iter().map(String::as_str)));
        }
    }

    info!(rows = records.len(), "CSV export finished");
    Ok(lines.join("\n"))
}
