//! Chunked customer import with a downloadable failure report.

use std::sync::Arc;

use db::models::customer::{CreateCustomer, Customer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use ts_rs::TS;

use super::{
    backend::CustomerBackend, csv_export::join_row, record_store::Mutation,
    session::ReconciliationSession,
};

pub const DEFAULT_IMPORT_CHUNK_SIZE: usize = 50;
pub const MISSING_COMPANY_NAME: &str = "missing company name";

const FAILURE_HEADER: &[&str] = &[
    "Row",
    "Reason",
    "Company Name",
    "Contact Person",
    "Contact Number",
    "Email Address",
    "Address",
    "Region",
    "Type",
    "Status",
    "TSA",
    "TSM",
    "Manager",
];

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("nothing to import")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct FailedRow {
    /// 1-based position in the submitted rows.
    pub row: usize,
    pub reason: String,
    pub data: CreateCustomer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct ImportReport {
    pub total: usize,
    pub inserted: Vec<Customer>,
    pub failed: Vec<FailedRow>,
    pub cancelled: bool,
    /// CSV of the failed rows, present when any row failed.
    pub failure_csv: Option<String>,
}

fn failure_line(failed: &FailedRow) -> String {
    let data = &failed.data;
    let row = failed.row.to_string();
    join_row([
        row.as_str(),
        failed.reason.as_str(),
        data.company_name.as_str(),
        data.contact_person.as_str(),
        data.contact_number.as_str(),
        data.email_address.as_str(),
        data.address.as_str(),
        data.region.as_str(),
        data.type_client.as_deref().unwrap_or_default(),
        data.status.as_deref().unwrap_or_default(),
        data.tsa.as_deref().unwrap_or_default(),
        data.tsm.as_deref().unwrap_or_default(),
        data.manager.as_deref().unwrap_or_default(),
    ])
}

pub fn failure_csv(failed: &[FailedRow]) -> Option<String> {
    if failed.is_empty() {
        return None;
    }
    let mut lines = vec![join_row(FAILURE_HEADER.iter().copied())];
    lines.extend(failed.iter().map(failure_line));
    Some(lines.join("\n"))
}

pub struct CustomerImporter {
    backend: Arc<dyn CustomerBackend>,
    chunk_size: usize,
}

impl CustomerImporter {
    pub fn new(backend: Arc<dyn CustomerBackend>, chunk_size: usize) -> Self {
        Self {
            backend,
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn import(
        &self,
        session: &mut ReconciliationSession<Customer>,
        rows: Vec<CreateCustomer>,
        cancel: &CancellationToken,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<ImportReport, ImportError> {
        if rows.is_empty() {
            return Err(ImportError::Empty);
        }
        let total = rows.len();
        let mut inserted = Vec::new();
        let mut failed = Vec::new();
        let mut cancelled = false;
        let mut processed = 0;

        info!(total, chunk_size = self.chunk_size, "Import started");

        for chunk in rows.chunks(self.chunk_size) {
            if cancel.is_cancelled() {
                cancelled = true;
                info!(processed, total, "Import cancelled");
                break;
            }

            // Rows without a company name never reach the store.
            let mut sendable = Vec::with_capacity(chunk.len());
            let mut positions = Vec::with_capacity(chunk.len());
            for (offset, row) in chunk.iter().enumerate() {
                let position = processed + offset + 1;
                if row.company_name.trim().is_empty() {
                    failed.push(FailedRow {
                        row: position,
                        reason: MISSING_COMPANY_NAME.to_string(),
                        data: row.clone(),
                    });
                } else {
                    sendable.push(row.clone());
                    positions.push(position);
                }
            }

            if !sendable.is_empty() {
                match self.backend.import_batch(&sendable).await {
                    Ok(response) => {
                        for rejected in response.rejected {
                            if let (Some(&row), Some(data)) =
                                (positions.get(rejected.index), sendable.get(rejected.index))
                            {
                                failed.push(FailedRow {
                                    row,
                                    reason: rejected.reason,
                                    data: data.clone(),
                                });
                            }
                        }
                        if !response.inserted.is_empty() {
                            session.apply(Mutation::InsertMany(response.inserted.clone()));
                            inserted.extend(response.inserted);
                        }
                    }
                    // Batches are atomic, so nothing from this chunk was stored.
                    Err(e) => {
                        let reason = e.to_string();
                        warn!(error = %reason, rows = sendable.len(), "Import chunk failed");
                        failed.extend(positions.iter().zip(&sendable).map(|(&row, data)| {
                            FailedRow {
                                row,
                                reason: reason.clone(),
                                data: data.clone(),
                            }
                        }));
                    }
                }
            }

            processed += chunk.len();
            progress(processed, total);
        }

        failed.sort_by_key(|f| f.row);
        info!(
            inserted = inserted.len(),
            failed = failed.len(),
            cancelled,
            "Import finished"
        );

        Ok(ImportReport {
            total,
            failure_csv: failure_csv(&failed),
            inserted,
            failed,
            cancelled,
        })
    }
}
