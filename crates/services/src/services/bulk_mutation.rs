//! Chunked bulk operations over the selection set.
//!
//! Each chunk is one remote call. A chunk that succeeds is applied to the
//! session's store straight away and its ids leave the selection; a chunk that
//! fails leaves both untouched so the user can retry. The cancellation token is
//! checked before every chunk.

use std::sync::{Arc, Mutex};

use db::models::customer::{Customer, CustomerPatch, OwnerField, ReferenceUpdate};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ts_rs::TS;

use super::{
    backend::{BulkResponse, CustomerBackend},
    record_store::Mutation,
    reference_number::batch_references,
    session::ReconciliationSession,
};

pub const DEFAULT_CHUNK_SIZE: usize = 10;
/// Status written by [`BulkMutationOrchestrator::default_missing_status`].
pub const DEFAULT_STATUS: &str = "Active";

#[derive(Debug, Error)]
pub enum BulkMutationError {
    #[error("no records selected")]
    EmptySelection,
    #[error("a bulk operation is already in progress")]
    AlreadyInProgress,
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("run an audit first")]
    AuditNotRun,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, Display)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BulkOperation {
    Delete,
    SetStatus { status: String },
    TransferOwner { field: OwnerField, new_owner: String },
}

impl BulkOperation {
    fn validate(&self) -> Result<(), BulkMutationError> {
        match self {
            BulkOperation::Delete => Ok(()),
            BulkOperation::SetStatus { status } if status.trim().is_empty() => Err(
                BulkMutationError::Validation("status must not be blank".to_string()),
            ),
            BulkOperation::TransferOwner { new_owner, .. } if new_owner.trim().is_empty() => Err(
                BulkMutationError::Validation("new owner must not be blank".to_string()),
            ),
            _ => Ok(()),
        }
    }

    fn mutation_for(&self, ids: Vec<i64>) -> Mutation<Customer> {
        match self {
            BulkOperation::Delete => Mutation::RemoveMany(ids),
            BulkOperation::SetStatus { status } => Mutation::UpdateMany {
                ids,
                patch: CustomerPatch::status(status.trim()),
            },
            BulkOperation::TransferOwner { field, new_owner } => Mutation::UpdateMany {
                ids,
                patch: CustomerPatch::owner(*field, new_owner.trim()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BulkState {
    #[default]
    Idle,
    InProgress,
    Completed,
    PartiallyFailed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct BulkFailure {
    pub id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct BulkOutcome {
    pub state: BulkState,
    pub total: usize,
    pub succeeded: Vec<i64>,
    pub failures: Vec<BulkFailure>,
    /// Stopped by the cancellation token before every chunk was dispatched.
    pub cancelled: bool,
}

impl BulkOutcome {
    /// First failure reason, as the store reported it.
    pub fn error_message(&self) -> Option<&str> {
        self.failures.first().map(|f| f.reason.as_str())
    }
}

/// Exclusive right to run one bulk operation. Dropping it before the run
/// finishes returns the orchestrator to idle.
pub struct BulkClaim<'a> {
    orchestrator: &'a BulkMutationOrchestrator,
}

impl Drop for BulkClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.orchestrator.state.lock() {
            if *state == BulkState::InProgress {
                *state = BulkState::Idle;
            }
        }
    }
}

impl BulkClaim<'_> {
    /// Run `operation` over the session's current selection.
    pub async fn run(
        self,
        session: &mut ReconciliationSession<Customer>,
        operation: BulkOperation,
        cancel: &CancellationToken,
        progress: impl FnMut(usize, usize),
    ) -> Result<BulkOutcome, BulkMutationError> {
        operation.validate()?;
        let ids = session.selection().ids().to_vec();
        self.orchestrator
            .dispatch(session, ids, Dispatch::Operation(operation), cancel, progress)
            .await
    }

    /// Set [`DEFAULT_STATUS`] on every record the last audit flagged as missing a
    /// status, then audit again so the report reflects the corrected records.
    pub async fn default_missing_status(
        self,
        session: &mut ReconciliationSession<Customer>,
        cancel: &CancellationToken,
        progress: impl FnMut(usize, usize),
    ) -> Result<BulkOutcome, BulkMutationError> {
        let report = session.audit().ok_or(BulkMutationError::AuditNotRun)?;
        let ids: Vec<i64> = session
            .records()
            .iter()
            .map(|r| r.id)
            .filter(|id| report.missing_status().contains(id))
            .collect();
        let operation = BulkOperation::SetStatus {
            status: DEFAULT_STATUS.to_string(),
        };
        let outcome = self
            .orchestrator
            .dispatch(session, ids, Dispatch::Operation(operation), cancel, progress)
            .await?;
        if !outcome.succeeded.is_empty() {
            session.run_audit();
        }
        Ok(outcome)
    }

    /// Assign batch reference numbers to the selection, numbered in selection order.
    pub async fn assign_batch_references(
        self,
        session: &mut ReconciliationSession<Customer>,
        cancel: &CancellationToken,
        progress: impl FnMut(usize, usize),
    ) -> Result<BulkOutcome, BulkMutationError> {
        let selected: Vec<&Customer> = session
            .selection()
            .ids()
            .iter()
            .filter_map(|id| session.store().get(id))
            .collect();
        let updates: Vec<ReferenceUpdate> = batch_references(&selected)
            .into_iter()
            .map(|(id, reference_number)| ReferenceUpdate {
                id,
                reference_number,
            })
            .collect();
        let ids = updates.iter().map(|u| u.id).collect();
        self.orchestrator
            .dispatch(session, ids, Dispatch::References(updates), cancel, progress)
            .await
    }
}

enum Dispatch {
    Operation(BulkOperation),
    References(Vec<ReferenceUpdate>),
}

pub struct BulkMutationOrchestrator {
    backend: Arc<dyn CustomerBackend>,
    chunk_size: usize,
    state: Mutex<BulkState>,
}

impl BulkMutationOrchestrator {
    pub fn new(backend: Arc<dyn CustomerBackend>, chunk_size: usize) -> Self {
        Self {
            backend,
            chunk_size: chunk_size.max(1),
            state: Mutex::new(BulkState::Idle),
        }
    }

    pub fn state(&self) -> BulkState {
        self.state.lock().map(|s| *s).unwrap_or(BulkState::Idle)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Mark a bulk operation in flight. Fails while another claim is alive.
    pub fn claim(&self) -> Result<BulkClaim<'_>, BulkMutationError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BulkMutationError::AlreadyInProgress)?;
        if *state == BulkState::InProgress {
            return Err(BulkMutationError::AlreadyInProgress);
        }
        *state = BulkState::InProgress;
        Ok(BulkClaim { orchestrator: self })
    }

    fn finish(&self, state: BulkState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    pub async fn run(
        &self,
        session: &mut ReconciliationSession<Customer>,
        operation: BulkOperation,
        cancel: &CancellationToken,
        progress: impl FnMut(usize, usize),
    ) -> Result<BulkOutcome, BulkMutationError> {
        self.claim()?
            .run(session, operation, cancel, progress)
            .await
    }

    pub async fn default_missing_status(
        &self,
        session: &mut ReconciliationSession<Customer>,
        cancel: &CancellationToken,
        progress: impl FnMut(usize, usize),
    ) -> Result<BulkOutcome, BulkMutationError> {
        self.claim()?
            .default_missing_status(session, cancel, progress)
            .await
    }

    pub async fn assign_batch_references(
        &self,
        session: &mut ReconciliationSession<Customer>,
        cancel: &CancellationToken,
        progress: impl FnMut(usize, usize),
    ) -> Result<BulkOutcome, BulkMutationError> {
        self.claim()?
            .assign_batch_references(session, cancel, progress)
            .await
    }

    async fn call(
        &self,
        dispatch: &Dispatch,
        chunk: &[i64],
        offset: usize,
    ) -> Result<BulkResponse, String> {
        let result = match dispatch {
            Dispatch::Operation(BulkOperation::Delete) => self.backend.bulk_delete(chunk).await,
            Dispatch::Operation(BulkOperation::SetStatus { status }) => {
                self.backend.bulk_set_status(chunk, status.trim()).await
            }
            Dispatch::Operation(BulkOperation::TransferOwner { field, new_owner }) => {
                self.backend
                    .bulk_transfer_owner(chunk, *field, new_owner.trim())
                    .await
            }
            Dispatch::References(updates) => {
                self.backend
                    .update_reference_numbers(&updates[offset..offset + chunk.len()])
                    .await
            }
        };
        result.map_err(|e| e.to_string())
    }

    fn apply_chunk(
        session: &mut ReconciliationSession<Customer>,
        dispatch: &Dispatch,
        chunk: &[i64],
        offset: usize,
    ) {
        match dispatch {
            Dispatch::Operation(operation) => session.apply(operation.mutation_for(chunk.to_vec())),
            Dispatch::References(updates) => {
                for update in &updates[offset..offset + chunk.len()] {
                    session.apply(Mutation::UpdateMany {
                        ids: vec![update.id],
                        patch: CustomerPatch::reference_number(update.reference_number.clone()),
                    });
                }
            }
        }
        session.deselect(chunk);
    }

    async fn dispatch(
        &self,
        session: &mut ReconciliationSession<Customer>,
        ids: Vec<i64>,
        dispatch: Dispatch,
        cancel: &CancellationToken,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<BulkOutcome, BulkMutationError> {
        if ids.is_empty() {
            return Err(BulkMutationError::EmptySelection);
        }
        let operation = match &dispatch {
            Dispatch::Operation(op) => op.to_string(),
            Dispatch::References(_) => "assign_references".to_string(),
        };
        let total = ids.len();
        let mut succeeded = Vec::new();
        let mut failures = Vec::new();
        let mut cancelled = false;
        let mut completed = 0;

        info!(operation = %operation, total, chunk_size = self.chunk_size, "Bulk operation started");

        for chunk in ids.chunks(self.chunk_size) {
            if cancel.is_cancelled() {
                cancelled = true;
                info!(operation = %operation, completed, total, "Bulk operation cancelled");
                break;
            }

            match self.call(&dispatch, chunk, completed).await {
                Ok(response) if response.success => {
                    Self::apply_chunk(session, &dispatch, chunk, completed);
                    succeeded.extend_from_slice(chunk);
                }
                Ok(response) => {
                    let reason = response
                        .error
                        .unwrap_or_else(|| "request was rejected".to_string());
                    warn!(operation = %operation, error = %reason, chunk = chunk.len(), "Bulk chunk rejected");
                    failures.extend(chunk.iter().map(|&id| BulkFailure {
                        id,
                        reason: reason.clone(),
                    }));
                }
                Err(reason) => {
                    warn!(operation = %operation, error = %reason, chunk = chunk.len(), "Bulk chunk failed in transport");
                    failures.extend(chunk.iter().map(|&id| BulkFailure {
                        id,
                        reason: reason.clone(),
                    }));
                }
            }

            completed += chunk.len();
            debug!(operation = %operation, completed, total, "Bulk chunk finished");
            progress(completed, total);
        }

        let state = if succeeded.len() == total {
            BulkState::Completed
        } else if succeeded.is_empty() {
            BulkState::Failed
        } else {
            BulkState::PartiallyFailed
        };
        self.finish(state);

        info!(
            operation = %operation,
            state = %state,
            succeeded = succeeded.len(),
            failed = failures.len(),
            cancelled,
            "Bulk operation finished"
        );

        Ok(BulkOutcome {
            state,
            total,
            succeeded,
            failures,
            cancelled,
        })
    }
}
