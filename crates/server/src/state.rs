use std::sync::Arc;

use db::models::customer::Customer;
use services::services::{
    backend::{BackendError, CustomerBackend},
    bulk_mutation::BulkMutationOrchestrator,
    config::PortalConfig,
    csv_import::CustomerImporter,
    reference_number::ReferenceNumberGenerator,
    session::ReconciliationSession,
};
use tokio::sync::Mutex;
use tracing::info;

/// Shared by every handler. The session is the single writer for the record store.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PortalConfig>,
    pub backend: Arc<dyn CustomerBackend>,
    pub session: Arc<Mutex<ReconciliationSession<Customer>>>,
    pub orchestrator: Arc<BulkMutationOrchestrator>,
    pub references: ReferenceNumberGenerator,
    pub importer: Arc<CustomerImporter>,
}

impl AppState {
    pub fn new(config: PortalConfig, backend: Arc<dyn CustomerBackend>) -> Self {
        Self {
            orchestrator: Arc::new(BulkMutationOrchestrator::new(
                backend.clone(),
                config.bulk_chunk_size,
            )),
            references: ReferenceNumberGenerator::new(backend.clone(), config.reference_strategy),
            importer: Arc::new(CustomerImporter::new(
                backend.clone(),
                config.import_chunk_size,
            )),
            session: Arc::new(Mutex::new(ReconciliationSession::default())),
            config: Arc::new(config),
            backend,
        }
    }

    /// Replace the session's records with a fresh fetch.
    pub async fn reload(&self) -> Result<usize, BackendError> {
        let records = self.backend.fetch_records().await?;
        let count = records.len();
        self.session.lock().await.load(records);
        info!(records = count, "Customer records loaded");
        Ok(count)
    }
}
