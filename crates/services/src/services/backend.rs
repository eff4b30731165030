//! Persistence contract consumed by the reconciliation engine, and its Postgres implementation.

use async_trait::async_trait;
use db::{
    DBService,
    models::customer::{CreateCustomer, Customer, OwnerField, ReferenceUpdate},
};
use serde::{Deserialize, Serialize};
use sqlx::Connection;
use thiserror::Error;
use tracing::{error, warn};
use ts_rs::TS;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("network error: {0}")]
    Transport(String),
}

/// Answer to a bulk request. `success: false` carries the store's own message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct BulkResponse {
    pub success: bool,
    pub affected: u64,
    pub error: Option<String>,
}

impl BulkResponse {
    pub fn ok(affected: u64) -> Self {
        Self {
            success: true,
            affected,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            affected: 0,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct RejectedRow {
    /// Position within the submitted batch.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct ImportBatchResponse {
    pub inserted: Vec<Customer>,
    pub rejected: Vec<RejectedRow>,
}

#[async_trait]
pub trait CustomerBackend: Send + Sync {
    async fn fetch_records(&self) -> Result<Vec<Customer>, BackendError>;

    async fn create_record(
        &self,
        data: &CreateCustomer,
        reference_number: Option<&str>,
    ) -> Result<Customer, BackendError>;

    async fn bulk_delete(&self, ids: &[i64]) -> Result<BulkResponse, BackendError>;

    async fn bulk_set_status(&self, ids: &[i64], status: &str)
    -> Result<BulkResponse, BackendError>;

    async fn bulk_transfer_owner(
        &self,
        ids: &[i64],
        field: OwnerField,
        new_owner: &str,
    ) -> Result<BulkResponse, BackendError>;

    async fn update_reference_numbers(
        &self,
        updates: &[ReferenceUpdate],
    ) -> Result<BulkResponse, BackendError>;

    async fn max_reference_suffix(&self, prefix: &str) -> Result<i64, BackendError>;

    /// Rejected rows are reported individually. An `Err` means no row of the
    /// batch was written.
    async fn import_batch(&self, rows: &[CreateCustomer])
    -> Result<ImportBatchResponse, BackendError>;
}

pub struct PgCustomerBackend {
    db: DBService,
}

impl PgCustomerBackend {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    /// Connection-level failures are transport errors; anything the database
    /// itself rejected is reported back as an unsuccessful response.
    fn into_response(
        operation: &str,
        result: Result<u64, sqlx::Error>,
    ) -> Result<BulkResponse, BackendError> {
        match result {
            Ok(affected) => Ok(BulkResponse::ok(affected)),
            Err(e) if is_transport(&e) => {
                error!(operation, error = %e, "Bulk request could not reach the database");
                Err(BackendError::Database(e))
            }
            Err(e) => {
                warn!(operation, error = %e, "Bulk request rejected by the database");
                Ok(BulkResponse::failed(e.to_string()))
            }
        }
    }
}

fn is_transport(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

#[async_trait]
impl CustomerBackend for PgCustomerBackend {
    async fn fetch_records(&self) -> Result<Vec<Customer>, BackendError> {
        Ok(Customer::find_all(&self.db.pool).await?)
    }

    async fn create_record(
        &self,
        data: &CreateCustomer,
        reference_number: Option<&str>,
    ) -> Result<Customer, BackendError> {
        Ok(Customer::create(&self.db.pool, data, reference_number).await?)
    }

    async fn bulk_delete(&self, ids: &[i64]) -> Result<BulkResponse, BackendError> {
        Self::into_response("delete", Customer::delete_many(&self.db.pool, ids).await)
    }

    async fn bulk_set_status(
        &self,
        ids: &[i64],
        status: &str,
    ) -> Result<BulkResponse, BackendError> {
        Self::into_response(
            "set_status",
            Customer::set_status_many(&self.db.pool, ids, status).await,
        )
    }

    async fn bulk_transfer_owner(
        &self,
        ids: &[i64],
        field: OwnerField,
        new_owner: &str,
    ) -> Result<BulkResponse, BackendError> {
        Self::into_response(
            "transfer_owner",
            Customer::transfer_owner_many(&self.db.pool, ids, field, new_owner).await,
        )
    }

    async fn update_reference_numbers(
        &self,
        updates: &[ReferenceUpdate],
    ) -> Result<BulkResponse, BackendError> {
        Self::into_response(
            "update_reference_numbers",
            Customer::update_reference_numbers(&self.db.pool, updates).await,
        )
    }

    async fn max_reference_suffix(&self, prefix: &str) -> Result<i64, BackendError> {
        Ok(Customer::max_reference_suffix(&self.db.pool, prefix).await?)
    }

    /// One transaction per batch, one savepoint per row. A rejected row rolls
    /// back only its savepoint; a transport error drops the transaction, so the
    /// batch is either committed with its rejections or not written at all.
    async fn import_batch(
        &self,
        rows: &[CreateCustomer],
    ) -> Result<ImportBatchResponse, BackendError> {
        let mut tx = self.db.pool.begin().await?;
        let mut response = ImportBatchResponse::default();
        for (index, row) in rows.iter().enumerate() {
            let mut savepoint = Connection::begin(&mut *tx).await?;
            match Customer::create(&mut *savepoint, row, None).await {
                Ok(customer) => {
                    savepoint.commit().await?;
                    response.inserted.push(customer);
                }
                Err(e) if is_transport(&e) => {
                    error!(index, error = %e, "Import batch lost its connection, rolled back");
                    return Err(e.into());
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    response.rejected.push(RejectedRow {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }
        tx.commit().await?;
        Ok(response)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory backend with scripted failures.

    use std::{
        collections::HashSet,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use chrono::Utc;

    use super::*;

    pub fn customer(id: i64, company: &str, number: &str, person: &str) -> Customer {
        let now = Utc::now();
        Customer {
            id,
            reference_number: None,
            company_name: company.to_string(),
            contact_person: person.to_string(),
            contact_number: number.to_string(),
            email_address: String::new(),
            address: String::new(),
            region: "NCR".to_string(),
            type_client: None,
            status: None,
            tsa: None,
            tsm: None,
            manager: None,
            remarks: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[derive(Default)]
    pub struct MemoryBackend {
        pub records: Mutex<Vec<Customer>>,
        /// Any chunk containing one of these ids is rejected with `rejection`.
        pub reject_ids: HashSet<i64>,
        pub rejection: String,
        /// 1-based call numbers that fail with a transport error.
        pub transport_failures: HashSet<usize>,
        /// Company names the store refuses on import.
        pub reject_companies: HashSet<String>,
        /// Row index within an import batch that loses the connection. The
        /// batch is rolled back, as a transaction would be.
        pub import_transport_failure_at: Option<usize>,
        pub calls: AtomicUsize,
        pub chunk_sizes: Mutex<Vec<usize>>,
        pub max_suffix: Mutex<i64>,
        next_id: AtomicUsize,
    }

    impl MemoryBackend {
        pub fn with_records(records: Vec<Customer>) -> Self {
            let next = records.iter().map(|r| r.id).max().unwrap_or(0) as usize + 1;
            Self {
                records: Mutex::new(records),
                rejection: "permission denied for table customers".to_string(),
                next_id: AtomicUsize::new(next),
                ..Default::default()
            }
        }

        pub fn ids(&self) -> Vec<i64> {
            self.records.lock().unwrap().iter().map(|r| r.id).collect()
        }

        fn begin(&self, ids: &[i64]) -> Result<Option<BulkResponse>, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.chunk_sizes.lock().unwrap().push(ids.len());
            if self.transport_failures.contains(&call) {
                return Err(BackendError::Transport("connection reset by peer".to_string()));
            }
            if ids.iter().any(|id| self.reject_ids.contains(id)) {
                return Ok(Some(BulkResponse::failed(self.rejection.clone())));
            }
            Ok(None)
        }

        fn update(&self, ids: &[i64], apply: impl Fn(&mut Customer)) -> u64 {
            let mut records = self.records.lock().unwrap();
            let mut affected = 0;
            for record in records.iter_mut().filter(|r| ids.contains(&r.id)) {
                apply(record);
                affected += 1;
            }
            affected
        }
    }

    #[async_trait]
    impl CustomerBackend for MemoryBackend {
        async fn fetch_records(&self) -> Result<Vec<Customer>, BackendError> {
            self.begin(&[])?;
            Ok(self.records.lock().unwrap().clone())
        }

        async fn create_record(
            &self,
            data: &CreateCustomer,
            reference_number: Option<&str>,
        ) -> Result<Customer, BackendError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64;
            let mut record = customer(
                id,
                &data.company_name,
                &data.contact_number,
                &data.contact_person,
            );
            record.region = data.region.clone();
            record.type_client = data.type_client.clone();
            record.status = data.status.clone();
            record.reference_number = reference_number.map(str::to_string);
            self.records.lock().unwrap().push(record.clone());
            Ok(record)
        }

        async fn bulk_delete(&self, ids: &[i64]) -> Result<BulkResponse, BackendError> {
            if let Some(rejected) = self.begin(ids)? {
                return Ok(rejected);
            }
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|r| !ids.contains(&r.id));
            Ok(BulkResponse::ok((before - records.len()) as u64))
        }

        async fn bulk_set_status(
            &self,
            ids: &[i64],
            status: &str,
        ) -> Result<BulkResponse, BackendError> {
            if let Some(rejected) = self.begin(ids)? {
                return Ok(rejected);
            }
            let affected = self.update(ids, |r| r.status = Some(status.to_string()));
            Ok(BulkResponse::ok(affected))
        }

        async fn bulk_transfer_owner(
            &self,
            ids: &[i64],
            field: OwnerField,
            new_owner: &str,
        ) -> Result<BulkResponse, BackendError> {
            if let Some(rejected) = self.begin(ids)? {
                return Ok(rejected);
            }
            let affected = self.update(ids, |r| match field {
                OwnerField::Tsm => r.tsm = Some(new_owner.to_string()),
                OwnerField::Manager => r.manager = Some(new_owner.to_string()),
            });
            Ok(BulkResponse::ok(affected))
        }

        async fn update_reference_numbers(
            &self,
            updates: &[ReferenceUpdate],
        ) -> Result<BulkResponse, BackendError> {
            let ids: Vec<i64> = updates.iter().map(|u| u.id).collect();
            if let Some(rejected) = self.begin(&ids)? {
                return Ok(rejected);
            }
            let mut affected = 0;
            for update in updates {
                affected += self.update(&[update.id], |r| {
                    r.reference_number = Some(update.reference_number.clone())
                });
            }
            Ok(BulkResponse::ok(affected))
        }

        async fn max_reference_suffix(&self, prefix: &str) -> Result<i64, BackendError> {
            self.begin(&[])?;
            let stored = self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter_map(|r| r.reference_number.as_deref())
                .filter_map(|reference| reference.strip_prefix(prefix))
                .filter_map(|suffix| suffix.parse::<i64>().ok())
                .max()
                .unwrap_or(0);
            Ok(stored.max(*self.max_suffix.lock().unwrap()))
        }

        async fn import_batch(
            &self,
            rows: &[CreateCustomer],
        ) -> Result<ImportBatchResponse, BackendError> {
            self.begin(&[])?;
            let committed = self.records.lock().unwrap().len();
            let mut response = ImportBatchResponse::default();
            for (index, row) in rows.iter().enumerate() {
                if self.import_transport_failure_at == Some(index) {
                    self.records.lock().unwrap().truncate(committed);
                    return Err(BackendError::Transport("connection reset by peer".to_string()));
                }
                if self.reject_companies.contains(&row.company_name) {
                    response.rejected.push(RejectedRow {
                        index,
                        reason: format!(
                            "duplicate key value violates unique constraint for {}",
                            row.company_name
                        ),
                    });
                    continue;
                }
                response.inserted.push(self.create_record(row, None).await?);
            }
            Ok(response)
        }
    }
}
