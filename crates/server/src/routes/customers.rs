//! Customer reconciliation endpoints.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json as ResponseJson, Response},
    routing::{get, post},
};
use chrono::NaiveDate;
use db::models::customer::{CreateCustomer, Customer, OwnerField};
use serde::{Deserialize, Serialize};
use services::services::{
    bulk_mutation::{BulkOperation, BulkOutcome, BulkState},
    completeness::{AuditCategory, AuditSummary},
    csv_export::{CUSTOMER_COLUMNS, export_records},
    csv_import::ImportReport,
    pagination::Page,
    record_store::Mutation,
    session::ReconciliationSession,
    working_set::{DateRange, FilterState, SortDirection, SortKey},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

/// Query parameters mirroring the filter state, plus paging.
#[derive(Debug, Default, Deserialize, TS)]
#[serde(default)]
pub struct ListQuery {
    pub search: Option<String>,
    #[serde(rename = "type")]
    pub type_filter: Option<String>,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub category: Option<AuditCategory>,
    pub sort: Option<SortKey>,
    pub direction: Option<SortDirection>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    /// Refetch every record before filtering.
    pub refresh: bool,
}

impl ListQuery {
    pub fn filter_state(&self) -> FilterState {
        let defaults = FilterState::default();
        FilterState {
            search_text: self.search.clone().unwrap_or(defaults.search_text),
            type_filter: self.type_filter.clone().unwrap_or(defaults.type_filter),
            status_filter: self.status.clone().unwrap_or(defaults.status_filter),
            owner_filter: self.owner.clone().unwrap_or(defaults.owner_filter),
            date_range: DateRange {
                start: self.start,
                end: self.end,
            },
            audit_category: self.category,
            sort_key: self.sort.unwrap_or(defaults.sort_key),
            sort_direction: self.direction.unwrap_or(defaults.sort_direction),
        }
    }
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct SelectionRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct StatusRequest {
    pub ids: Vec<i64>,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct TransferRequest {
    pub ids: Vec<i64>,
    pub field: OwnerField,
    pub new_owner: String,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct AuditResponse {
    pub summary: AuditSummary,
    pub duplicate_groups: Vec<Vec<i64>>,
    pub missing_type: Vec<i64>,
    pub missing_status: Vec<i64>,
}

fn sorted(ids: impl IntoIterator<Item = i64>) -> Vec<i64> {
    let mut ids: Vec<i64> = ids.into_iter().collect();
    ids.sort_unstable();
    ids
}

/// Applies the query's filter, running the audit first when a category needs it.
fn apply_query(session: &mut ReconciliationSession<Customer>, query: &ListQuery) {
    if query.category.is_some() && session.audit().is_none() {
        session.run_audit();
    }
    session.set_filter(query.filter_state());
    session.set_page(query.page.unwrap_or(1));
}

/// Filtered, sorted page of customers
pub async fn list_customers(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<ResponseJson<ApiResponse<Page<Customer>>>, ApiError> {
    if query.refresh {
        state.reload().await?;
    }
    let mut session = state.session.lock().await;
    apply_query(&mut session, &query);
    let page = session.current_page(query.page_size.unwrap_or(state.config.page_size));
    Ok(ResponseJson(ApiResponse::success(page)))
}

/// Create a customer with a generated reference number
pub async fn create_customer(
    State(state): State<AppState>,
    Json(payload): Json<CreateCustomer>,
) -> Result<ResponseJson<ApiResponse<Customer>>, ApiError> {
    if payload.company_name.trim().is_empty() {
        return Err(ApiError::BadRequest("company name is required".to_string()));
    }

    let reference = state
        .references
        .generate(&payload.company_name, &payload.region)
        .await?;
    let customer = state.backend.create_record(&payload, Some(&reference)).await?;
    info!(id = customer.id, reference_number = %reference, "Customer created");

    state
        .session
        .lock()
        .await
        .apply(Mutation::InsertMany(vec![customer.clone()]));
    Ok(ResponseJson(ApiResponse::success(customer)))
}

/// Run the duplicate and completeness audit
pub async fn audit_customers(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<AuditResponse>>, ApiError> {
    let mut session = state.session.lock().await;
    let report = session.run_audit();
    let response = AuditResponse {
        summary: report.summary(),
        duplicate_groups: report.duplicates().groups().to_vec(),
        missing_type: sorted(report.missing_type().iter().copied()),
        missing_status: sorted(report.missing_status().iter().copied()),
    };
    Ok(ResponseJson(ApiResponse::success(response)))
}

/// A run where every chunk failed is reported as an error carrying the store's message.
fn outcome_response(outcome: BulkOutcome) -> Response {
    if outcome.state == BulkState::Failed {
        let message = outcome
            .error_message()
            .unwrap_or("bulk operation failed")
            .to_string();
        let body = ApiResponse::<BulkOutcome>::error_with_data(&message, outcome);
        return (StatusCode::BAD_GATEWAY, ResponseJson(body)).into_response();
    }
    ResponseJson(ApiResponse::<BulkOutcome>::success(outcome)).into_response()
}

fn log_progress(completed: usize, total: usize) {
    debug!(completed, total, "Bulk progress");
}

async fn run_bulk(
    state: &AppState,
    ids: Vec<i64>,
    operation: BulkOperation,
) -> Result<Response, ApiError> {
    // Claimed before waiting on the session so a queued duplicate is refused.
    let claim = state.orchestrator.claim()?;
    let mut session = state.session.lock().await;
    session.clear_selection();
    session.select(ids);
    let outcome = claim
        .run(&mut session, operation, &CancellationToken::new(), log_progress)
        .await?;
    Ok(outcome_response(outcome))
}

/// Delete the given customers in chunks
pub async fn bulk_delete(
    State(state): State<AppState>,
    Json(request): Json<SelectionRequest>,
) -> Result<Response, ApiError> {
    run_bulk(&state, request.ids, BulkOperation::Delete).await
}

/// Set one status on the given customers
pub async fn bulk_set_status(
    State(state): State<AppState>,
    Json(request): Json<StatusRequest>,
) -> Result<Response, ApiError> {
    run_bulk(
        &state,
        request.ids,
        BulkOperation::SetStatus {
            status: request.status,
        },
    )
    .await
}

/// Move the given customers to a new TSM or manager
pub async fn bulk_transfer(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<Response, ApiError> {
    run_bulk(
        &state,
        request.ids,
        BulkOperation::TransferOwner {
            field: request.field,
            new_owner: request.new_owner,
        },
    )
    .await
}

/// Audits the current records, then sets `Active` where only the status is missing.
pub async fn bulk_default_status(State(state): State<AppState>) -> Result<Response, ApiError> {
    let claim = state.orchestrator.claim()?;
    let mut session = state.session.lock().await;
    session.run_audit();
    let outcome = claim
        .default_missing_status(&mut session, &CancellationToken::new(), log_progress)
        .await?;
    Ok(outcome_response(outcome))
}

/// Number the given customers in request order
pub async fn assign_reference_numbers(
    State(state): State<AppState>,
    Json(request): Json<SelectionRequest>,
) -> Result<Response, ApiError> {
    let claim = state.orchestrator.claim()?;
    let mut session = state.session.lock().await;
    session.clear_selection();
    session.select(request.ids);
    let outcome = claim
        .assign_batch_references(&mut session, &CancellationToken::new(), log_progress)
        .await?;
    Ok(outcome_response(outcome))
}

/// Working set as a CSV download
pub async fn export_customers(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let mut session = state.session.lock().await;
    apply_query(&mut session, &query);
    let working = session.working_set();
    let csv = export_records(&working, CUSTOMER_COLUMNS, &CancellationToken::new())?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"customers.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

/// Insert rows in chunks and report the ones that failed
pub async fn import_customers(
    State(state): State<AppState>,
    Json(rows): Json<Vec<CreateCustomer>>,
) -> Result<ResponseJson<ApiResponse<ImportReport>>, ApiError> {
    let mut session = state.session.lock().await;
    let report = state
        .importer
        .import(&mut session, rows, &CancellationToken::new(), |done, total| {
            debug!(done, total, "Import progress")
        })
        .await?;
    Ok(ResponseJson(ApiResponse::success(report)))
}

pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/customers",
        Router::new()
            .route("/", get(list_customers).post(create_customer))
            .route("/audit", get(audit_customers))
            .route("/bulk/delete", post(bulk_delete))
            .route("/bulk/status", post(bulk_set_status))
            .route("/bulk/transfer", post(bulk_transfer))
            .route("/bulk/default-status", post(bulk_default_status))
            .route("/reference-numbers", post(assign_reference_numbers))
            .route("/export", get(export_customers))
            .route("/import", post(import_customers)),
    )
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::Request,
    };
    use chrono::Utc;
    use db::models::customer::ReferenceUpdate;
    use serde_json::{Value, json};
    use services::services::{
        backend::{BackendError, BulkResponse, CustomerBackend, ImportBatchResponse},
        config::{DATABASE_URL, PortalConfig},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::routes;

    fn customer(id: i64, company: &str, status: Option<&str>) -> Customer {
        Customer {
            id,
            reference_number: None,
            company_name: company.to_string(),
            contact_person: "Jane".to_string(),
            contact_number: "555-1".to_string(),
            email_address: String::new(),
            address: String::new(),
            region: "NCR".to_string(),
            type_client: Some("VIP".to_string()),
            status: status.map(str::to_string),
            tsa: None,
            tsm: None,
            manager: None,
            remarks: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Accepts every write; `fail_bulk` turns bulk calls into store rejections.
    struct StubBackend {
        records: Mutex<Vec<Customer>>,
        fail_bulk: bool,
        bulk_calls: AtomicUsize,
    }

    impl StubBackend {
        fn new(fail_bulk: bool) -> Self {
            Self {
                records: Mutex::new(vec![
                    customer(1, "Acme Corp", Some("Active")),
                    customer(2, "Acme Corp", None),
                    customer(3, "Beta LLC", Some("Pending")),
                ]),
                fail_bulk,
                bulk_calls: AtomicUsize::new(0),
            }
        }

        fn respond(&self) -> BulkResponse {
            self.bulk_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_bulk {
                BulkResponse::failed("row-level security policy violation")
            } else {
                BulkResponse::ok(1)
            }
        }
    }

    #[async_trait]
    impl CustomerBackend for StubBackend {
        async fn fetch_records(&self) -> Result<Vec<Customer>, BackendError> {
            Ok(self.records.lock().unwrap().clone())
        }

        async fn create_record(
            &self,
            data: &CreateCustomer,
            reference_number: Option<&str>,
        ) -> Result<Customer, BackendError> {
            let mut record = customer(100, &data.company_name, data.status.as_deref());
            record.reference_number = reference_number.map(str::to_string);
            Ok(record)
        }

        async fn bulk_delete(&self, _ids: &[i64]) -> Result<BulkResponse, BackendError> {
            Ok(self.respond())
        }

        async fn bulk_set_status(
            &self,
            _ids: &[i64],
            _status: &str,
        ) -> Result<BulkResponse, BackendError> {
            Ok(self.respond())
        }

        async fn bulk_transfer_owner(
            &self,
            _ids: &[i64],
            _field: OwnerField,
            _new_owner: &str,
        ) -> Result<BulkResponse, BackendError> {
            Ok(self.respond())
        }

        async fn update_reference_numbers(
            &self,
            _updates: &[ReferenceUpdate],
        ) -> Result<BulkResponse, BackendError> {
            Ok(self.respond())
        }

        async fn max_reference_suffix(&self, _prefix: &str) -> Result<i64, BackendError> {
            Ok(41)
        }

        async fn import_batch(
            &self,
            _rows: &[CreateCustomer],
        ) -> Result<ImportBatchResponse, BackendError> {
            Ok(ImportBatchResponse::default())
        }
    }

    async fn app_state(backend: Arc<StubBackend>) -> AppState {
        let config = PortalConfig::from_lookup(|key| {
            (key == DATABASE_URL).then(|| "postgres://localhost/test".to_string())
        })
        .unwrap();
        let state = AppState::new(config, backend);
        state.reload().await.unwrap();
        state
    }

    async fn app(fail_bulk: bool) -> Router {
        routes::router(app_state(Arc::new(StubBackend::new(fail_bulk))).await)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let (status, body) = send(
            app(false).await,
            Request::get("/api/customers?search=acme&page_size=1&page=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_items"], 2);
        assert_eq!(body["data"]["total_pages"], 2);
        assert_eq!(body["data"]["items"][0]["id"], 2);
    }

    #[tokio::test]
    async fn audit_category_filter_runs_the_audit() {
        let (_, body) = send(
            app(false).await,
            Request::get("/api/customers?category=missing_status")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(body["data"]["total_items"], 1);
        assert_eq!(body["data"]["items"][0]["id"], 2);
    }

    #[tokio::test]
    async fn audit_reports_duplicates_and_gaps() {
        let (status, body) = send(
            app(false).await,
            Request::get("/api/customers/audit").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["duplicate_groups"], json!([[1, 2]]));
        assert_eq!(body["data"]["missing_status"], json!([2]));
    }

    #[tokio::test]
    async fn create_assigns_sequential_reference() {
        let (status, body) = send(
            app(false).await,
            post_json(
                "/api/customers",
                json!({ "company_name": "Acme Corp", "region": "ncr" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["reference_number"], "AP-NCR-0000042");
    }

    #[tokio::test]
    async fn create_without_company_is_rejected() {
        let (status, body) = send(
            app(false).await,
            post_json("/api/customers", json!({ "region": "NCR" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn bulk_delete_with_no_known_ids_is_rejected() {
        let (status, body) = send(
            app(false).await,
            post_json("/api/customers/bulk/delete", json!({ "ids": [99] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "no records selected");
    }

    #[tokio::test]
    async fn bulk_status_reports_outcome() {
        let (status, body) = send(
            app(false).await,
            post_json(
                "/api/customers/bulk/status",
                json!({ "ids": [1, 3], "status": "Approved" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["state"], "completed");
        assert_eq!(body["data"]["succeeded"], json!([1, 3]));
    }

    #[tokio::test]
    async fn rejected_bulk_surfaces_store_message() {
        let (status, body) = send(
            app(true).await,
            post_json(
                "/api/customers/bulk/transfer",
                json!({ "ids": [1], "field": "TSM", "new_owner": "Maria" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["message"], "row-level security policy violation");
        assert_eq!(body["error_data"]["state"], "failed");
    }

    #[tokio::test]
    async fn export_returns_csv() {
        let response = app(false)
            .await
            .oneshot(
                Request::get("/api/customers/export?search=beta")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let csv = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.contains("\"Beta LLC\""));
    }

    #[tokio::test]
    async fn duplicate_bulk_request_queued_behind_the_session_is_refused() {
        let backend = Arc::new(StubBackend::new(false));
        let state = app_state(backend.clone()).await;
        let router = routes::router(state.clone());
        let request = || {
            post_json(
                "/api/customers/bulk/status",
                json!({ "ids": [1, 3], "status": "Approved" }),
            )
        };

        let session = state.session.lock().await;
        let first = tokio::spawn(send(router.clone(), request()));
        let second = tokio::spawn(send(router.clone(), request()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(session);

        let mut statuses = vec![first.await.unwrap().0, second.await.unwrap().0];
        statuses.sort();
        assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);
        assert_eq!(backend.bulk_calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.orchestrator.state(), BulkState::Completed);
    }

    #[tokio::test]
    async fn default_status_refreshes_the_audit_view() {
        let router = app(false).await;
        let (status, body) = send(
            router.clone(),
            post_json("/api/customers/bulk/default-status", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["succeeded"], json!([2]));

        let (_, body) = send(
            router,
            Request::get("/api/customers?category=missing_status")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(body["data"]["total_items"], 0);
    }
}
