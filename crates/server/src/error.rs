use axum::{
    http::StatusCode,
    response::{IntoResponse, Json as ResponseJson, Response},
};
use services::services::{
    backend::BackendError, bulk_mutation::BulkMutationError, csv_export::ExportError,
    csv_import::ImportError, reference_number::ReferenceNumberError,
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    BulkMutation(#[from] BulkMutationError),
    #[error(transparent)]
    ReferenceNumber(#[from] ReferenceNumberError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BulkMutation(BulkMutationError::AlreadyInProgress) => StatusCode::CONFLICT,
            ApiError::BulkMutation(_) | ApiError::Import(_) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Backend(BackendError::Transport(_))
            | ApiError::ReferenceNumber(ReferenceNumberError::Backend(BackendError::Transport(_))) => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::ReferenceNumber(ReferenceNumberError::SequenceExhausted(_)) => {
                StatusCode::CONFLICT
            }
            ApiError::Export(ExportError::Cancelled(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Backend(_) | ApiError::ReferenceNumber(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
        let body = ApiResponse::<()>::error(&self.to_string());
        (status, ResponseJson(body)).into_response()
    }
}
