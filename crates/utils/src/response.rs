use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Envelope returned by every HTTP handler.
#[derive(Debug, Serialize, Deserialize, TS)]
pub struct ApiResponse<T, E = T> {
    success: bool,
    data: Option<T>,
    error_data: Option<E>,
    message: Option<String>,
}

impl<T, E> ApiResponse<T, E> {
    /// Creates a successful response, with `data` and no message.
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            message: None,
            error_data: None,
        }
    }

    /// Creates an error response, with `message` and no data.
    pub fn error(message: &str) -> Self {
        ApiResponse {
            success: false,
            data: None,
            message: Some(message.to_string()),
            error_data: None,
        }
    }

    /// Creates an error response carrying structured data alongside the message.
    pub fn error_with_data(message: &str, data: E) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error_data: Some(data),
            message: Some(message.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}
