use std::time::Duration;

use thiserror::Error;

/// Failure of a single gateway call.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway transport error ({operation}): {message}")]
    Transport {
        operation: String,
        message: String,
        /// Connect failures, timeouts and mid-body disconnects.
        transient: bool,
    },

    #[error("gateway returned {status} for {operation}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("gateway payload for {operation} is malformed: {message}")]
    Payload { operation: String, message: String },

    #[error("{operation} did not finish within {budget:?} including retries")]
    RetryBudgetExceeded { operation: String, budget: Duration },
}

impl GatewayError {
    /// Only transport-layer faults are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transport { transient: true, .. })
    }
}

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("downloaded file is not an XLSX (zip) container; starts with: {preview}")]
    Format { preview: String },

    #[error("failed reading workbook: {0}")]
    Workbook(String),
}

/// Batch-level failure of a report request.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("invalid {field} '{value}', expected DD.MM.YYYY")]
    InvalidDate { field: &'static str, value: String },

    #[error("gateway unavailable: {0}")]
    ServiceUnavailable(#[source] GatewayError),

    #[error("report processing failed: {0}")]
    Processing(#[from] NormalizeError),

    #[error("failed writing report workbook: {0}")]
    Assembly(#[from] rust_xlsxwriter::XlsxError),

    #[error("report worker stopped unexpectedly: {0}")]
    Worker(String),
}

impl ReportError {
    /// True when the upstream could not be reached, as opposed to returning
    /// data we could not process.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ReportError::ServiceUnavailable(_))
    }
}
