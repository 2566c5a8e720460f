//! Inpatient service reports pulled from the medical information system
//! gateway: download, normalization, payment-source enrichment and export.

pub mod cache;
pub mod common;
pub mod constants;
pub mod enrich;
pub mod episodes;
pub mod error;
pub mod export;
pub mod gateway;
pub mod lab_orders;
pub mod normalize;
pub mod patients;
pub mod pay_types;
pub mod retry;
pub mod row;

pub use cache::LookupCache;
pub use enrich::{EnrichmentCaches, EnrichmentEngine, EnrichmentSummary};
pub use error::{GatewayError, NormalizeError, ReportError};
pub use gateway::{Gateway, GatewayConfig, HttpGateway};
pub use lab_orders::{EmployerCategories, LabCaches, LabOrdersReport, LabOrdersReporter};
pub use normalize::{NormalizeSummary, normalize};
pub use patients::{PatientServicesReport, PatientServicesReporter};
pub use pay_types::PayTypeTable;
pub use retry::RetryPolicy;
pub use row::PatientServiceRow;
