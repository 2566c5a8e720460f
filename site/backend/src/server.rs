use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderName, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use report_pipeline::common::format_gateway_date;
use report_pipeline::constants::XLSX_CONTENT_TYPE;
use report_pipeline::export::{
    lab_orders_file_name, lab_orders_workbook, patient_services_workbook, report_file_name,
};
use report_pipeline::ReportError;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cli::{ServeArgs, Settings};
use crate::pipeline::Pipeline;

const API_KEY_HEADER: &str = "x-api-key";
const SUMMARY_HEADER: HeaderName = HeaderName::from_static("x-report-summary");

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    api_key: Option<Arc<str>>,
    report_timeout: Duration,
}

pub async fn run(settings: Settings, opts: ServeArgs) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_settings(&settings)?;
    if opts.api_key.is_none() {
        tracing::warn!("API_KEY is not set; report endpoints accept unauthenticated requests");
    }

    let state = AppState {
        pipeline: Arc::new(pipeline),
        api_key: opts.api_key.map(Arc::from),
        report_timeout: Duration::from_secs(opts.report_timeout),
    };
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", opts.host, opts.port)
        .parse()
        .context("parse host:port")?;

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let reports = Router::new()
        .route("/report/32430", get(inpatient_report))
        .route("/report/invitro", get(lab_orders_report))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .merge(reports)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("invalid or missing API key")]
    Unauthorized,
    #[error("report did not finish within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Report(#[from] ReportError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Report(ReportError::InvalidDate { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Report(err) if err.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Report(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed with {}: {}", status, self);
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

async fn require_api_key(State(st): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(expected) = &st.api_key {
        let provided = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_ref()) {
            return ApiError::Unauthorized.into_response();
        }
    }
    next.run(req).await
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct PeriodParams {
    start_date: Option<String>,
    end_date: Option<String>,
}

impl PeriodParams {
    /// Missing bounds default to today.
    fn resolve(self) -> (String, String) {
        let today = format_gateway_date(chrono::Local::now().date_naive());
        (
            self.start_date.unwrap_or_else(|| today.clone()),
            self.end_date.unwrap_or(today),
        )
    }
}

fn xlsx_attachment(bytes: Vec<u8>, file_name: &str, summary: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
            (SUMMARY_HEADER, summary),
        ],
        bytes,
    )
        .into_response()
}

async fn inpatient_report(
    State(st): State<AppState>,
    Query(p): Query<PeriodParams>,
) -> Result<Response, ApiError> {
    let (start_date, end_date) = p.resolve();
    let reporter = st.pipeline.patient_services();
    let report = tokio::time::timeout(
        st.report_timeout,
        reporter.get_list_patients_with_services(&start_date, &end_date),
    )
    .await
    .map_err(|_| ApiError::Timeout(st.report_timeout))??;

    let bytes = patient_services_workbook(&report.rows).map_err(ReportError::from)?;
    let name = report_file_name(report.start_date, report.end_date);
    Ok(xlsx_attachment(bytes, &name, report.to_string()))
}

async fn lab_orders_report(
    State(st): State<AppState>,
    Query(p): Query<PeriodParams>,
) -> Result<Response, ApiError> {
    let (start_date, end_date) = p.resolve();
    let reporter = st.pipeline.lab_orders();
    let report = tokio::time::timeout(
        st.report_timeout,
        reporter.build_lab_orders_report(&start_date, &end_date),
    )
    .await
    .map_err(|_| ApiError::Timeout(st.report_timeout))??;

    let bytes = lab_orders_workbook(&report.rows).map_err(ReportError::from)?;
    let name = lab_orders_file_name(report.start_date, report.end_date);
    Ok(xlsx_attachment(bytes, &name, report.summary.to_string()))
}
