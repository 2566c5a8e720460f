use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use indicatif::ProgressBar;
use serde::Serialize;
use serde_json::{Value, json};

use crate::common::{format_gateway_date, parse_gateway_date};
use crate::constants::{INPATIENT_REPORT_ID, LPU_ID, PMUSER_ID, REGION_CODE};
use crate::enrich::{EnrichmentCaches, EnrichmentEngine, EnrichmentSummary};
use crate::error::ReportError;
use crate::gateway::{DOWNLOAD_PATH, Gateway};
use crate::normalize::{NormalizeSummary, normalize};
use crate::pay_types::PayTypeTable;
use crate::retry::RetryPolicy;
use crate::row::PatientServiceRow;

/// Inpatient services of a period, enriched with payment sources.
#[derive(Debug, Clone, Serialize)]
pub struct PatientServicesReport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rows: Vec<PatientServiceRow>,
    pub normalize: NormalizeSummary,
    pub enrichment: EnrichmentSummary,
}

/// Compact one-line summary, also sent in the `X-Report-Summary` header.
impl fmt::Display for PatientServicesReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows={} duplicates={} blank={} unparsable={} matched={} missed={} failed={} ambiguous={}",
            self.rows.len(),
            self.normalize.duplicates,
            self.normalize.blank,
            self.normalize.unparsable,
            self.enrichment.matched,
            self.enrichment.missed,
            self.enrichment.failed,
            self.enrichment.ambiguous
        )
    }
}

/// Parses a `DD.MM.YYYY` request parameter.
pub fn parse_report_date(field: &'static str, value: &str) -> Result<NaiveDate, ReportError> {
    parse_gateway_date(value).ok_or_else(|| ReportError::InvalidDate {
        field,
        value: value.to_string(),
    })
}

/// Query string understood by the report runner for the inpatient export.
pub fn inpatient_report_params(start_date: &str, end_date: &str) -> String {
    [
        format!("paramLpu={LPU_ID}"),
        "__isnull=paramLpuBuilding".to_string(),
        "__isnull=paramLpuUnit".to_string(),
        "__isnull=paramLpuSection".to_string(),
        "__isnull=paramMedStaffFact".to_string(),
        format!("paramBegDate={start_date}"),
        format!("paramEndDate={end_date}"),
        "__isnull=paramUslugaClass".to_string(),
        "paramDataOtch=1".to_string(),
        "paramOnSection=1".to_string(),
        "__isnull=paramPrehospRefuse".to_string(),
        format!("param_RegionCode={REGION_CODE}"),
        format!("param_pmuser_id={PMUSER_ID}"),
    ]
    .join("&")
}

pub fn inpatient_download_payload(start_date: &str, end_date: &str) -> Value {
    json!({
        "path": "/",
        "method": "GET",
        "params": {
            "c": "ReportRun",
            "m": "Run",
            "Report_id": INPATIENT_REPORT_ID,
            "Report_Params": inpatient_report_params(start_date, end_date),
            "__format": "xlsx",
            "__asattachment": "true",
        },
    })
}

/// Downloads, normalizes and enriches the inpatient services export.
pub struct PatientServicesReporter<G> {
    gateway: Arc<G>,
    retry: RetryPolicy,
    engine: EnrichmentEngine<G>,
}

impl<G: Gateway> PatientServicesReporter<G> {
    pub fn new(
        gateway: Arc<G>,
        caches: Arc<EnrichmentCaches>,
        retry: RetryPolicy,
        pay_types: Arc<PayTypeTable>,
    ) -> Self {
        let engine = EnrichmentEngine::new(Arc::clone(&gateway), caches, retry, pay_types);
        Self {
            gateway,
            retry,
            engine,
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.engine = self.engine.with_progress(progress);
        self
    }

    pub async fn get_list_patients_with_services(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> Result<PatientServicesReport, ReportError> {
        let start = parse_report_date("start_date", start_date)?;
        let end = parse_report_date("end_date", end_date)?;
        let (start_text, end_text) = (format_gateway_date(start), format_gateway_date(end));

        tracing::info!("Downloading report {} for {} - {}", INPATIENT_REPORT_ID, start_text, end_text);
        let payload = inpatient_download_payload(&start_text, &end_text);
        let bytes = self
            .retry
            .run("report download", || self.gateway.download(DOWNLOAD_PATH, &payload))
            .await
            .map_err(|err| {
                tracing::error!("Report {} download failed: {}", INPATIENT_REPORT_ID, err);
                ReportError::ServiceUnavailable(err)
            })?;
        tracing::info!("Downloaded {} bytes", bytes.len());

        let normalized = tokio::task::spawn_blocking(move || normalize(&bytes))
            .await
            .map_err(|e| ReportError::Worker(e.to_string()))?
            .inspect_err(|err| tracing::error!("Report {} is unreadable: {}", INPATIENT_REPORT_ID, err))?;

        let mut rows = normalized.rows;
        let enrichment = self.engine.enrich(&mut rows).await;

        let report = PatientServicesReport {
            start_date: start,
            end_date: end,
            rows,
            normalize: normalized.summary,
            enrichment,
        };
        tracing::info!("Report {} ready: {}", INPATIENT_REPORT_ID, report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::tests::{ScriptedGateway, transient};
    use crate::error::{GatewayError, NormalizeError};
    use crate::row::col;
    use rust_xlsxwriter::Workbook;
    use std::time::Duration;

    fn reporter(gateway: Arc<ScriptedGateway>) -> PatientServicesReporter<ScriptedGateway> {
        PatientServicesReporter::new(
            gateway,
            Arc::new(EnrichmentCaches::default()),
            RetryPolicy::default(),
            Arc::new(PayTypeTable::builtin()),
        )
    }

    /// Export with five title rows, two identical service lines and a footer.
    fn export() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Отчет 32430").unwrap();
        for row in [5, 6] {
            sheet.write_string(row, 0, "1").unwrap();
            sheet.write_string(row, col::FULL_NAME as u16, "Иванов Иван").unwrap();
            sheet.write_string(row, col::CARD_NUMBER as u16, "123").unwrap();
            sheet.write_string(row, col::START_DATE as u16, "01.11.2025").unwrap();
            sheet.write_string(row, col::SERVICE_CODE as u16, "A01").unwrap();
            sheet.write_string(row, col::SERVICE_DATE as u16, "13.11.2025").unwrap();
        }
        sheet.write_string(7, 0, "Итого").unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn report_params_carry_the_period() {
        let params = inpatient_report_params("01.11.2025", "30.11.2025");
        assert!(params.starts_with("paramLpu=13102423&"));
        assert!(params.contains("&paramBegDate=01.11.2025&paramEndDate=30.11.2025&"));
        assert!(params.ends_with("param_pmuser_id=461432278617"));

        let payload = inpatient_download_payload("01.11.2025", "30.11.2025");
        assert_eq!(payload["params"]["Report_id"], "32430");
        assert_eq!(payload["params"]["__format"], "xlsx");
    }

    #[tokio::test]
    async fn invalid_dates_are_rejected_before_any_call() {
        let gateway = Arc::new(ScriptedGateway::default());
        let err = reporter(gateway.clone())
            .get_list_patients_with_services("2025-11-01", "30.11.2025")
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::InvalidDate { field: "start_date", .. }));
        assert!(gateway.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn download_failure_is_service_unavailable() {
        let gateway = Arc::new(ScriptedGateway::default());
        *gateway.download_body.lock().unwrap() = Some(Err(GatewayError::Status {
            operation: "download /gateway/download".to_string(),
            status: 503,
            body: "maintenance".to_string(),
        }));
        let err = reporter(gateway)
            .get_list_patients_with_services("01.11.2025", "30.11.2025")
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_download_retries_are_service_unavailable() {
        let gateway = Arc::new(ScriptedGateway::default());
        *gateway.download_body.lock().unwrap() = Some(Err(transient()));
        let reporter = PatientServicesReporter::new(
            gateway,
            Arc::new(EnrichmentCaches::default()),
            RetryPolicy::new(1, Duration::from_secs(2)),
            Arc::new(PayTypeTable::builtin()),
        );
        let err = reporter
            .get_list_patients_with_services("01.11.2025", "30.11.2025")
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::ServiceUnavailable(e) if e.is_transient()));
    }

    #[tokio::test]
    async fn html_error_page_is_a_processing_error() {
        let gateway = Arc::new(ScriptedGateway::default());
        *gateway.download_body.lock().unwrap() = Some(Ok(b"<html>Session expired</html>".to_vec()));
        let err = reporter(gateway)
            .get_list_patients_with_services("01.11.2025", "30.11.2025")
            .await
            .unwrap_err();
        match err {
            ReportError::Processing(NormalizeError::Format { preview }) => {
                assert!(preview.contains("Session expired"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn export_is_normalized_and_enriched() {
        let gateway = Arc::new(ScriptedGateway::default());
        *gateway.download_body.lock().unwrap() = Some(Ok(export()));
        gateway.always("searchData", json!({"data": [{"EvnPS_id": 42}]}));
        gateway.always(
            "loadEvnUslugaGrid",
            json!([{"EvnUsluga_setDate": "13.11.2025", "Usluga_Code": "A01", "PayType_id": 1}]),
        );

        let report = reporter(gateway)
            .get_list_patients_with_services("01.11.2025", "30.11.2025")
            .await
            .unwrap();

        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.normalize.duplicates, 1);
        assert_eq!(report.normalize.footer_row, Some(8));
        assert_eq!(report.rows[0].payment_source.as_deref(), Some("ОМС"));
        assert_eq!(report.enrichment.matched, 1);
        assert_eq!(
            report.to_string(),
            "rows=1 duplicates=1 blank=0 unparsable=0 matched=1 missed=0 failed=0 ambiguous=0"
        );
    }
}
