//! Completed laboratory requests of a period, one row per ordered service,
//! with payment type, service code and the patient's employer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::cache::{DEFAULT_CAPACITY, LookupCache};
use crate::common::format_gateway_date;
use crate::constants::{LAB_MED_SERVICE_ID, LAB_SERVICE_COMPLEX_PARENT_ID};
use crate::episodes::scalar_text;
use crate::error::{GatewayError, ReportError};
use crate::gateway::{Gateway, rpc_payload};
use crate::pay_types::PayTypeTable;
use crate::patients::parse_report_date;
use crate::retry::RetryPolicy;

pub const NO_EMPLOYER_DATA: &str = "В ЕВМИАС отсутствуют данные о месте работы";
const EMPLOYED_STATUS: &str = "Работает";

pub fn lab_requests_payload(start_date: &str, end_date: &str) -> Value {
    rpc_payload(
        "EvnLabRequest",
        "loadEvnLabRequestList",
        json!({
            "EvnStatus_id": 2,
            "MedServiceType_SysNick": "reglab",
            "MedService_id": LAB_MED_SERVICE_ID,
            "fit": 1,
            "begDate": start_date,
            "endDate": end_date,
            "filterWorkELRByDate": 1,
            "filterDoneELRByDate": 1,
            "formMode": "false",
        }),
    )
}

pub fn lab_request_payload(direction_id: &str) -> Value {
    rpc_payload(
        "EvnLabRequest",
        "load",
        json!({ "EvnDirection_id": direction_id, "delDocsView": 0 }),
    )
}

pub fn service_contents_payload(service_name: &str) -> Value {
    rpc_payload(
        "UslugaComplex",
        "loadUslugaContentsGrid",
        json!({
            "UslugaComplex_CodeName": service_name,
            "object": "UslugaComplex",
            "UslugaComplex_pid": LAB_SERVICE_COMPLEX_PARENT_ID,
            "contents": 2,
        }),
    )
}

pub fn person_data_payload(person_id: &str) -> Value {
    rpc_payload(
        "Common",
        "loadPersonData",
        json!({
            "onExpand": "true",
            "Person_id": person_id,
            "LoadShort": "false",
            "mode": "PersonInfoPanel",
        }),
    )
}

/// Text of `field` in the first element of a list response.
fn first_field(response: &Value, field: &str) -> Option<String> {
    response
        .as_array()
        .and_then(|items| items.first())
        .and_then(|item| scalar_text(&item[field]))
        .filter(|text| !text.is_empty())
}

/// Employment record of a person.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Employment {
    pub employer_id: Option<String>,
    pub employer_name: Option<String>,
    pub social_status: Option<String>,
}

impl Employment {
    pub fn from_person_data(response: &Value) -> Self {
        let employer_name = first_field(response, "Person_Job");
        let social_status = first_field(response, "SocStatus_Name");
        let employer_name = match (&employer_name, social_status.as_deref()) {
            (None, Some(EMPLOYED_STATUS)) => Some(NO_EMPLOYER_DATA.to_string()),
            _ => employer_name,
        };
        Self {
            employer_id: first_field(response, "JobOrg_id"),
            employer_name,
            social_status,
        }
    }

    pub fn missing_employer(&self) -> bool {
        self.employer_name.as_deref() == Some(NO_EMPLOYER_DATA)
    }
}

/// Employer organisation ids with a reporting category, e.g. customs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct EmployerCategories {
    labels: HashMap<String, String>,
}

impl EmployerCategories {
    pub fn new(labels: HashMap<String, String>) -> Self {
        Self { labels }
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn category(&self, employer_id: Option<&str>) -> Option<&str> {
        employer_id
            .and_then(|id| self.labels.get(id.trim()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct OrderedService {
    #[serde(rename = "UslugaComplex_Name", default)]
    name: Option<String>,
}

/// Names of the services ordered in one lab request. The gateway sends them
/// as a JSON list encoded inside a string field.
pub fn ordered_service_names(request: &Value) -> Result<Vec<String>, serde_json::Error> {
    let services: Vec<OrderedService> = match &request["EvnLabRequest_UslugaName"] {
        Value::String(encoded) if encoded.trim().is_empty() => Vec::new(),
        Value::String(encoded) => serde_json::from_str(encoded)?,
        Value::Null => Vec::new(),
        other => serde_json::from_value(other.clone())?,
    };
    Ok(services.into_iter().filter_map(|s| s.name).collect())
}

/// Capitalizes the first letter of every word and lowercases the rest.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word_start = true;
    for c in text.chars() {
        if word_start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        word_start = !c.is_alphabetic();
    }
    out
}

/// One ordered service of a lab request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabOrderRow {
    pub surname: String,
    pub first_name: String,
    pub patronymic: String,
    pub birthday: String,
    pub social_status: String,
    pub employer_category: String,
    pub employer_name: String,
    pub service_date: String,
    pub pay_type: String,
    pub service_code: String,
    pub service_name: String,
    pub missing_employer: bool,
}

impl LabOrderRow {
    /// Cell texts in report column order.
    pub fn cells(&self) -> [&str; 11] {
        [
            self.surname.as_str(),
            self.first_name.as_str(),
            self.patronymic.as_str(),
            self.birthday.as_str(),
            self.social_status.as_str(),
            self.employer_category.as_str(),
            self.employer_name.as_str(),
            self.service_date.as_str(),
            self.pay_type.as_str(),
            self.service_code.as_str(),
            self.service_name.as_str(),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabOrdersSummary {
    pub requests: usize,
    pub rows: usize,
    pub missing_employer: usize,
    pub failed_lookups: usize,
}

impl fmt::Display for LabOrdersSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requests={} rows={} missing_employer={} failed_lookups={}",
            self.requests, self.rows, self.missing_employer, self.failed_lookups
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LabOrdersReport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rows: Vec<LabOrderRow>,
    pub summary: LabOrdersSummary,
}

/// Memo of the three per-row lookups of the lab report.
pub struct LabCaches {
    /// Direction id to `PayType_id`.
    pub pay_types: LookupCache<String, Option<String>>,
    /// Service name to service code.
    pub service_codes: LookupCache<String, Option<String>>,
    /// Person id to employment record.
    pub employment: LookupCache<String, Arc<Employment>>,
}

impl LabCaches {
    pub fn new(capacity: usize) -> Self {
        Self {
            pay_types: LookupCache::new("lab_pay_types", capacity),
            service_codes: LookupCache::new("lab_service_codes", capacity),
            employment: LookupCache::new("lab_employment", capacity),
        }
    }
}

impl Default for LabCaches {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

pub struct LabOrdersReporter<G> {
    gateway: Arc<G>,
    caches: Arc<LabCaches>,
    retry: RetryPolicy,
    pay_types: Arc<PayTypeTable>,
    employers: Arc<EmployerCategories>,
    progress: ProgressBar,
}

impl<G: Gateway> LabOrdersReporter<G> {
    pub fn new(
        gateway: Arc<G>,
        caches: Arc<LabCaches>,
        retry: RetryPolicy,
        pay_types: Arc<PayTypeTable>,
        employers: Arc<EmployerCategories>,
    ) -> Self {
        Self {
            gateway,
            caches,
            retry,
            pay_types,
            employers,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub async fn build_lab_orders_report(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> Result<LabOrdersReport, ReportError> {
        let start = parse_report_date("start_date", start_date)?;
        let end = parse_report_date("end_date", end_date)?;

        let requests = self
            .lab_requests(&format_gateway_date(start), &format_gateway_date(end))
            .await
            .map_err(|err| {
                tracing::error!("Failed to fetch lab requests: {}", err);
                ReportError::ServiceUnavailable(err)
            })?;
        tracing::info!("Fetched {} lab requests", requests.len());

        let mut summary = LabOrdersSummary {
            requests: requests.len(),
            ..Default::default()
        };
        let mut rows = Vec::new();
        self.progress.set_length(requests.len() as u64);
        for request in &requests {
            self.progress.inc(1);
            self.rows_for_request(request, &mut rows, &mut summary).await;
        }
        self.progress.finish_with_message(format!("{} rows", rows.len()));

        summary.rows = rows.len();
        summary.missing_employer = rows.iter().filter(|r| r.missing_employer).count();
        tracing::info!(
            "Lab report ready: requests={} rows={} missing_employer={} failed_lookups={}",
            summary.requests,
            summary.rows,
            summary.missing_employer,
            summary.failed_lookups
        );
        Ok(LabOrdersReport {
            start_date: start,
            end_date: end,
            rows,
            summary,
        })
    }

    async fn lab_requests(&self, start: &str, end: &str) -> Result<Vec<Value>, GatewayError> {
        let payload = lab_requests_payload(start, end);
        let response = self
            .retry
            .run("lab request list", || self.gateway.request(&payload))
            .await?;
        match response.get("data") {
            Some(Value::Array(items)) => Ok(items.clone()),
            _ => Err(GatewayError::Payload {
                operation: "EvnLabRequest.loadEvnLabRequestList".to_string(),
                message: "response has no data list".to_string(),
            }),
        }
    }

    async fn rows_for_request(
        &self,
        request: &Value,
        rows: &mut Vec<LabOrderRow>,
        summary: &mut LabOrdersSummary,
    ) {
        let person_id = scalar_text(&request["Person_id"]).unwrap_or_default();
        let names = match ordered_service_names(request) {
            Ok(names) => names,
            Err(err) => {
                tracing::warn!("Lab request of person {} has unreadable services: {}", person_id, err);
                return;
            }
        };

        let pay_type = match scalar_text(&request["EvnDirection_id"]) {
            Some(direction_id) => match self.pay_type(&direction_id).await {
                Ok(pay_type) => pay_type,
                Err(err) => {
                    tracing::error!("Pay type lookup failed for direction {}: {}", direction_id, err);
                    summary.failed_lookups += 1;
                    String::new()
                }
            },
            None => String::new(),
        };

        let text = |field: &str| scalar_text(&request[field]).unwrap_or_default();
        let surname = title_case(&text("Person_Surname"));
        let first_name = title_case(&text("Person_Firname"));
        let patronymic = title_case(&text("Person_Secname"));
        let birthday = text("Person_Birthday");
        let service_date = text("TimetableMedService_Date");

        for service_name in names {
            let service_code = match self.service_code(&service_name).await {
                Ok(code) => code.unwrap_or_default(),
                Err(err) => {
                    tracing::error!("Service code lookup failed for '{}': {}", service_name, err);
                    summary.failed_lookups += 1;
                    String::new()
                }
            };
            let employment = match self.employment(&person_id).await {
                Ok(employment) => employment,
                Err(err) => {
                    tracing::error!("Employment lookup failed for person {}: {}", person_id, err);
                    summary.failed_lookups += 1;
                    Arc::new(Employment::default())
                }
            };

            rows.push(LabOrderRow {
                surname: surname.clone(),
                first_name: first_name.clone(),
                patronymic: patronymic.clone(),
                birthday: birthday.clone(),
                social_status: employment.social_status.clone().unwrap_or_default(),
                employer_category: self
                    .employers
                    .category(employment.employer_id.as_deref())
                    .unwrap_or_default()
                    .to_string(),
                employer_name: employment.employer_name.clone().unwrap_or_default(),
                service_date: service_date.clone(),
                pay_type: pay_type.clone(),
                service_code,
                service_name,
                missing_employer: employment.missing_employer(),
            });
        }
    }

    /// Mapped payment type of a direction; empty when the id is unknown.
    async fn pay_type(&self, direction_id: &str) -> Result<String, GatewayError> {
        let pay_type_id = self
            .caches
            .pay_types
            .get_or_fetch(direction_id.to_string(), || async {
                let payload = lab_request_payload(direction_id);
                let response = self
                    .retry
                    .run("lab request pay type", || self.gateway.request(&payload))
                    .await?;
                Ok::<_, GatewayError>(first_field(&response, "PayType_id"))
            })
            .await?;
        Ok(pay_type_id
            .and_then(|id| self.pay_types.get(&id).map(str::to_string))
            .unwrap_or_default())
    }

    async fn service_code(&self, service_name: &str) -> Result<Option<String>, GatewayError> {
        self.caches
            .service_codes
            .get_or_fetch(service_name.to_string(), || async {
                let payload = service_contents_payload(service_name);
                let response = self
                    .retry
                    .run("service code", || self.gateway.request(&payload))
                    .await?;
                Ok::<_, GatewayError>(first_field(&response, "UslugaComplex_Code"))
            })
            .await
    }

    async fn employment(&self, person_id: &str) -> Result<Arc<Employment>, GatewayError> {
        self.caches
            .employment
            .get_or_fetch(person_id.to_string(), || async {
                let payload = person_data_payload(person_id);
                let response = self
                    .retry
                    .run("person data", || self.gateway.request(&payload))
                    .await?;
                Ok::<_, GatewayError>(Arc::new(Employment::from_person_data(&response)))
            })
            .await
    }
}
