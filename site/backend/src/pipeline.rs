use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use report_pipeline::{
    EmployerCategories, EnrichmentCaches, GatewayConfig, HttpGateway, LabCaches,
    LabOrdersReporter, PatientServicesReporter, PayTypeTable, RetryPolicy,
};

use crate::cli::Settings;

/// Gateway client and lookup caches, built once per process and shared by
/// every report.
pub struct Pipeline {
    gateway: Arc<HttpGateway>,
    enrichment_caches: Arc<EnrichmentCaches>,
    lab_caches: Arc<LabCaches>,
    retry: RetryPolicy,
    pay_types: Arc<PayTypeTable>,
    employers: Arc<EmployerCategories>,
}

impl Pipeline {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let config = GatewayConfig {
            base_url: settings.gateway_url.clone(),
            request_endpoint: settings.gateway_request_endpoint.clone(),
            api_key: settings.gateway_api_key.clone(),
            timeout: Duration::from_secs(settings.request_timeout),
            log_payloads: settings.debug_http,
        };
        let gateway = HttpGateway::new(config).context("Failed creating gateway HTTP client")?;

        let employers = match &settings.employer_categories {
            Some(path) => {
                let text = std::fs::read_to_string(path).with_context(|| {
                    format!("Failed reading employer categories {}", path.display())
                })?;
                EmployerCategories::from_json(&text).with_context(|| {
                    format!("Failed parsing employer categories {}", path.display())
                })?
            }
            None => EmployerCategories::default(),
        };
        tracing::info!(
            "Gateway {} (cache capacity {}, {} employer categories)",
            settings.gateway_url,
            settings.cache_capacity,
            employers.len()
        );

        Ok(Self {
            gateway: Arc::new(gateway),
            enrichment_caches: Arc::new(EnrichmentCaches::new(settings.cache_capacity)),
            lab_caches: Arc::new(LabCaches::new(settings.cache_capacity)),
            retry: RetryPolicy::default().with_budget(Duration::from_secs(settings.lookup_budget)),
            pay_types: Arc::new(PayTypeTable::builtin()),
            employers: Arc::new(employers),
        })
    }

    pub fn patient_services(&self) -> PatientServicesReporter<HttpGateway> {
        PatientServicesReporter::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.enrichment_caches),
            self.retry,
            Arc::clone(&self.pay_types),
        )
    }

    pub fn lab_orders(&self) -> LabOrdersReporter<HttpGateway> {
        LabOrdersReporter::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.lab_caches),
            self.retry,
            Arc::clone(&self.pay_types),
            Arc::clone(&self.employers),
        )
    }
}
