use std::sync::Arc;

use indicatif::ProgressBar;
use serde::Serialize;

use crate::cache::{DEFAULT_CAPACITY, LookupCache};
use crate::common::format_gateway_date;
use crate::episodes::{
    ServiceEntry, episode_services_payload, hospitalization_search_payload, parse_episode_ids,
    parse_services,
};
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::pay_types::PayTypeTable;
use crate::retry::RetryPolicy;
use crate::row::PatientServiceRow;

/// (card number, admission date as `DD.MM.YYYY`)
pub type EpisodeKey = (String, String);

/// Process-wide memo of the two hospitalization lookups.
pub struct EnrichmentCaches {
    pub episodes: LookupCache<EpisodeKey, Arc<Vec<Option<String>>>>,
    pub services: LookupCache<String, Arc<Option<Vec<ServiceEntry>>>>,
}

impl EnrichmentCaches {
    pub fn new(capacity: usize) -> Self {
        Self {
            episodes: LookupCache::new("episodes", capacity),
            services: LookupCache::new("episode_services", capacity),
        }
    }
}

impl Default for EnrichmentCaches {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Why a row ended up without a payment source.
#[derive(Debug)]
pub enum EnrichmentMiss {
    MissingKey(&'static str),
    NoEpisode,
    NoEpisodeId,
    NoServices,
    NoMatchingService,
    Lookup(GatewayError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentSummary {
    pub matched: usize,
    pub missed: usize,
    pub failed: usize,
    /// Matches where a later entry had the same date and code but another
    /// payment type. The first entry still wins.
    pub ambiguous: usize,
    pub already_labelled: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ServiceMatch {
    pay_type_id: String,
    conflicting_pay_type_id: Option<String>,
}

/// Resolves the payment source of each report row through the gateway.
/// Rows are processed one after another.
pub struct EnrichmentEngine<G> {
    gateway: Arc<G>,
    caches: Arc<EnrichmentCaches>,
    retry: RetryPolicy,
    pay_types: Arc<PayTypeTable>,
    progress: ProgressBar,
}

impl<G: Gateway> EnrichmentEngine<G> {
    pub fn new(
        gateway: Arc<G>,
        caches: Arc<EnrichmentCaches>,
        retry: RetryPolicy,
        pay_types: Arc<PayTypeTable>,
    ) -> Self {
        Self {
            gateway,
            caches,
            retry,
            pay_types,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Sets `payment_source` on every row that can be matched. Never fails:
    /// misses and lookup errors are logged and counted per row.
    pub async fn enrich(&self, rows: &mut [PatientServiceRow]) -> EnrichmentSummary {
        let mut summary = EnrichmentSummary::default();
        self.progress.set_length(rows.len() as u64);
        self.progress.set_position(0);

        for row in rows.iter_mut() {
            self.progress.inc(1);
            if row.payment_source.is_some() {
                summary.already_labelled += 1;
                continue;
            }

            let card = row.card_number.clone().unwrap_or_default();
            match self.resolve(row).await {
                Ok(found) => {
                    if let Some(other) = &found.conflicting_pay_type_id {
                        tracing::warn!(
                            "Card {}: several services match {:?}/{:?}; using pay type {} over {}",
                            card,
                            row.service_code,
                            row.service_date,
                            found.pay_type_id,
                            other
                        );
                        summary.ambiguous += 1;
                    }
                    row.payment_source = Some(self.pay_types.label(&found.pay_type_id));
                    summary.matched += 1;
                }
                Err(EnrichmentMiss::Lookup(err)) => {
                    tracing::error!("Enrichment failed for card {}: {}", card, err);
                    summary.failed += 1;
                }
                Err(miss) => {
                    log_miss(&card, &miss);
                    summary.missed += 1;
                }
            }
            self.progress.set_message(format!(
                "matched={} missed={} failed={}",
                summary.matched, summary.missed, summary.failed
            ));
        }

        self.progress.finish_with_message(format!(
            "done: matched={} missed={} failed={}",
            summary.matched, summary.missed, summary.failed
        ));
        tracing::info!(
            "Enrichment finished: matched={} missed={} failed={} ambiguous={}",
            summary.matched,
            summary.missed,
            summary.failed,
            summary.ambiguous
        );
        for (name, stats) in [
            (self.caches.episodes.name(), self.caches.episodes.stats()),
            (self.caches.services.name(), self.caches.services.stats()),
        ] {
            tracing::debug!("Cache {}: hits={} fetches={}", name, stats.hits, stats.fetches);
        }
        summary
    }

    async fn resolve(&self, row: &PatientServiceRow) -> Result<ServiceMatch, EnrichmentMiss> {
        let card = row
            .card_number
            .as_deref()
            .ok_or(EnrichmentMiss::MissingKey("card number"))?;
        let admission = row
            .start_date
            .map(format_gateway_date)
            .ok_or(EnrichmentMiss::MissingKey("admission date"))?;
        let service_date = row
            .service_date
            .map(format_gateway_date)
            .ok_or(EnrichmentMiss::MissingKey("service date"))?;
        let service_code = row
            .service_code
            .as_deref()
            .ok_or(EnrichmentMiss::MissingKey("service code"))?;

        let episodes = self
            .episodes(card, &admission)
            .await
            .map_err(EnrichmentMiss::Lookup)?;
        let episode_id = episodes
            .first()
            .ok_or(EnrichmentMiss::NoEpisode)?
            .as_deref()
            .ok_or(EnrichmentMiss::NoEpisodeId)?;

        let services = self
            .services(episode_id)
            .await
            .map_err(EnrichmentMiss::Lookup)?;
        let services = services
            .as_ref()
            .as_ref()
            .filter(|s| !s.is_empty())
            .ok_or(EnrichmentMiss::NoServices)?;

        match_service(services, &service_date, service_code).ok_or(EnrichmentMiss::NoMatchingService)
    }

    async fn episodes(
        &self,
        card: &str,
        admission: &str,
    ) -> Result<Arc<Vec<Option<String>>>, GatewayError> {
        let key = (card.to_string(), admission.to_string());
        self.caches
            .episodes
            .get_or_fetch(key, || async {
                let payload = hospitalization_search_payload(card, admission);
                let response = self
                    .retry
                    .run("hospitalization search", || self.gateway.request(&payload))
                    .await?;
                Ok::<_, GatewayError>(Arc::new(parse_episode_ids(&response)))
            })
            .await
    }

    async fn services(
        &self,
        episode_id: &str,
    ) -> Result<Arc<Option<Vec<ServiceEntry>>>, GatewayError> {
        self.caches
            .services
            .get_or_fetch(episode_id.to_string(), || async {
                let payload = episode_services_payload(episode_id);
                let response = self
                    .retry
                    .run("episode services", || self.gateway.request(&payload))
                    .await?;
                Ok::<_, GatewayError>(Arc::new(parse_services(&response)))
            })
            .await
    }
}

/// First entry, in returned order, whose date and code both equal the row's.
fn match_service(
    services: &[ServiceEntry],
    service_date: &str,
    service_code: &str,
) -> Option<ServiceMatch> {
    let is_match = |entry: &&ServiceEntry| {
        entry.date.as_deref() == Some(service_date) && entry.code.as_deref() == Some(service_code)
    };
    let mut matches = services.iter().filter(is_match);
    let first = matches.next()?;
    let pay_type_id = first.pay_type_id.clone().unwrap_or_default();
    let conflicting_pay_type_id = matches
        .map(|entry| entry.pay_type_id.clone().unwrap_or_default())
        .find(|other| *other != pay_type_id);

    Some(ServiceMatch {
        pay_type_id,
        conflicting_pay_type_id,
    })
}

fn log_miss(card: &str, miss: &EnrichmentMiss) {
    match miss {
        EnrichmentMiss::MissingKey(field) => {
            tracing::warn!("Card '{}': {} is missing, cannot look up payment", card, field)
        }
        EnrichmentMiss::NoEpisode => tracing::warn!("Hospitalization not found for card {}", card),
        EnrichmentMiss::NoEpisodeId => {
            tracing::warn!("Hospitalization for card {} has no identifier", card)
        }
        EnrichmentMiss::NoServices => tracing::warn!("No services listed for card {}", card),
        EnrichmentMiss::NoMatchingService => {
            tracing::warn!("No service matched date and code for card {}", card)
        }
        EnrichmentMiss::Lookup(err) => tracing::error!("Lookup failed for card {}: {}", card, err),
    }
}
