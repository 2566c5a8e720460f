use serde::Deserialize;
use serde_json::{Value, json};

use crate::gateway::rpc_payload;

/// Search for the inpatient episode (`EvnPS`) of a card admitted on `admission_date`.
pub fn hospitalization_search_payload(card_number: &str, admission_date: &str) -> Value {
    rpc_payload(
        "Search",
        "searchData",
        json!({
            "PersonPeriodicType_id": 1,
            "SearchFormType": "EvnPS",
            "EvnPS_NumCard": card_number,
            "EvnSection_setDate_Range": format!("{admission_date} - {admission_date}"),
            "Date_Type": 1,
            "SearchType_id": 1,
            "PersonCardStateType_id": 1,
        }),
    )
}

/// Services rendered within one inpatient episode.
pub fn episode_services_payload(episode_id: &str) -> Value {
    rpc_payload(
        "EvnUsluga",
        "loadEvnUslugaGrid",
        json!({
            "pid": episode_id,
            "parent": "EvnPS",
        }),
    )
}

/// Episode identifiers from a search response, in returned order. `None`
/// entries are episodes the gateway listed without an identifier.
pub fn parse_episode_ids(response: &Value) -> Vec<Option<String>> {
    response
        .get("data")
        .and_then(Value::as_array)
        .map(|episodes| {
            episodes
                .iter()
                .map(|episode| scalar_text(&episode["EvnPS_id"]))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct RawService {
    #[serde(rename = "EvnUsluga_setDate", default)]
    set_date: Value,
    #[serde(rename = "Usluga_Code", default)]
    code: Value,
    #[serde(rename = "PayType_id", default)]
    pay_type_id: Value,
}

/// One rendered service of an episode, as the gateway reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// `DD.MM.YYYY` as sent by the gateway.
    pub date: Option<String>,
    pub code: Option<String>,
    pub pay_type_id: Option<String>,
}

/// Parses the service grid. A response that is not a list yields `None`;
/// list items that are not objects are dropped.
pub fn parse_services(response: &Value) -> Option<Vec<ServiceEntry>> {
    let items = response.as_array()?;
    let services = items
        .iter()
        .filter(|item| item.is_object())
        .filter_map(|item| RawService::deserialize(item).ok())
        .map(|raw| ServiceEntry {
            date: scalar_text(&raw.set_date),
            code: scalar_text(&raw.code),
            pay_type_id: scalar_text(&raw.pay_type_id),
        })
        .collect();
    Some(services)
}

/// Text of a JSON string or number; identifiers arrive as either.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
