use std::error::Error as _;
use std::future::Future;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{Value, json};

use crate::common::{truncate_chars, truncate_for_log};
use crate::error::GatewayError;

pub const DOWNLOAD_PATH: &str = "/gateway/download";
pub const DEFAULT_REQUEST_ENDPOINT: &str = "/gateway/request";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const API_KEY_HEADER: &str = "X-API-KEY";

/// The upstream medical information system, reached through its gateway.
pub trait Gateway: Send + Sync {
    /// One remote procedure call; `payload` selects the controller/method
    /// under `params` and carries the arguments under `data`.
    fn request(&self, payload: &Value) -> impl Future<Output = Result<Value, GatewayError>> + Send;

    /// Fetches a binary artifact such as a rendered report.
    fn download(
        &self,
        target: &str,
        payload: &Value,
    ) -> impl Future<Output = Result<Vec<u8>, GatewayError>> + Send;
}

/// Builds the `{"params": {"c", "m"}, "data"}` envelope the gateway expects.
pub fn rpc_payload(controller: &str, method: &str, data: Value) -> Value {
    json!({
        "params": { "c": controller, "m": method },
        "data": data,
    })
}

/// Name used for a payload in logs and errors (`Controller.method`).
pub fn operation_name(payload: &Value) -> String {
    let params = &payload["params"];
    match (params["c"].as_str(), params["m"].as_str()) {
        (Some(c), Some(m)) => format!("{c}.{m}"),
        (None, Some(m)) => m.to_string(),
        _ => "gateway call".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub request_endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Log request payloads and response sizes at debug level.
    pub log_payloads: bool,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_endpoint: DEFAULT_REQUEST_ENDPOINT.to_string(),
            api_key: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            log_payloads: false,
        }
    }
}

/// reqwest-backed gateway; one instance (and one connection pool) per process.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("report-pipeline/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }
}

impl Gateway for HttpGateway {
    async fn request(&self, payload: &Value) -> Result<Value, GatewayError> {
        let operation = operation_name(payload);
        if self.config.log_payloads {
            tracing::debug!("Gateway request {}: {}", operation, payload);
        }

        let response = self
            .authorized(self.client.post(self.url(&self.config.request_endpoint)))
            .json(payload)
            .send()
            .await
            .map_err(|e| transport_error(&operation, e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&operation, e))?;

        if !status.is_success() {
            return Err(GatewayError::Status {
                operation,
                status: status.as_u16(),
                body: truncate_for_log(&String::from_utf8_lossy(&body)),
            });
        }
        if self.config.log_payloads {
            tracing::debug!("Gateway response {}: {} bytes", operation, body.len());
        }
        if body.is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_slice(&body).map_err(|e| GatewayError::Payload {
            operation,
            message: e.to_string(),
        })
    }

    async fn download(&self, target: &str, payload: &Value) -> Result<Vec<u8>, GatewayError> {
        let operation = format!("download {target}");
        if self.config.log_payloads {
            tracing::debug!("Gateway {}: {}", operation, payload);
        }

        let response = self
            .authorized(self.client.post(self.url(target)))
            .json(payload)
            .send()
            .await
            .map_err(|e| transport_error(&operation, e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&operation, e))?;

        if status != StatusCode::OK {
            return Err(GatewayError::Status {
                operation,
                status: status.as_u16(),
                body: truncate_chars(&String::from_utf8_lossy(&body), 200),
            });
        }
        Ok(body.to_vec())
    }
}

fn transport_error(operation: &str, err: reqwest::Error) -> GatewayError {
    let transient = err.is_connect()
        || err.is_timeout()
        || err.is_body()
        || (err.is_request() && !err.is_builder());

    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    GatewayError::Transport {
        operation: operation.to_string(),
        message,
        transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn gateway_for(base_url: String) -> HttpGateway {
        let mut config = GatewayConfig::new(base_url);
        config.api_key = Some("secret".to_string());
        config.timeout = Duration::from_secs(5);
        HttpGateway::new(config).unwrap()
    }

    #[test]
    fn operation_names_come_from_params() {
        let payload = rpc_payload("Search", "searchData", json!({}));
        assert_eq!(operation_name(&payload), "Search.searchData");
        assert_eq!(operation_name(&json!({})), "gateway call");
    }

    #[tokio::test]
    async fn request_posts_envelope_with_api_key() {
        let server = MockServer::start_async().await;
        let payload = rpc_payload("EvnUsluga", "loadEvnUslugaGrid", json!({"pid": "42"}));
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/gateway/request")
                    .header("X-API-KEY", "secret")
                    .json_body(payload.clone());
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!([{"Usluga_Code": "A01"}]));
            })
            .await;

        let value = gateway_for(server.base_url()).request(&payload).await.unwrap();
        mock.assert_async().await;
        assert_eq!(value[0]["Usluga_Code"], "A01");
    }

    #[tokio::test]
    async fn empty_body_reads_as_empty_object() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/gateway/request");
                then.status(200);
            })
            .await;

        let value = gateway_for(server.base_url())
            .request(&json!({}))
            .await
            .unwrap();
        assert_eq!(value, json!({}));
    }

    #[tokio::test]
    async fn error_status_is_not_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/gateway/request");
                then.status(502).body("upstream timeout");
            })
            .await;

        let err = gateway_for(server.base_url())
            .request(&rpc_payload("Search", "searchData", json!({})))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(matches!(err, GatewayError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn invalid_json_is_a_payload_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/gateway/request");
                then.status(200).body("<html>login</html>");
            })
            .await;

        let err = gateway_for(server.base_url())
            .request(&json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Payload { .. }));
    }

    #[tokio::test]
    async fn download_returns_raw_bytes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(DOWNLOAD_PATH);
                then.status(200).body(b"PK\x03\x04rest".to_vec());
            })
            .await;

        let bytes = gateway_for(server.base_url())
            .download(DOWNLOAD_PATH, &json!({"path": "/"}))
            .await
            .unwrap();
        assert_eq!(bytes, b"PK\x03\x04rest");
    }

    #[tokio::test]
    async fn download_rejects_non_200_with_body_preview() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(DOWNLOAD_PATH);
                then.status(204);
            })
            .await;

        let err = gateway_for(server.base_url())
            .download(DOWNLOAD_PATH, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 204, .. }));
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = gateway_for(format!("http://127.0.0.1:{port}"))
            .request(&json!({}))
            .await
            .unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }
}
