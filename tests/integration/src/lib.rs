//! End-to-end tests for the MockStack gateway.
//!
//! Every test starts its own in-process server on an ephemeral loopback
//! port and drives it over real HTTP, so tests never share state and need
//! no external process.
//!
//! ```text
//! cargo test -p mockstack-integration
//! ```

use std::sync::Once;

use mockstack_core::MockStackConfig;
use mockstack_gateway::{MockServer, RunningServer};
use reqwest::{Method, StatusCode};

mod test_gateway;
mod test_s3;
mod test_services;
mod test_sqs;
mod test_wafv2;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// SigV4 `Authorization` value whose credential scope names `service`.
#[must_use]
pub fn authorization(service: &str) -> String {
    format!(
        "AWS4-HMAC-SHA256 Credential=test/20240101/us-east-1/{service}/aws4_request, \
         SignedHeaders=host;x-amz-date, Signature=0000"
    )
}

/// A running server plus an HTTP client pointed at it.
#[derive(Debug)]
pub struct TestServer {
    server: RunningServer,
    client: reqwest::Client,
}

impl TestServer {
    /// Start a server with every built-in service.
    pub async fn start() -> Self {
        Self::start_with(Vec::new()).await
    }

    /// Start a server with only `services` enabled.
    pub async fn start_with(services: Vec<&str>) -> Self {
        init_tracing();
        let config = MockStackConfig {
            gateway_listen: "127.0.0.1:0".to_owned(),
            services: services.into_iter().map(str::to_owned).collect(),
            ..MockStackConfig::default()
        };
        let server = MockServer::new(config)
            .start()
            .await
            .unwrap_or_else(|e| panic!("failed to start server: {e}"));
        Self {
            server,
            client: reqwest::Client::new(),
        }
    }

    /// The underlying server.
    #[must_use]
    pub fn server(&self) -> &RunningServer {
        &self.server
    }

    /// Absolute URL for `path`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server.endpoint_url())
    }

    /// Raw request builder against `path`.
    #[must_use]
    pub fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client.request(method, self.url(path))
    }

    /// Call an `awsJson` operation and return the status and decoded body.
    pub async fn json_call(
        &self,
        version: &str,
        target: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let resp = self
            .request(Method::POST, "/")
            .header("content-type", format!("application/x-amz-json-{version}"))
            .header("x-amz-target", target)
            .body(body.to_string())
            .send()
            .await
            .unwrap_or_else(|e| panic!("{target} failed: {e}"));
        let status = resp.status();
        let json = resp.json().await.unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    /// Call an object-storage route, signing it for `s3`.
    pub async fn s3(&self, method: Method, path: &str, body: &'static str) -> (StatusCode, String) {
        let resp = self
            .request(method, path)
            .header("authorization", authorization("s3"))
            .body(body)
            .send()
            .await
            .unwrap_or_else(|e| panic!("s3 {path} failed: {e}"));
        (resp.status(), resp.text().await.unwrap_or_default())
    }

    /// Call an `awsQuery` action on `service` with form parameters.
    pub async fn query(&self, service: &str, pairs: &[(&str, &str)]) -> (StatusCode, String) {
        let form = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        let resp = self
            .request(Method::POST, "/")
            .header("authorization", authorization(service))
            .header("content-type", "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .unwrap_or_else(|e| panic!("{service} query failed: {e}"));
        (resp.status(), resp.text().await.unwrap_or_default())
    }

    /// Drain connections and stop.
    pub async fn stop(self) {
        self.server.stop().await;
    }
}
