//! Blocking HTTP client for the lake platform.
//!
//! One [`LakeClient`] value is passed explicitly to every operation. Each
//! call maps failures the same way: transport errors and 5xx become
//! [`LakeError::RemoteUnavailable`], 4xx become [`LakeError::Validation`]
//! with the body as diagnostic text, and an undecodable 2xx becomes
//! [`LakeError::Decode`].

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use super::types::{
    Connection, ConnectionRequest, PLUGIN, Pipeline, PipelineList, PipelineRequest, VersionInfo,
};
use super::{LakeError, LakeResult};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest body excerpt carried in an error.
const MAX_DIAGNOSTIC_BYTES: usize = 512;

#[derive(Debug, Clone)]
pub struct LakeClient {
    base_url: String,
    http: Client,
}

impl LakeClient {
    pub fn new(base_url: &str, timeout: Duration) -> LakeResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("qdev-exporter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                LakeError::RemoteUnavailable(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn get<T: DeserializeOwned>(&self, endpoint: &str) -> LakeResult<T> {
        self.send(endpoint, self.http.get(self.url(endpoint)))
    }

    fn post<T: DeserializeOwned>(&self, endpoint: &str) -> LakeResult<T> {
        self.send(endpoint, self.http.post(self.url(endpoint)))
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> LakeResult<T> {
        self.send(endpoint, self.http.post(self.url(endpoint)).json(body))
    }

    fn send<T: DeserializeOwned>(&self, endpoint: &str, request: RequestBuilder) -> LakeResult<T> {
        trace!(endpoint, "lake request");
        let response = request
            .send()
            .map_err(|e| LakeError::RemoteUnavailable(format!("{endpoint}: {e}")))?;
        parse_response(endpoint, response)
    }

    // -- diagnostics -------------------------------------------------------

    /// `GET /version`
    pub fn version(&self) -> LakeResult<VersionInfo> {
        self.get("/version")
    }

    /// `GET /store/onboard`. The body shape is not fixed, so it stays raw.
    pub fn store_onboard(&self) -> LakeResult<serde_json::Value> {
        self.get("/store/onboard")
    }

    // -- connections -------------------------------------------------------

    /// `GET /plugins/q_dev/connections`
    pub fn list_connections(&self) -> LakeResult<Vec<Connection>> {
        let list: Option<Vec<Connection>> = self.get(&format!("/plugins/{PLUGIN}/connections"))?;
        Ok(list.unwrap_or_default())
    }

    /// `GET /plugins/q_dev/connections/:id`
    pub fn get_connection(&self, id: i64) -> LakeResult<Connection> {
        self.get(&format!("/plugins/{PLUGIN}/connections/{id}"))
    }

    /// `POST /plugins/q_dev/connections`
    pub fn create_connection(&self, request: &ConnectionRequest) -> LakeResult<Connection> {
        debug!(name = %request.name, region = %request.region, "creating connection");
        self.post_json(&format!("/plugins/{PLUGIN}/connections"), request)
    }

    /// `POST /plugins/q_dev/connections/:id/test`
    pub fn test_connection(&self, id: i64) -> LakeResult<serde_json::Value> {
        self.post(&format!("/plugins/{PLUGIN}/connections/{id}/test"))
    }

    // -- pipelines ---------------------------------------------------------

    /// `GET /pipelines`
    pub fn list_pipelines(&self) -> LakeResult<Vec<Pipeline>> {
        let list: Option<PipelineList> = self.get("/pipelines")?;
        Ok(list.map(PipelineList::into_vec).unwrap_or_default())
    }

    /// `GET /pipelines/:id`
    pub fn get_pipeline(&self, id: i64) -> LakeResult<Pipeline> {
        self.get(&format!("/pipelines/{id}"))
    }

    /// `POST /pipelines`
    pub fn create_pipeline(&self, request: &PipelineRequest) -> LakeResult<Pipeline> {
        self.post_json("/pipelines", request)
    }

    /// `POST /pipelines/:id/run`
    pub fn run_pipeline(&self, id: i64) -> LakeResult<serde_json::Value> {
        self.post(&format!("/pipelines/{id}/run"))
    }
}

/// Decode a response. An empty 2xx body decodes as JSON `null`.
fn parse_response<T: DeserializeOwned>(endpoint: &str, response: Response) -> LakeResult<T> {
    let status = response.status();
    let body = response.text().map_err(|e| {
        LakeError::RemoteUnavailable(format!("{endpoint}: failed to read body: {e}"))
    })?;

    if status.is_server_error() {
        return Err(LakeError::RemoteUnavailable(format!(
            "{endpoint}: HTTP {status}: {}",
            excerpt(&body)
        )));
    }
    if !status.is_success() {
        return Err(LakeError::Validation {
            status: status.as_u16(),
            message: format!("{endpoint}: {}", excerpt(&body)),
        });
    }

    let text = if body.trim().is_empty() { "null" } else { body.as_str() };
    serde_json::from_str(text).map_err(|e| LakeError::Decode {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}

fn excerpt(body: &str) -> &str {
    let body = body.trim();
    if body.len() <= MAX_DIAGNOSTIC_BYTES {
        return body;
    }
    let mut end = MAX_DIAGNOSTIC_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
