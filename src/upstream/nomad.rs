use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::RequestBuilder;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use super::ChangeItem;
use super::ListPage;
use super::OrchestratorApi;
use super::QueryCursor;
use super::ResourceKind;
use crate::Error;
use crate::Result;
use crate::UpstreamConfig;
use crate::UpstreamError;

pub(crate) const NOMAD_INDEX_HEADER: &str = "X-Nomad-Index";
const NOMAD_TOKEN_HEADER: &str = "X-Nomad-Token";

/// Nomad HTTP API client
#[derive(Clone)]
pub struct NomadClient {
    http: reqwest::Client,
    address: String,
    config: UpstreamConfig,
}

impl std::fmt::Debug for NomadClient {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("NomadClient").field("address", &self.address).finish()
    }
}

impl NomadClient {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(token)
                .map_err(|_| Error::InvalidConfig("upstream.token is not a valid header value".into()))?;
            headers.insert(NOMAD_TOKEN_HEADER, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build upstream client: {e}")))?;

        Ok(Self {
            http,
            address: config.address.trim_end_matches('/').to_string(),
            config,
        })
    }

    fn with_region(
        &self,
        request: RequestBuilder,
    ) -> RequestBuilder {
        match &self.config.region {
            Some(region) => request.query(&[("region", region.as_str())]),
            None => request,
        }
    }

    async fn send(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|source| UpstreamError::Request {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(UpstreamError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        Ok(response)
    }
}

fn parse_index(
    endpoint: &str,
    headers: &HeaderMap,
) -> Result<u64> {
    headers
        .get(NOMAD_INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| {
            UpstreamError::MissingIndex {
                endpoint: endpoint.to_string(),
            }
            .into()
        })
}

#[async_trait]
impl OrchestratorApi for NomadClient {
    async fn list(
        &self,
        kind: ResourceKind,
        cursor: &QueryCursor,
    ) -> Result<ListPage> {
        let endpoint = format!("{}{}", self.address, kind.list_path());

        let mut request = self
            .http
            .get(&endpoint)
            .query(&[
                ("index", cursor.wait_index.to_string()),
                ("wait", format!("{}ms", cursor.wait_time.as_millis())),
            ])
            .timeout(cursor.wait_time + self.config.blocking_slack());
        if cursor.allow_stale {
            request = request.query(&[("stale", "true")]);
        }
        let request = self.with_region(request);

        debug!(%kind, wait_index = cursor.wait_index, "issuing blocking list query");
        let response = self.send(&endpoint, request).await?;
        let last_index = parse_index(&endpoint, response.headers())?;

        let entries: Vec<Value> = response.json().await.map_err(|e| UpstreamError::Malformed {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            match ChangeItem::from_stub(entry) {
                Some(item) => items.push(item),
                None => warn!(%kind, "skipping list entry without ID/ModifyIndex"),
            }
        }

        Ok(ListPage { items, last_index })
    }

    async fn info(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Value> {
        let endpoint = format!("{}{}", self.address, kind.info_path(id));
        let request = self
            .http
            .get(&endpoint)
            .timeout(self.config.request_timeout());
        let request = self.with_region(request);

        let response = self.send(&endpoint, request).await?;
        let record = response.json().await.map_err(|e| UpstreamError::Malformed {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;
        Ok(record)
    }
}
