use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::BatchWriter;
use super::MessageWriter;
use super::SinkMessage;
use crate::Error;
use crate::HttpSinkConfig;
use crate::Result;
use crate::SinkError;

pub const KEY_HEADER: &str = "X-Firehose-Key";
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// POSTs payloads to a fixed URL. Single messages go out as-is; batches are
/// sent as one JSON array of the payloads.
#[derive(Debug, Clone)]
pub struct HttpWriter {
    http: reqwest::Client,
    address: String,
    timeout: Duration,
}

impl HttpWriter {
    pub fn new(config: &HttpSinkConfig) -> Result<Self> {
        let address = config
            .address
            .clone()
            .ok_or_else(|| Error::InvalidConfig("Missing sink.http.address (example: http://collector:8080/events)".into()))?;

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build sink http client: {e}")))?;

        Ok(Self {
            http,
            address,
            timeout: config.timeout(),
        })
    }

    async fn post(
        &self,
        key: Option<&str>,
        body: Vec<u8>,
    ) -> Result<()> {
        let mut request = self
            .http
            .post(&self.address)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .timeout(self.timeout)
            .body(body);
        if let Some(key) = key {
            request = request.header(KEY_HEADER, key);
        }

        let response = request.send().await.map_err(|e| self.publish_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Publish {
                destination: self.address.clone(),
                reason: format!("status {status}"),
            }
            .into());
        }
        debug!("[sink/http] publish ok ({})", status);
        Ok(())
    }

    fn publish_error(
        &self,
        e: reqwest::Error,
    ) -> Error {
        if e.is_timeout() {
            SinkError::Timeout {
                destination: self.address.clone(),
                duration: self.timeout,
            }
            .into()
        } else {
            SinkError::Publish {
                destination: self.address.clone(),
                reason: e.to_string(),
            }
            .into()
        }
    }
}

/// Joins already-encoded JSON payloads into one JSON array without
/// re-parsing them.
pub fn join_json_array(batch: &[SinkMessage]) -> Vec<u8> {
    let len = batch.iter().map(|m| m.payload.len() + 1).sum::<usize>() + 1;
    let mut body = Vec::with_capacity(len);
    body.push(b'[');
    for (i, message) in batch.iter().enumerate() {
        if i > 0 {
            body.push(b',');
        }
        body.extend_from_slice(&message.payload);
    }
    body.push(b']');
    body
}

#[async_trait]
impl MessageWriter for HttpWriter {
    fn destination(&self) -> String {
        self.address.clone()
    }

    async fn write(
        &self,
        message: &SinkMessage,
    ) -> Result<()> {
        self.post(message.key.as_deref(), message.payload.clone()).await
    }
}

#[async_trait]
impl BatchWriter for HttpWriter {
    fn destination(&self) -> String {
        self.address.clone()
    }

    async fn write_batch(
        &self,
        batch: &[SinkMessage],
    ) -> Result<()> {
        self.post(None, join_json_array(batch)).await
    }

    async fn write_one(
        &self,
        message: &SinkMessage,
    ) -> Result<()> {
        self.post(message.key.as_deref(), join_json_array(std::slice::from_ref(message)))
            .await
    }
}
