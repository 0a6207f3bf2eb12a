//! JSON-over-HTTP batch transport.
//!
//! Posts each batch as one `AccumulatedReq` body and maps the reply
//! envelope back to a list of responses.

use std::marker::PhantomData;

use accufetch_core::{CancellationToken, Tagged, Transport, TransportError};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::wire::{AccumulatedReq, AccumulatedResp, ApiResp};

/// Batch transport over HTTP POST
pub struct HttpTransport<Req, Resp> {
    /// HTTP client
    client: Client,
    /// Batch endpoint URL
    url: String,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> Clone for HttpTransport<Req, Resp> {
    fn clone(&self) -> Self {
        Self { client: self.client.clone(), url: self.url.clone(), _marker: PhantomData }
    }
}

impl<Req, Resp> HttpTransport<Req, Resp> {
    /// Create a transport for the configured endpoint
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        if config.url.trim().is_empty() {
            return Err(ClientError::Config("batch endpoint URL is empty".into()));
        }
        info!(url = %config.url, "Creating HTTP batch transport");

        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self::with_client(client, config.url.clone()))
    }

    /// Create a transport sharing an existing HTTP client
    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into(), _marker: PhantomData }
    }

    /// Get the batch endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl<Req, Resp> HttpTransport<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    #[instrument(skip(self, requests), fields(url = %self.url, batch_size = requests.len()))]
    async fn post(&self, requests: &[Req]) -> Result<Vec<Resp>, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(&AccumulatedReq::new(requests))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        let envelope: ApiResp<AccumulatedResp<Resp>> =
            serde_json::from_str(&body).map_err(|e| {
                if status.is_success() {
                    TransportError::decode(e.to_string())
                } else {
                    TransportError::server(format!("Server returned status {}: {}", status, body))
                }
            })?;

        match envelope {
            ApiResp::Success(resp) => {
                debug!(responses = resp.responses.len(), "Batch response received");
                Ok(resp.responses)
            }
            ApiResp::Error { error } => {
                debug!(error = %error, "Batch endpoint returned error");
                Err(TransportError::Server(error))
            }
        }
    }
}

#[async_trait]
impl<Req, Resp> Transport for HttpTransport<Req, Resp>
where
    Req: Serialize + Tagged + Send + Sync + 'static,
    Resp: DeserializeOwned + Send + 'static,
{
    type Request = Req;
    type Response = Resp;

    async fn send_batch(
        &self,
        requests: &[Req],
        cancel: &CancellationToken,
    ) -> Result<Vec<Resp>, TransportError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.post(requests) => result,
        }
    }
}

/// Map a reqwest failure to the message the application shows.
fn classify(err: reqwest::Error) -> TransportError {
    if err.is_connect() {
        return TransportError::connection("No internet connection.");
    }
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_decode() {
        "decode"
    } else if err.is_body() {
        "body"
    } else if err.is_request() {
        "request"
    } else {
        "other"
    };
    TransportError::unknown(format!("Unknown server error({}): {}", kind, err))
}
