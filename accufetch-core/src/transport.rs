//! Boundary between the engine and whatever actually sends a batch.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{DispatchError, TransportError};

/// A request value carrying a discriminator.
///
/// The engine never looks inside a request; the kind only shows up in logs.
pub trait Tagged {
    fn kind(&self) -> &str;
}

impl Tagged for serde_json::Value {
    fn kind(&self) -> &str {
        self.get("type").and_then(|t| t.as_str()).unwrap_or("untyped")
    }
}

impl Tagged for String {
    fn kind(&self) -> &str {
        "string"
    }
}

/// Sends one batch and returns one response per request, in request order.
///
/// Implementations should watch `cancel` and return
/// [`TransportError::Cancelled`] as soon as it fires.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Request: Tagged + Send + Sync + 'static;
    type Response: Send + 'static;

    async fn send_batch(
        &self,
        requests: &[Self::Request],
        cancel: &CancellationToken,
    ) -> Result<Vec<Self::Response>, TransportError>;
}

#[async_trait]
impl<T: Transport> Transport for Arc<T> {
    type Request = T::Request;
    type Response = T::Response;

    async fn send_batch(
        &self,
        requests: &[Self::Request],
        cancel: &CancellationToken,
    ) -> Result<Vec<Self::Response>, TransportError> {
        (**self).send_batch(requests, cancel).await
    }
}

/// Receives dispatch failures. Called at most once per failed batch and never
/// for cancellation that happens during shutdown.
pub trait ErrorHandler: Send + Sync + 'static {
    fn fetch_error(&self, error: &DispatchError);
}

impl<F> ErrorHandler for F
where
    F: Fn(&DispatchError) + Send + Sync + 'static,
{
    fn fetch_error(&self, error: &DispatchError) {
        self(error)
    }
}

/// Handler that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrors;

impl ErrorHandler for LogErrors {
    fn fetch_error(&self, error: &DispatchError) {
        tracing::warn!(error = %error, "Batch dispatch failed");
    }
}
