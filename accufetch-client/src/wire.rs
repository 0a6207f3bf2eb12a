//! JSON envelopes exchanged with a batch endpoint.
//!
//! Request body:
//!
//! ```json
//! {"type": "AccumulatedReq", "requests": [ ... ]}
//! ```
//!
//! Response body, either
//!
//! ```json
//! {"type": "success", "responses": [ ... ]}
//! {"type": "error", "error": "message"}
//! ```

use serde::{Deserialize, Serialize};

/// Discriminator value of a batch request body
pub const ACCUMULATED_REQ_TYPE: &str = "AccumulatedReq";

/// Outgoing batch body. Borrows the requests so nothing is cloned per send.
#[derive(Debug, Serialize)]
pub struct AccumulatedReq<'a, R> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub requests: &'a [R],
}

impl<'a, R> AccumulatedReq<'a, R> {
    pub fn new(requests: &'a [R]) -> Self {
        Self { kind: ACCUMULATED_REQ_TYPE, requests }
    }
}

/// Owned form of a batch body, for the receiving side.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccumulatedBatch<R> {
    #[serde(rename = "type")]
    pub kind: String,
    pub requests: Vec<R>,
}

/// Success payload of a batch response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatedResp<R> {
    pub responses: Vec<R>,
}

/// Generic API response: success payload fields flattened next to the tag,
/// or an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ApiResp<T> {
    Success(T),
    Error { error: String },
}

impl<T> ApiResp<T> {
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error { error: msg.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_result(self) -> Result<T, String> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Error { error } => Err(error),
        }
    }
}
