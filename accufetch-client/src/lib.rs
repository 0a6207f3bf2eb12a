//! accufetch client
//!
//! JSON-over-HTTP transport for the accufetch batching engine, plus typed
//! wrappers for the user-management endpoints.
//!
//! ```rust,ignore
//! use accufetch_client::{connect, ClientConfig};
//!
//! let engine = connect::<serde_json::Value, serde_json::Value>(
//!     &ClientConfig::from_env(),
//!     |err: &accufetch_core::DispatchError| eprintln!("{err}"),
//! )?;
//! let resp = engine.submit(serde_json::json!({"type": "ping"})).await?;
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod user;
pub mod wire;

pub use config::ClientConfig;
pub use error::ClientError;
pub use http::HttpTransport;
pub use user::{UserClient, UserEngine, UserRequest};
pub use wire::{AccumulatedBatch, AccumulatedReq, AccumulatedResp, ApiResp};

use accufetch_core::{AccumulatedFetching, ErrorHandler, Tagged};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Start an engine posting batches to `config.url`. Must be called inside a
/// tokio runtime.
pub fn connect<Req, Resp>(
    config: &ClientConfig,
    handler: impl ErrorHandler,
) -> Result<AccumulatedFetching<HttpTransport<Req, Resp>>, ClientError>
where
    Req: Serialize + Tagged + Send + Sync + 'static,
    Resp: DeserializeOwned + Send + 'static,
{
    let transport = HttpTransport::new(config)?;
    Ok(AccumulatedFetching::with_config(transport, handler, config.engine.clone()))
}
