//! accufetch core
//!
//! Accumulates individually submitted requests, sends them as one batch
//! through a [`Transport`], and hands each caller the response at its
//! position in the batch. Dispatch can be paused, resumed and cancelled.
//!
//! ```rust,ignore
//! use accufetch_core::{AccumulatedFetching, LogErrors};
//!
//! let engine = AccumulatedFetching::new(my_transport, LogErrors);
//! let a = engine.submit(request_a);
//! let b = engine.submit(request_b);
//! let (a, b) = (a.await?, b.await?);
//! engine.close();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod transport;

pub use config::EngineConfig;
pub use engine::{AccumulatedFetching, EngineState, PendingResponse};
pub use error::{DispatchError, FetchError, TransportError};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use transport::{ErrorHandler, LogErrors, Tagged, Transport};

pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod engine_tests;
