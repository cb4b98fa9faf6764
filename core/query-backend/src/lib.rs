//! FILENAME: core/query-backend/src/lib.rs
//! Background query backend for the pivot engine.
//!
//! The dataset is stored once in SQLite on a dedicated worker thread. The
//! engine reaches it through `DelegatedSource`, which speaks the bridge
//! protocol over tokio channels.
//!
//! Layers:
//! - `store`: SQLite document store and query translation
//! - `protocol`: Tagged, id-correlated request/response messages
//! - `worker`: Thread owning the connection
//! - `bridge`: Client correlating responses to pending calls
//! - `delegated`: `DataSource` implementation with the init gate

pub mod config;
pub mod protocol;
pub mod store;
pub mod worker;
pub mod bridge;
pub mod delegated;

#[cfg(test)]
mod tests;

pub use bridge::Bridge;
pub use config::{BackendConfig, ConfigError, MAX_BATCH_SIZE};
pub use delegated::{connect_or_fallback, AnySource, DelegatedSource};
pub use protocol::{Request, RequestEnvelope, Response, ResponseEnvelope};
pub use store::{DocumentStore, StoreError};
