//! # rowkit-postgrest — PostgREST backend for the rowkit data layer
//!
//! This crate provides the PostgREST-specific implementation of rowkit's
//! data access contract. It depends on [`rowkit-data`] for the abstract
//! traits and types, and adds query translation, the HTTP and websocket
//! transports, realtime channel bookkeeping and configuration loading.
//!
//! # What's in this crate
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PostgrestProvider`] | `DataProvider` + `RealtimeProvider` over a [`Transport`] |
//! | [`HttpTransport`] | Live transport: reqwest for REST, tokio-tungstenite for realtime |
//! | [`MemoryTransport`] | In-process backend for tests and local development |
//! | [`translate`] | Pure translation of query descriptors into PostgREST requests |
//! | [`ChannelRegistry`] | Tracks open realtime channels and their dispatcher tasks |
//! | [`PostgrestConfig`] | Connection settings, loaded from YAML, `.env` and environment |
//! | [`BackendFailure`] | Decoded PostgREST error body |
//! | [`TransportErrorExt`] | Extension trait to convert driver errors → `DataError` (`.into_data_error()`) |
//!
//! # Quick start
//!
//! ```ignore
//! use rowkit_postgrest::prelude::*;
//!
//! let config = PostgrestConfig::load("dev")?;
//! let provider = Arc::new(PostgrestProvider::http(config)?);
//! provider.connect().await?;
//!
//! let users: Repository<User, _> = Repository::new(provider.clone());
//! let page = users.paginate(1, 20, FindOptions::new()).await?;
//! ```
//!
//! # Atomicity
//!
//! PostgREST runs every request in its own transaction. Client-driven
//! transactions are not available: `begin_transaction()` returns
//! `DataError::Unsupported`. Multi-statement work that must be atomic
//! belongs in a database function invoked through `raw()`.

pub mod config;
pub mod error;
pub mod memory;
pub mod provider;
pub mod realtime;
pub mod rest;
mod socket;
pub mod translate;
pub mod transport;

pub use config::{ConfigError, PostgrestConfig};
pub use error::{BackendFailure, TransportErrorExt};
pub use memory::MemoryTransport;
pub use provider::PostgrestProvider;
pub use realtime::ChannelRegistry;
pub use rest::HttpTransport;
pub use transport::{ChannelSpec, RawChannel, Response, Transport};

/// Type alias for `Result<T, DataError>`.
pub type PostgrestResult<T> = Result<T, rowkit_data::DataError>;

pub mod prelude {
    //! Re-exports of the most commonly used types.
    pub use crate::{
        HttpTransport, MemoryTransport, PostgrestConfig, PostgrestProvider, Transport,
        TransportErrorExt,
    };
    pub use rowkit_data::prelude::*;
}
