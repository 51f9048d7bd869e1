//! # dimutex
//!
//! Distributed mutex backed by Google Cloud Storage conditional writes.
//!
//! Independent processes coordinate exclusive access to a named resource
//! without a lock server. The lock is a single object; the store's
//! create-if-absent and delete-if-generation-matches operations are the only
//! serialization point.
//!
//! - **Lock protocol**: [`LockHandle`] with acquire, release, refresh and
//!   lease reclaim
//! - **Transports**: [`GcsTransport`] for the JSON API or an emulator,
//!   [`MemoryStore`] for tests
//! - **Credentials**: [`Authenticator`] implementations backed by `gcp_auth`
//! - **Time**: injectable [`Clock`] for lease computation
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use dimutex::prelude::*;
//!
//! # async fn run() -> dimutex::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let mut lock = LockHandle::new(store, "my-bucket", "locks/report");
//!
//! lock.acquire().await?;
//! assert!(lock.acquired().await?);
//! lock.release().await?;
//! lock.close().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod gcs;
pub mod lock;
pub mod memory;
pub mod observability;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::auth::{Authenticator, GcpAuthenticator, NoAuth, StaticToken};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::LockConfig;
    pub use crate::error::{Error, Result};
    pub use crate::gcs::GcsTransport;
    pub use crate::lock::{AcquireOptions, LockHandle, LockRecord};
    pub use crate::memory::MemoryStore;
    pub use crate::transport::{ObjectId, ObjectStoreTransport, Precondition};
}

// Re-export key types at crate root for ergonomics
pub use auth::{Authenticator, GcpAuthenticator, NoAuth, StaticToken};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LockConfig;
pub use error::{Error, Result};
pub use gcs::GcsTransport;
pub use lock::{AcquireOptions, LockHandle, LockRecord};
pub use memory::MemoryStore;
pub use observability::{LogFormat, init_logging};
pub use transport::{
    ObjectId, ObjectResource, ObjectStoreTransport, Precondition, StoreResponse, Upload,
};
