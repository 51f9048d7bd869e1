//! Test utilities for dimutex.
//!
//! - [`GcsEmulator`]: in-process GCS JSON API server for end-to-end tests
//! - [`RecordingStore`]: transport wrapper with call recording and hooks
//! - [`init_test_logging`]: tracing setup that writes through the test harness

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Panics are acceptable in test support code
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod emulator;
pub mod storage;

pub use emulator::{GcsEmulator, RecordedRequest};
pub use storage::{OpKind, RecordingStore, StoreOp};

use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes test logging once per process.
///
/// Honors `RUST_LOG`; defaults to `dimutex=debug`.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dimutex=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Returns a unique lock key under `prefix`, e.g. `tests/01J9...`.
#[must_use]
pub fn unique_key(prefix: &str) -> String {
    format!("{prefix}/{}", ulid::Ulid::new())
}
