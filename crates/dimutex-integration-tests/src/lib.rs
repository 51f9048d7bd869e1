//! Workspace-level integration tests for dimutex.
//!
//! The workspace root is virtual, so end-to-end tests that drive the lock
//! over HTTP against [`dimutex_test_utils::GcsEmulator`] (and, behind the
//! `gcs-smoke` feature, against a real bucket) live in this crate's `tests/`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]
