//! Smoke tests against a real GCS bucket.
//!
//! These tests require Application Default Credentials with object
//! create/get/update/delete on the bucket.
//!
//! # Running Tests
//!
//! ```bash
//! DIMUTEX_TEST_BUCKET=<bucket> \
//! cargo test --package dimutex-integration-tests --features gcs-smoke -- --ignored
//! ```

#![cfg(feature = "gcs-smoke")]

use std::env;
use std::time::Duration;

use dimutex::{AcquireOptions, LockConfig, LockHandle};
use dimutex_test_utils::{init_test_logging, unique_key};

fn test_config(ttl: Duration) -> LockConfig {
    let bucket = env::var("DIMUTEX_TEST_BUCKET").expect("DIMUTEX_TEST_BUCKET required");
    LockConfig::new(bucket, unique_key("dimutex-smoke")).with_ttl(ttl)
}

#[tokio::test]
#[ignore = "requires GCS credentials and DIMUTEX_TEST_BUCKET"]
async fn acquire_conflict_release() {
    init_test_logging();
    let config = test_config(Duration::from_secs(60));

    let mut first = LockHandle::connect(&config).await.expect("connect");
    let mut second = LockHandle::connect(&config).await.expect("connect");

    first.acquire().await.expect("acquire");
    let err = second.acquire().await.unwrap_err();
    assert!(err.is_already_acquired(), "got {err:?}");

    first.refresh().await.expect("refresh");
    first.release().await.expect("release");
    assert!(!second.acquired().await.expect("probe"));

    first.close().await.expect("close");
    second.close().await.expect("close");
}

#[tokio::test]
#[ignore = "requires GCS credentials and DIMUTEX_TEST_BUCKET"]
async fn expired_lease_is_reclaimed() {
    init_test_logging();
    let config = test_config(Duration::from_secs(1));

    let mut holder = LockHandle::connect(&config).await.expect("connect");
    holder.acquire().await.expect("acquire");
    let original = holder.generation().map(str::to_string);

    tokio::time::sleep(Duration::from_secs(2)).await;

    let mut contender = LockHandle::connect(&config).await.expect("connect");
    contender.acquire().await.expect("reclaim");
    assert_ne!(contender.generation().map(str::to_string), original);

    // Release is unconditional, so the stale holder removes the new record.
    holder.release().await.expect("release");
    let err = contender.release().await.unwrap_err();
    assert!(err.is_already_released(), "got {err:?}");
}

#[tokio::test]
#[ignore = "requires GCS credentials and DIMUTEX_TEST_BUCKET"]
async fn forced_acquire_takes_over() {
    init_test_logging();
    let config = test_config(Duration::from_secs(60));

    let mut holder = LockHandle::connect(&config).await.expect("connect");
    let mut thief = LockHandle::connect(&config).await.expect("connect");

    holder.acquire().await.expect("acquire");
    thief
        .acquire_with(AcquireOptions::forced())
        .await
        .expect("forced acquire");

    let err = holder.refresh().await.unwrap_err();
    assert!(err.is_already_acquired(), "got {err:?}");

    thief.release().await.expect("release");
}
