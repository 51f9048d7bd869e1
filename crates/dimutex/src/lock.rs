//! Distributed lock backed by conditional object writes.
//!
//! A lock is a single object in a bucket. Holding the lock means the object
//! exists; the object's custom `expires` metadata bounds the lease. All
//! coordination happens in the store:
//! - **Create-if-absent**: acquisition uploads the object with
//!   `ifGenerationMatch=0`, so exactly one creator wins.
//! - **Delete-if-unchanged**: an expired lease is reclaimed by deleting the
//!   object conditioned on the generation that was observed to be expired.
//!   A newer holder always has a different generation, so a slow reclaimer
//!   can never delete it.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = LockConfig::from_env("locks/nightly-report")?;
//! let mut lock = LockHandle::connect(&config).await?;
//!
//! lock.acquire().await?;
//! // Critical section - only one holder at a time
//! lock.refresh().await?;
//! lock.release().await?;
//! lock.close().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use http::StatusCode;
use tracing::{Instrument, debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::{DEFAULT_TTL, LockConfig};
use crate::envelope::{
    DEFAULT_CONTENT, ObjectEnvelope, encode_upload, expires_from_metadata, expires_metadata,
};
use crate::error::{Error, Result};
use crate::gcs::GcsTransport;
use crate::observability::lock_span;
use crate::transport::{ObjectId, ObjectResource, ObjectStoreTransport, Precondition};

/// Options for [`LockHandle::acquire_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Overwrite the lock object unconditionally, stealing it from any holder.
    pub force: bool,
    /// Reclaim the lock if the current lease has expired.
    pub expired: bool,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            force: false,
            expired: true,
        }
    }
}

impl AcquireOptions {
    /// Unconditional takeover.
    #[must_use]
    pub const fn forced() -> Self {
        Self {
            force: true,
            expired: true,
        }
    }

    /// Fail on any existing record, expired or not.
    #[must_use]
    pub const fn without_reclaim() -> Self {
        Self {
            force: false,
            expired: false,
        }
    }
}

/// Snapshot of the lock object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Generation of the stored object.
    pub generation: String,
    /// Lease expiry.
    pub expires: DateTime<Utc>,
}

impl LockRecord {
    fn from_resource(resource: &ObjectResource) -> Result<Self> {
        Ok(Self {
            generation: resource.generation.clone(),
            expires: expires_from_metadata(&resource.metadata)?,
        })
    }

    /// Returns true if the lease has run out at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }
}

/// Handle to one named lock.
///
/// The handle keeps no lock state of its own beyond the generation of the
/// last record it created; every operation asks the store.
///
/// Handles are `required` by default: [`close`](Self::close) fails with
/// [`Error::InvariantViolation`] unless [`acquire`](Self::acquire),
/// [`acquired`](Self::acquired) or [`release`](Self::release) was called.
/// This catches callers that assume opening a handle takes the lock.
/// Dropping a required handle without closing it logs an error and, in
/// debug builds, panics.
pub struct LockHandle<S: ObjectStoreTransport + ?Sized = dyn ObjectStoreTransport> {
    transport: Arc<S>,
    object: ObjectId,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    content: Bytes,
    required: bool,
    generation: Option<String>,
    closed: bool,
}

impl<S: ObjectStoreTransport + ?Sized> std::fmt::Debug for LockHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("object", &self.object)
            .field("ttl", &self.ttl)
            .field("required", &self.required)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl LockHandle<GcsTransport> {
    /// Builds a GCS transport from `config` and opens a handle on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be created.
    pub async fn connect(config: &LockConfig) -> Result<Self> {
        let transport = Arc::new(GcsTransport::from_config(config).await?);
        Ok(Self::from_config(transport, config))
    }
}

impl<S: ObjectStoreTransport + ?Sized> LockHandle<S> {
    /// Opens a handle for `bucket`/`key` with a 60 second lease and the
    /// system clock.
    #[must_use]
    pub fn new(transport: Arc<S>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            transport,
            object: ObjectId::new(bucket, key),
            ttl: DEFAULT_TTL,
            clock: Arc::new(SystemClock),
            content: Bytes::from_static(DEFAULT_CONTENT),
            required: true,
            generation: None,
            closed: false,
        }
    }

    /// Opens a handle using the location, lease and `required` flag from `config`.
    #[must_use]
    pub fn from_config(transport: Arc<S>, config: &LockConfig) -> Self {
        Self::new(transport, &config.bucket, &config.key)
            .with_ttl(config.ttl)
            .with_required(config.required)
    }

    /// Sets the lease length.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Replaces the time source used to compute and check expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sets whether the handle must be used before it is closed.
    #[must_use]
    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Sets the content stored in the lock object.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = content.into();
        self
    }

    /// Returns the lock object location.
    #[must_use]
    pub fn object(&self) -> &ObjectId {
        &self.object
    }

    /// Returns the lease length.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the generation of the last record this handle created.
    #[must_use]
    pub fn generation(&self) -> Option<&str> {
        self.generation.as_deref()
    }

    /// Acquires the lock, reclaiming it if the current lease has expired.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyAcquired`] if another holder has a live lease.
    /// - [`Error::Transport`] for unexpected store responses.
    pub async fn acquire(&mut self) -> Result<()> {
        self.acquire_with(AcquireOptions::default()).await
    }

    /// Acquires the lock with explicit options.
    ///
    /// At most one reclaim is attempted per call: after deleting an expired
    /// record the create is retried once without reclaim, so contention
    /// ends in success or [`Error::AlreadyAcquired`], never a loop.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyAcquired`] if the lock is held and cannot be reclaimed.
    /// - [`Error::Protocol`] if the existing record has no readable expiry.
    /// - [`Error::Transport`] for unexpected store responses.
    pub async fn acquire_with(&mut self, options: AcquireOptions) -> Result<()> {
        self.required = false;
        let span = lock_span("acquire", &self.object.bucket, &self.object.key);
        self.do_acquire(options).instrument(span).await
    }

    async fn do_acquire(&mut self, options: AcquireOptions) -> Result<()> {
        let mut reclaim = options.expired;

        loop {
            let response = self.create(options.force).await?;

            if response.status.is_success() {
                let resource: ObjectResource = response.json()?;
                info!(
                    generation = %resource.generation,
                    force = options.force,
                    "lock acquired"
                );
                self.generation = Some(resource.generation);
                return Ok(());
            }

            if response.status != StatusCode::PRECONDITION_FAILED {
                return Err(response.into_error());
            }
            if !reclaim {
                debug!("lock held by another owner");
                return Err(self.already_acquired());
            }

            reclaim = false;
            self.release_expired().await?;
        }
    }

    /// Deletes the lock object if and only if its lease has expired.
    ///
    /// Succeeds when the object is already gone. Fails with
    /// [`Error::AlreadyAcquired`] when the lease is live or the object
    /// changed between the read and the conditional delete.
    async fn release_expired(&self) -> Result<()> {
        let response = self.transport.get(&self.object).await?;
        if response.status == StatusCode::NOT_FOUND {
            debug!("lock disappeared before reclaim");
            return Ok(());
        }
        if !response.status.is_success() {
            return Err(response.into_error());
        }

        let record = LockRecord::from_resource(&response.json()?)?;
        let now = self.clock.now();
        if !record.is_expired_at(now) {
            debug!(expires = %record.expires, "lease still valid");
            return Err(self.already_acquired());
        }

        let response = self
            .transport
            .delete(
                &self.object,
                Precondition::MatchesGeneration(record.generation.clone()),
            )
            .await?;

        match response.status {
            status if status.is_success() => {
                info!(
                    generation = %record.generation,
                    expires = %record.expires,
                    "reclaimed expired lock"
                );
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                debug!("expired lock removed concurrently");
                Ok(())
            }
            StatusCode::PRECONDITION_FAILED => {
                debug!(
                    generation = %record.generation,
                    "lock changed during reclaim"
                );
                Err(self.already_acquired())
            }
            _ => Err(response.into_error()),
        }
    }

    /// Releases the lock by deleting the lock object.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyReleased`] if no lock object exists.
    /// - [`Error::Transport`] for unexpected store responses.
    pub async fn release(&mut self) -> Result<()> {
        self.required = false;
        let span = lock_span("release", &self.object.bucket, &self.object.key);
        async {
            let response = self
                .transport
                .delete(&self.object, Precondition::None)
                .await?;
            match response.status {
                status if status.is_success() => {
                    self.generation = None;
                    info!("lock released");
                    Ok(())
                }
                StatusCode::NOT_FOUND => Err(self.already_released()),
                _ => Err(response.into_error()),
            }
        }
        .instrument(span)
        .await
    }

    /// Extends the lease to `now + ttl` without giving up the lock.
    ///
    /// Only the holder may refresh: the update is conditioned on the
    /// generation this handle created, and a handle that holds no record
    /// sends nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyReleased`] if this handle holds no record or no lock
    ///   object exists.
    /// - [`Error::AlreadyAcquired`] if the record was replaced by another holder.
    /// - [`Error::Transport`] for unexpected store responses.
    pub async fn refresh(&mut self) -> Result<()> {
        let span = lock_span("refresh", &self.object.bucket, &self.object.key);
        async {
            let Some(generation) = self.generation.clone() else {
                debug!("refresh without a held record");
                return Err(self.already_released());
            };
            let expires = self.expires_at();
            let response = self
                .transport
                .patch_metadata(
                    &self.object,
                    expires_metadata(expires),
                    Precondition::MatchesGeneration(generation),
                )
                .await?;
            match response.status {
                status if status.is_success() => {
                    debug!(expires = %expires, "lease extended");
                    Ok(())
                }
                StatusCode::NOT_FOUND => Err(self.already_released()),
                StatusCode::PRECONDITION_FAILED => Err(self.already_acquired()),
                _ => Err(response.into_error()),
            }
        }
        .instrument(span)
        .await
    }

    /// Returns whether a lock object exists, expired or not.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] for unexpected store responses.
    pub async fn acquired(&mut self) -> Result<bool> {
        self.required = false;
        let span = lock_span("acquired", &self.object.bucket, &self.object.key);
        async {
            let response = self.transport.get(&self.object).await?;
            match response.status {
                status if status.is_success() => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                _ => Err(response.into_error()),
            }
        }
        .instrument(span)
        .await
    }

    /// Reads the current lock record without side effects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the record has no readable expiry, or
    /// [`Error::Transport`] for unexpected store responses.
    pub async fn record(&self) -> Result<Option<LockRecord>> {
        let response = self.transport.get(&self.object).await?;
        match response.status {
            status if status.is_success() => {
                LockRecord::from_resource(&response.json()?).map(Some)
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(response.into_error()),
        }
    }

    /// Closes the handle and its transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if the handle is required but
    /// was never used.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        self.transport.close().await;
        if self.required {
            error!(object = %self.object, "lock is required but was not used");
            return Err(Error::InvariantViolation {
                message: format!(
                    "lock {} is required but was not used; call acquire or acquired, \
                     or open the handle with required = false",
                    self.object
                ),
            });
        }
        Ok(())
    }

    /// Runs `body` with the handle, then closes it on every exit path.
    ///
    /// An error from `body` takes precedence over an error from
    /// [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// Returns the error from `body`, or from `close` if `body` succeeded.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let report = lock
    ///     .scope(|lock| {
    ///         Box::pin(async move {
    ///             lock.acquire().await?;
    ///             let report = build_report().await;
    ///             lock.release().await?;
    ///             Ok(report)
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn scope<T, F>(mut self, body: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, Result<T>>,
    {
        let outcome = body(&mut self).await;
        let closed = self.close().await;
        let value = outcome?;
        closed?;
        Ok(value)
    }

    async fn create(&self, force: bool) -> Result<crate::transport::StoreResponse> {
        let envelope = ObjectEnvelope::for_lock(&self.object.key, self.expires_at());
        let upload = encode_upload(&envelope, &self.content)?;
        let precondition = if force {
            Precondition::None
        } else {
            Precondition::DoesNotExist
        };
        self.transport
            .insert(&self.object, upload, precondition)
            .await
    }

    fn expires_at(&self) -> DateTime<Utc> {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        self.clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn already_acquired(&self) -> Error {
        Error::AlreadyAcquired {
            bucket: self.object.bucket.clone(),
            key: self.object.key.clone(),
        }
    }

    fn already_released(&self) -> Error {
        Error::AlreadyReleased {
            bucket: self.object.bucket.clone(),
            key: self.object.key.clone(),
        }
    }
}

impl<S: ObjectStoreTransport + ?Sized> Drop for LockHandle<S> {
    fn drop(&mut self) {
        if self.closed || !self.required || std::thread::panicking() {
            return;
        }
        error!(
            object = %self.object,
            "lock handle dropped without close; acquire or acquired was never called"
        );
        debug_assert!(
            self.closed || !self.required,
            "lock is required but was not used: {}",
            self.object
        );
    }
}
