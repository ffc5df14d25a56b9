//! Progress notifier: fans day status transitions out to registered callbacks.
//!
//! Transports (WebSocket, logs, metrics) register a callback here; the
//! notifier only guarantees that one failing observer never keeps the others
//! from being called and never reaches the caller.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::RwLock;

use daylog_core::error::AppError;
use daylog_core::result::AppResult;
use daylog_core::types::{CallbackId, DayKey, ProcessingStatus};

use crate::scheduler::executor::panic_message;

/// Registered progress callback.
pub type ProgressCallback =
    Arc<dyn Fn(DayKey, ProcessingStatus) -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

/// Callback registry for day processing progress.
pub struct ProgressNotifier {
    callbacks: RwLock<Vec<(CallbackId, ProgressCallback)>>,
    /// Time budget for one callback invocation
    timeout: Duration,
}

impl std::fmt::Debug for ProgressNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressNotifier")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProgressNotifier {
    /// Create an empty notifier with a 10 second callback timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(10))
    }

    /// Create an empty notifier with the given callback timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            timeout,
        }
    }

    /// Register a callback. The returned id removes it again.
    pub async fn add<F, Fut>(&self, callback: F) -> CallbackId
    where
        F: Fn(DayKey, ProcessingStatus) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let id = CallbackId::new();
        let callback: ProgressCallback = Arc::new(move |key, status| callback(key, status).boxed());
        self.callbacks.write().await.push((id, callback));
        tracing::debug!("Registered progress callback {}", id);
        id
    }

    /// Unregister a callback. Returns `false` if the id is unknown.
    pub async fn remove(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.write().await;
        let before = callbacks.len();
        callbacks.retain(|(cb_id, _)| *cb_id != id);
        callbacks.len() != before
    }

    /// Number of registered callbacks.
    pub async fn len(&self) -> usize {
        self.callbacks.read().await.len()
    }

    /// Whether no callback is registered.
    pub async fn is_empty(&self) -> bool {
        self.callbacks.read().await.is_empty()
    }

    /// Invoke every callback in registration order. Returns how many succeeded.
    ///
    /// Errors, panics, and timeouts are logged and skipped.
    pub async fn notify_all(&self, key: &DayKey, status: ProcessingStatus) -> usize {
        let callbacks: Vec<(CallbackId, ProgressCallback)> = self.callbacks.read().await.clone();

        let mut delivered = 0;
        for (id, callback) in callbacks {
            match self.invoke(&callback, key, status).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    key = %key,
                    status = %status,
                    "Progress callback {} failed: {}",
                    id,
                    e
                ),
            }
        }
        delivered
    }

    async fn invoke(
        &self,
        callback: &ProgressCallback,
        key: &DayKey,
        status: ProcessingStatus,
    ) -> AppResult<()> {
        let call = AssertUnwindSafe(async { callback(key.clone(), status).await }).catch_unwind();
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(AppError::internal(format!(
                "callback panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(AppError::timeout(format!(
                "callback did not finish within {:?}",
                self.timeout
            ))),
        }
    }
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new()
    }
}
