//! Background loops: cancellation and a handle that stops and joins.

use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The cancellation token of a restartable loop.
///
/// Each run takes the token through [`arm`](Self::arm). A cancelled token is
/// never reused: arming after a stop installs a fresh one.
#[derive(Debug, Default)]
pub(crate) struct TokenSlot {
    current: Mutex<CancellationToken>,
}

impl TokenSlot {
    pub(crate) fn arm(&self) -> CancellationToken {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_cancelled() {
            *current = CancellationToken::new();
        }
        current.clone()
    }

    pub(crate) fn cancel(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

/// A spawned loop that can be told to stop and then joined.
///
/// ## Example
///
/// ```ignore
/// let task = processor.spawn();
/// // ... commit some work ...
/// let stats = task.stop().await;
/// println!("processed {} records", stats.processed);
/// ```
pub struct BackgroundTask<T> {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<T>,
}

impl<T: Default + Send + 'static> BackgroundTask<T> {
    pub(crate) fn new(name: &'static str, cancel: CancellationToken, handle: JoinHandle<T>) -> Self {
        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the loop to stop without waiting for it.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }

    /// Signal the loop and wait for it to finish its current step.
    pub async fn stop(self) -> T {
        self.cancel.cancel();
        match self.handle.await {
            Ok(stats) => stats,
            Err(err) => {
                tracing::error!(task = self.name, error = %err, "background task panicked");
                T::default()
            }
        }
    }
}
