//! Reload Coordinator
//!
//! Runs one background watch task that reloads a store whenever its
//! notifier reports a change.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --start--> Running --stop--> Stopping --> Stopped
//! ```
//!
//! `start` and `stop` form a single matched pair; a stopped coordinator
//! cannot be restarted. If a `stop` future is dropped before the watch
//! task has exited, the coordinator stays `Stopping` and a later `stop`
//! finishes the join and closes the notifier.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{NotifierError, ReloadError};
use crate::ports::{AddressMembership, Notifier, ReloadCallback};

/// Observable lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

type WatchResult = Result<(), NotifierError>;

enum Lifecycle {
    Idle,
    Running {
        cancel: CancellationToken,
        task: JoinHandle<WatchResult>,
    },
    /// `task` is `None` while a `stop` call is awaiting it
    Stopping {
        task: Option<JoinHandle<WatchResult>>,
    },
    Stopped,
}

impl Lifecycle {
    fn state(&self) -> CoordinatorState {
        match self {
            Lifecycle::Idle => CoordinatorState::Idle,
            Lifecycle::Running { .. } => CoordinatorState::Running,
            Lifecycle::Stopping { .. } => CoordinatorState::Stopping,
            Lifecycle::Stopped => CoordinatorState::Stopped,
        }
    }
}

/// Watch task being joined by `stop`
///
/// Dropped before the join completes, it hands the task back to the
/// lifecycle so a retried `stop` can finish.
struct PendingJoin<'a> {
    lifecycle: &'a Mutex<Lifecycle>,
    task: Option<JoinHandle<WatchResult>>,
}

impl PendingJoin<'_> {
    async fn join(mut self) -> Result<WatchResult, JoinError> {
        let joined = match &mut self.task {
            Some(task) => task.await,
            None => Ok(Ok(())),
        };
        self.task = None;
        joined
    }
}

impl Drop for PendingJoin<'_> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("[ReloadCoordinator] Stop interrupted, watch task kept for a retry");
            *self.lifecycle.lock() = Lifecycle::Stopping { task: Some(task) };
        }
    }
}

/// Keeps a store in sync with its persisted filter
pub struct ReloadCoordinator {
    store: Arc<dyn AddressMembership>,
    notifier: Arc<dyn Notifier>,
    lifecycle: Mutex<Lifecycle>,
}

impl ReloadCoordinator {
    pub fn new(store: Arc<dyn AddressMembership>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.lifecycle.lock().state()
    }

    /// Reload callback handed to the notifier
    ///
    /// Failures are logged and absorbed so the watch keeps running and the
    /// store keeps serving its last good filter.
    fn reload_callback(&self) -> ReloadCallback {
        let store = Arc::clone(&self.store);
        Arc::new(move |path: &Path| {
            info!(path = %path.display(), "[ReloadCoordinator] Reloading filter due to notification");
            if let Err(e) = store.load_from_file(path) {
                warn!(
                    path = %path.display(),
                    error = %e,
                    untrusted = e.is_untrusted_content(),
                    "[ReloadCoordinator] Reload failed, keeping last good filter"
                );
            }
            Ok(())
        })
    }

    /// Spawn the watch task under a child of `parent`
    ///
    /// Must be called from within a tokio runtime. Cancelling `parent`
    /// also ends the watch; `stop` is still required to release the
    /// notifier.
    pub fn start(&self, parent: &CancellationToken) -> Result<(), ReloadError> {
        let mut lifecycle = self.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return Err(ReloadError::InvalidStart(lifecycle.state()));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ReloadError::NoRuntime(e.to_string()))?;

        let cancel = parent.child_token();
        let watch_cancel = cancel.clone();
        let notifier = Arc::clone(&self.notifier);
        let on_reload = self.reload_callback();
        let task = runtime.spawn(async move {
            notifier.watch_for_change(watch_cancel, on_reload).await
        });

        *lifecycle = Lifecycle::Running { cancel, task };
        info!("[ReloadCoordinator] Started");
        Ok(())
    }

    /// Cancel the watch, wait for the task to exit, then close the notifier
    ///
    /// A notifier close failure is reported first; otherwise any fatal
    /// watch error. Cancellation itself is not an error.
    pub async fn stop(&self) -> Result<(), ReloadError> {
        let task = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopping { task: None }) {
                Lifecycle::Running { cancel, task } => {
                    debug!("[ReloadCoordinator] Stopping watch task");
                    cancel.cancel();
                    task
                }
                Lifecycle::Stopping { task: Some(task) } => {
                    debug!("[ReloadCoordinator] Resuming interrupted stop");
                    task
                }
                other => {
                    let state = other.state();
                    *lifecycle = other;
                    return Err(ReloadError::NotRunning(state));
                }
            }
        };

        let pending = PendingJoin {
            lifecycle: &self.lifecycle,
            task: Some(task),
        };
        let outcome = match pending.join().await {
            Ok(Ok(())) | Ok(Err(NotifierError::Cancelled)) => Ok(()),
            Ok(Err(e)) => Err(ReloadError::Watch(e)),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(ReloadError::TaskPanicked(e.to_string())),
        };

        let closed = self.notifier.close().await;
        *self.lifecycle.lock() = Lifecycle::Stopped;

        match (closed, outcome) {
            (Err(e), _) => {
                warn!(error = %e, "[ReloadCoordinator] Failed to close notifier");
                Err(ReloadError::Close(e))
            }
            (Ok(()), Err(e)) => {
                warn!(error = %e, "[ReloadCoordinator] Watch task ended with an error");
                Err(e)
            }
            (Ok(()), Ok(())) => {
                info!("[ReloadCoordinator] Stopped");
                Ok(())
            }
        }
    }
}

impl Drop for ReloadCoordinator {
    fn drop(&mut self) {
        // Never leave a watch task running without an owner
        if let Lifecycle::Running { cancel, .. } = &*self.lifecycle.lock() {
            cancel.cancel();
        }
    }
}
