//! Manual Notifier
//!
//! Reloads on explicit request, e.g. from an admin endpoint or a signal
//! handler. Each trigger causes exactly one reload; there is no debounce.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::file_watcher::invoke_reload;
use crate::error::NotifierError;
use crate::ports::{Notifier, ReloadCallback};

/// Notifier driven by [`ReloadTrigger`] handles
pub struct ManualNotifier {
    path: PathBuf,
    requests: Mutex<Option<UnboundedReceiver<()>>>,
    closed: AtomicBool,
}

/// Cloneable handle that requests a reload
#[derive(Clone, Debug)]
pub struct ReloadTrigger {
    tx: UnboundedSender<()>,
}

impl ReloadTrigger {
    /// Request one reload; fails once the notifier is gone
    pub fn trigger(&self) -> Result<(), NotifierError> {
        self.tx.send(()).map_err(|_| NotifierError::Closed)
    }
}

impl ManualNotifier {
    /// Notifier that reloads `path` whenever the returned trigger fires
    pub fn new(path: impl Into<PathBuf>) -> (Self, ReloadTrigger) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Self {
            path: path.into(),
            requests: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
        };
        (notifier, ReloadTrigger { tx })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Notifier for ManualNotifier {
    async fn watch_for_change(
        &self,
        cancel: CancellationToken,
        on_reload: ReloadCallback,
    ) -> Result<(), NotifierError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NotifierError::Closed);
        }
        let mut requests = self
            .requests
            .lock()
            .take()
            .ok_or(NotifierError::AlreadyWatching)?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[ManualNotifier] Stopping due to cancellation");
                    return Ok(());
                }
                request = requests.recv() => match request {
                    Some(()) => {
                        debug!(path = %self.path.display(), "[ManualNotifier] Reload requested");
                        invoke_reload(&self.path, &on_reload).await;
                    }
                    None => {
                        debug!("[ManualNotifier] All triggers dropped");
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn close(&self) -> Result<(), NotifierError> {
        self.closed.store(true, Ordering::Release);
        self.requests.lock().take();
        Ok(())
    }
}
