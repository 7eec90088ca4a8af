//! File Watcher Notifier
//!
//! Watches the directory holding the persisted filter so that both
//! in-place writes and rename-into-place replacements are seen. Bursts
//! of events are debounced: the reload runs once the file has been quiet
//! for `reload_delay`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::NotifierError;
use crate::ports::{Notifier, ReloadCallback};

type EventResult = notify::Result<Event>;

/// Notifier backed by OS file change events
///
/// The OS watch is registered when `watch_for_change` starts and released
/// when it returns, so an idle notifier holds no watch and queues no events.
pub struct FileWatcherNotifier {
    path: PathBuf,
    directory: PathBuf,
    reload_delay: Duration,
    watcher: Mutex<Option<RecommendedWatcher>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl FileWatcherNotifier {
    /// Create a notifier for `path`
    ///
    /// The file itself may not exist yet; its directory must.
    pub fn new(path: impl Into<PathBuf>, reload_delay: Duration) -> Result<Self, NotifierError> {
        let path = path.into();
        let directory = watch_directory(&path);
        if !directory.is_dir() {
            return Err(NotifierError::Watch {
                path: directory,
                reason: "directory does not exist".to_string(),
            });
        }

        Ok(Self {
            path,
            directory,
            reload_delay,
            watcher: Mutex::new(None),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// File whose changes trigger reloads
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register the OS watch and return its event stream
    fn register(&self) -> Result<UnboundedReceiver<EventResult>, NotifierError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: EventResult| {
            // Receiver gone means the watch loop has ended
            let _ = tx.send(event);
        })
        .map_err(|e| NotifierError::WatcherInit(e.to_string()))?;

        watcher
            .watch(&self.directory, RecursiveMode::NonRecursive)
            .map_err(|e| NotifierError::Watch {
                path: self.directory.clone(),
                reason: e.to_string(),
            })?;

        // Checked under the slot lock so a concurrent close cannot miss the watcher
        let mut slot = self.watcher.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(NotifierError::Closed);
        }
        *slot = Some(watcher);

        debug!(
            path = %self.path.display(),
            directory = %self.directory.display(),
            reload_delay_ms = self.reload_delay.as_millis() as u64,
            "[FileWatcherNotifier] Watcher registered"
        );
        Ok(rx)
    }
}

fn watch_directory(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Whether `event` is a write or create touching `file_name`
fn is_change_to(event: &Event, file_name: Option<&OsStr>) -> bool {
    let is_change = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_));
    is_change && event.paths.iter().any(|p| p.file_name() == file_name)
}

/// Debounce loop shared by the watcher
async fn run_debounced(
    path: &Path,
    reload_delay: Duration,
    mut events: UnboundedReceiver<EventResult>,
    cancel: CancellationToken,
    on_reload: ReloadCallback,
) -> Result<(), NotifierError> {
    let file_name = path.file_name();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[FileWatcherNotifier] Stopping file watcher due to cancellation");
                return Ok(());
            }
            event = events.recv() => match event {
                None => {
                    debug!("[FileWatcherNotifier] Event channel closed");
                    return Ok(());
                }
                Some(Err(e)) => {
                    error!(error = %e, "[FileWatcherNotifier] Error while watching file");
                    return Err(NotifierError::Backend(e.to_string()));
                }
                Some(Ok(event)) => {
                    if is_change_to(&event, file_name) {
                        debug!(path = %path.display(), "[FileWatcherNotifier] File change detected");
                        deadline = Some(Instant::now() + reload_delay);
                    }
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                invoke_reload(path, &on_reload).await;
            }
        }
    }
}

/// Run the callback off the async workers and log its outcome
pub(crate) async fn invoke_reload(path: &Path, on_reload: &ReloadCallback) {
    let callback = Arc::clone(on_reload);
    let path = path.to_path_buf();
    let shown = path.display().to_string();

    match tokio::task::spawn_blocking(move || callback(&path)).await {
        Ok(Ok(())) => debug!(path = %shown, "[FileWatcherNotifier] Reload callback completed"),
        Ok(Err(e)) => warn!(
            path = %shown,
            error = %e,
            "[FileWatcherNotifier] Error during reload, keeping current filter"
        ),
        Err(e) => error!(path = %shown, error = %e, "[FileWatcherNotifier] Reload callback panicked"),
    }
}

#[async_trait]
impl Notifier for FileWatcherNotifier {
    async fn watch_for_change(
        &self,
        cancel: CancellationToken,
        on_reload: ReloadCallback,
    ) -> Result<(), NotifierError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NotifierError::Closed);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(NotifierError::AlreadyWatching);
        }
        let events = self.register()?;

        info!(path = %self.path.display(), "[FileWatcherNotifier] Watching for changes");
        let result = run_debounced(&self.path, self.reload_delay, events, cancel, on_reload).await;
        self.watcher.lock().take();
        result
    }

    async fn close(&self) -> Result<(), NotifierError> {
        self.closed.store(true, Ordering::Release);
        // Dropping the watcher drops the event sender, which ends a running loop
        if self.watcher.lock().take().is_some() {
            debug!(path = %self.path.display(), "[FileWatcherNotifier] Watcher closed");
        }
        Ok(())
    }
}
