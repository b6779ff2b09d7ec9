//! Watch mode
//!
//! Runs an initial pass, then watches the content directory and runs another
//! incremental pass for every settled batch of filesystem changes. Query errors are
//! reported by the runner and never stop the loop; other pass failures are logged and
//! the next batch is tried.

use crate::error::BuildError;
use crate::pipeline::{BuildDriver, BuildReport};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub root: PathBuf,
    /// Quiet period after the last event before a pass runs
    pub debounce_ms: u64,
    /// Path fragments that never trigger a pass
    pub ignore: Vec<String>,
}

impl WatchOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        WatchOptions {
            root: root.into(),
            debounce_ms: 100,
            ignore: vec![
                "/.git/".to_string(),
                "/.cache/".to_string(),
                "/node_modules/".to_string(),
                "/public/".to_string(),
                ".swp".to_string(),
                ".tmp".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl ChangeEvent {
    fn path(&self) -> &Path {
        match self {
            ChangeEvent::Created(p) | ChangeEvent::Modified(p) | ChangeEvent::Removed(p) => p,
        }
    }

    fn from_notify(event: Event) -> Vec<ChangeEvent> {
        let wrap: fn(PathBuf) -> ChangeEvent = match event.kind {
            EventKind::Create(_) => ChangeEvent::Created,
            EventKind::Modify(_) => ChangeEvent::Modified,
            EventKind::Remove(_) => ChangeEvent::Removed,
            _ => return Vec::new(),
        };
        event.paths.into_iter().map(wrap).collect()
    }
}

/// Collects events until the debounce window passes; the latest event per path wins
struct EventBatcher {
    options: WatchOptions,
    pending: BTreeMap<PathBuf, ChangeEvent>,
    last_event: Option<Instant>,
}

impl EventBatcher {
    fn new(options: WatchOptions) -> Self {
        EventBatcher {
            options,
            pending: BTreeMap::new(),
            last_event: None,
        }
    }

    fn add(&mut self, event: ChangeEvent) {
        if self.should_ignore(event.path()) {
            return;
        }
        self.last_event = Some(Instant::now());
        self.pending.insert(event.path().to_path_buf(), event);
    }

    fn should_ignore(&self, path: &Path) -> bool {
        let path = path.to_string_lossy().replace('\\', "/");
        self.options.ignore.iter().any(|fragment| path.contains(fragment.as_str()))
    }

    fn ready(&self) -> bool {
        let window = Duration::from_millis(self.options.debounce_ms);
        !self.pending.is_empty() && self.last_event.is_some_and(|t| t.elapsed() >= window)
    }

    fn take_batch(&mut self) -> Vec<ChangeEvent> {
        self.last_event = None;
        std::mem::take(&mut self.pending).into_values().collect()
    }
}

pub struct WatchDaemon {
    driver: BuildDriver,
    options: WatchOptions,
    cancel: CancellationToken,
}

impl WatchDaemon {
    pub fn new(driver: BuildDriver, options: WatchOptions) -> Self {
        WatchDaemon {
            driver,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops [`Self::run`] when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn driver(&self) -> &BuildDriver {
        &self.driver
    }

    /// Initial pass, then one pass per settled batch until cancelled
    pub async fn run(&self) -> Result<(), BuildError> {
        info!("Running initial build pass");
        self.pass().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if tx.send(res).is_err() {
                debug!("Watch channel closed");
            }
        })
        .map_err(|e| BuildError::Config(format!("Failed to create watcher: {}", e)))?;
        watcher
            .watch(&self.options.root, RecursiveMode::Recursive)
            .map_err(|e| {
                BuildError::Config(format!(
                    "Failed to watch {}: {}",
                    self.options.root.display(),
                    e
                ))
            })?;
        info!(root = %self.options.root.display(), "Watching for changes");

        let mut batcher = EventBatcher::new(self.options.clone());
        let tick = Duration::from_millis(self.options.debounce_ms.max(10));
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Some(Ok(event)) => {
                        for change in ChangeEvent::from_notify(event) {
                            batcher.add(change);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "Watch error"),
                    None => {
                        error!("Watcher channel disconnected");
                        break;
                    }
                },
                _ = tokio::time::sleep(tick) => {}
            }

            if batcher.ready() {
                let batch = batcher.take_batch();
                info!(changes = batch.len(), "Content changed, rebuilding");
                self.pass().await;
            }
        }

        self.driver.shutdown().await;
        info!("Watch mode stopped");
        Ok(())
    }

    async fn pass(&self) -> Option<BuildReport> {
        match self.driver.run_pass().await {
            Ok(report) => {
                if !report.pages_to_render.is_empty() {
                    info!(pages = report.pages_to_render.len(), "Pages need rendering");
                }
                Some(report)
            }
            Err(e) => {
                error!(error = %e, "Build pass failed");
                None
            }
        }
    }
}
