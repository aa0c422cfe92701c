//! Filesystem watcher that refreshes a module when its artifact changes
//!
//! The watcher observes the artifact's parent directory, so atomic
//! replacement by rename is seen as well as in-place writes. Bursts of events
//! are debounced before a single [`DynamicModule::refresh`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, select};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::module::DynamicModule;

type ReloadCallback = Box<dyn Fn(&DynamicModule) + Send + 'static>;

/// Background refresher for one [`DynamicModule`]
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use hotmod_core::{ArtifactWatcher, DynamicModule};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let module = Arc::new(DynamicModule::open("units.zip"));
/// let mut watcher = ArtifactWatcher::start_with(module, Duration::from_millis(250), |module| {
///     println!("now serving {}", module.version());
/// })?;
///
/// std::thread::sleep(Duration::from_secs(60));
/// println!("{} reloads", watcher.reloads());
/// watcher.stop();
/// # Ok(())
/// # }
/// ```
pub struct ArtifactWatcher {
    watcher: Option<RecommendedWatcher>,
    shutdown_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    reloads: Arc<AtomicU64>,
}

impl ArtifactWatcher {
    /// Start watching with the module's configured debounce
    pub fn start(module: Arc<DynamicModule>) -> Result<Self, notify::Error> {
        let debounce = module.config().watch.debounce();
        Self::start_with(module, debounce, |_| {})
    }

    /// Start watching, calling `on_reload` after every installed generation
    pub fn start_with<F>(
        module: Arc<DynamicModule>,
        debounce: Duration,
        on_reload: F,
    ) -> Result<Self, notify::Error>
    where
        F: Fn(&DynamicModule) + Send + 'static,
    {
        let artifact = module.artifact_path().to_path_buf();
        let directory = watch_directory(&artifact);
        let file_name = artifact.file_name().map(|name| name.to_os_string());

        info!("Watching {:?} for changes to {:?}", directory, artifact);

        let (event_tx, event_rx) = crossbeam_channel::unbounded::<()>();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let relevant = matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) && event
                        .paths
                        .iter()
                        .any(|path| path.file_name().map(|n| n.to_os_string()) == file_name);
                    if relevant {
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => warn!("Watch error: {}", e),
            },
            Config::default().with_poll_interval(Duration::from_millis(100)),
        )?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        let reloads = Arc::new(AtomicU64::new(0));
        let counter = reloads.clone();
        let callback: ReloadCallback = Box::new(on_reload);
        let worker = thread::Builder::new()
            .name("hotmod-watcher".to_string())
            .spawn(move || {
                run_worker(module, event_rx, shutdown_rx, debounce, counter, callback);
            })
            .map_err(notify::Error::io)?;

        Ok(Self {
            watcher: Some(watcher),
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
            reloads,
        })
    }

    /// Number of generations this watcher has installed
    pub fn reloads(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }

    /// Stop watching and wait for the worker thread
    pub fn stop(&mut self) {
        if self.shutdown_tx.is_none() {
            return;
        }
        info!("Stopping artifact watcher");

        self.watcher = None;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Artifact watcher thread panicked");
            }
        }
    }
}

impl Drop for ArtifactWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_directory(artifact: &Path) -> PathBuf {
    match artifact.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn run_worker(
    module: Arc<DynamicModule>,
    events: Receiver<()>,
    shutdown: Receiver<()>,
    debounce: Duration,
    reloads: Arc<AtomicU64>,
    on_reload: ReloadCallback,
) {
    loop {
        select! {
            recv(shutdown) -> _ => return,
            recv(events) -> event => {
                if event.is_err() {
                    return;
                }
            }
        }

        // Wait for the burst to settle
        loop {
            match events.recv_timeout(debounce) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }

        debug!("Artifact event settled, refreshing");
        if module.refresh() {
            reloads.fetch_add(1, Ordering::SeqCst);
            on_reload(&module);
        }
    }
}
