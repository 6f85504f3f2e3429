//! Concurrent loading of a recording directory
//!
//! [`LoadCoordinator::begin_load`] lists the channel recordings of a
//! directory and hands each one to a [`LoadWorker`] on a rayon pool built for
//! that load. Workers share nothing while parsing; each posts exactly one
//! result to the coordinator's results channel. Results are applied one at a
//! time, on the thread calling [`poll`](LoadCoordinator::poll) or
//! [`wait`](LoadCoordinator::wait), so aggregate state never needs a lock.
//!
//! A load is identified by a generation number. Starting a new load discards
//! the previous channels, flags the old workers as cancelled, and ignores any
//! result still arriving for an older generation.

use crate::clock::VirtualClock;
use crate::communication::ChannelPublisher;
use crate::config::PlaybackConfig;
use crate::emitter::{ChannelEmitter, EmitterEvent};
use crate::error::{PlaybackError, PlaybackResult};
use crate::recording;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a load finished
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LoadOutcome {
    /// Every recording loaded
    Complete,
    /// Some recordings failed; the named channels are missing
    Partial(Vec<String>),
    /// No recording could be loaded
    TotalFailure,
    /// The directory holds no recordings
    NoFiles,
}

/// Aggregate result of one load, available once every worker finished
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub generation: u64,
    pub directory: PathBuf,
    pub outcome: LoadOutcome,
    /// Loaded channels in listing order
    pub loaded: Vec<String>,
    /// Failed channels in listing order
    pub failures: Vec<String>,
    /// Failure reason per failed channel
    pub failure_reasons: BTreeMap<String, String>,
    pub earliest_start: Option<f64>,
    pub latest_end: Option<f64>,
}

impl LoadReport {
    /// At least one channel is available for playback
    pub fn is_usable(&self) -> bool {
        !self.loaded.is_empty()
    }

    /// Message describing the failures of this load, if any
    pub fn message(&self) -> Option<String> {
        match &self.outcome {
            LoadOutcome::Complete => None,
            LoadOutcome::NoFiles => Some(format!(
                "Failed to find any recordings to load in {}",
                self.directory.display()
            )),
            LoadOutcome::TotalFailure => {
                Some("Failed to load any recordings without errors".to_string())
            }
            LoadOutcome::Partial(names) if names.len() == 1 => {
                Some(format!("Failed to load the recording '{}'", names[0]))
            }
            LoadOutcome::Partial(names) => Some(format!(
                "Failed to load the following recordings: {}",
                names.join(", ")
            )),
        }
    }
}

/// Load lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
    Started { generation: u64, files: usize },
    ChannelLoaded { name: String, start: f64, end: f64 },
    ChannelFailed { name: String, reason: String },
    Complete(LoadReport),
}

/// Result posted by a worker
struct WorkerResult {
    generation: u64,
    index: usize,
    emitter: ChannelEmitter,
}

/// Parses one recording file into a [`ChannelEmitter`]
pub struct LoadWorker {
    generation: u64,
    index: usize,
    path: PathBuf,
    cancelled: Arc<AtomicBool>,
    events: Sender<EmitterEvent>,
    results: Sender<WorkerResult>,
}

impl LoadWorker {
    /// Parse the file and post the result. Invalid files still post an
    /// emitter, marked invalid with the failure reason.
    pub fn run(self) {
        let name = recording::channel_name(&self.path);
        let mut emitter = ChannelEmitter::new(&name).with_events(self.events.clone());

        if self.cancelled.load(Ordering::Relaxed) {
            log::debug!("{}: skipped, load cancelled", name);
        } else if let Err(e) = emitter.load(&self.path, &self.cancelled) {
            log::debug!("{}: worker finished with {}", name, e);
        }

        let result = WorkerResult {
            generation: self.generation,
            index: self.index,
            emitter,
        };
        if self.results.send(result).is_err() {
            log::debug!("{}: coordinator gone, result dropped", name);
        }
    }
}

/// Owns the channels of the current recording directory
pub struct LoadCoordinator {
    clock: VirtualClock,
    publisher: Arc<dyn ChannelPublisher>,
    max_sleep: Duration,
    max_concurrent_loads: Option<usize>,

    generation: u64,
    directory: PathBuf,
    slots: Vec<Option<ChannelEmitter>>,
    pending: usize,
    failures: Vec<(usize, String, String)>,
    earliest_start: Option<f64>,
    latest_end: Option<f64>,
    report: Option<LoadReport>,

    cancelled: Arc<AtomicBool>,
    pool: Option<rayon::ThreadPool>,
    results_tx: Sender<WorkerResult>,
    results_rx: Receiver<WorkerResult>,
    emitter_tx: Sender<EmitterEvent>,
    emitter_rx: Receiver<EmitterEvent>,
    subscribers: Mutex<Vec<Sender<LoadEvent>>>,
}

impl LoadCoordinator {
    /// Create a coordinator whose channels pace against `clock` and publish
    /// through `publisher`
    pub fn new(
        clock: VirtualClock,
        publisher: Arc<dyn ChannelPublisher>,
        config: &PlaybackConfig,
    ) -> Self {
        let (results_tx, results_rx) = channel::unbounded();
        let (emitter_tx, emitter_rx) = channel::unbounded();

        Self {
            clock,
            publisher,
            max_sleep: config.max_sleep(),
            max_concurrent_loads: config.max_concurrent_loads,
            generation: 0,
            directory: PathBuf::new(),
            slots: Vec::new(),
            pending: 0,
            failures: Vec::new(),
            earliest_start: None,
            latest_end: None,
            report: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            pool: None,
            results_tx,
            results_rx,
            emitter_tx,
            emitter_rx,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register for load notifications
    pub fn subscribe(&self) -> Receiver<LoadEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Emitter notifications (load progress, subscriber counts, end of data)
    /// of every channel this coordinator creates
    pub fn emitter_events(&self) -> Receiver<EmitterEvent> {
        self.emitter_rx.clone()
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_loading(&self) -> bool {
        self.pending > 0
    }

    /// Report of the last completed load
    pub fn report(&self) -> Option<&LoadReport> {
        self.report.as_ref()
    }

    /// Earliest first timestamp over the loaded channels
    pub fn earliest_start(&self) -> Option<f64> {
        self.earliest_start
    }

    /// Latest last timestamp over the loaded channels
    pub fn latest_end(&self) -> Option<f64> {
        self.latest_end
    }

    /// Names of channels that failed so far, in listing order
    pub fn failures(&self) -> Vec<String> {
        self.failures.iter().map(|(_, name, _)| name.clone()).collect()
    }

    /// Loaded channels in listing order
    pub fn channels(&self) -> impl Iterator<Item = &ChannelEmitter> {
        self.slots.iter().flatten()
    }

    pub fn channel_count(&self) -> usize {
        self.channels().count()
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelEmitter> {
        self.channels().find(|c| c.name() == name)
    }

    /// Drop every channel, stopping their pacing threads, and cancel any
    /// load in flight
    pub fn clear(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.pool = None;

        let count = self.channel_count();
        self.slots.clear();
        if count > 0 {
            log::info!("discarded {} channels", count);
        }

        self.pending = 0;
        self.failures.clear();
        self.earliest_start = None;
        self.latest_end = None;
        self.report = None;
    }

    /// Start loading every recording in `dir`, replacing the current
    /// channels. Returns the generation of the new load.
    ///
    /// A directory without recordings completes immediately with
    /// [`LoadOutcome::NoFiles`].
    pub fn begin_load(&mut self, dir: &Path) -> PlaybackResult<u64> {
        self.clear();
        self.generation += 1;
        self.directory = dir.to_path_buf();
        self.cancelled = Arc::new(AtomicBool::new(false));

        let files = recording::list_recordings(dir)?;
        log::info!(
            "load {} (generation {}): {} recordings",
            dir.display(),
            self.generation,
            files.len()
        );
        self.broadcast(LoadEvent::Started {
            generation: self.generation,
            files: files.len(),
        });

        if files.is_empty() {
            self.finish();
            return Ok(self.generation);
        }

        let threads = match self.max_concurrent_loads {
            Some(bound) => files.len().min(bound.max(1)),
            None => files.len(),
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("load-{}", i))
            .build()
            .map_err(|e| PlaybackError::Internal(format!("load pool: {}", e)))?;

        self.slots = files.iter().map(|_| None).collect();
        self.pending = files.len();

        for (index, path) in files.into_iter().enumerate() {
            let worker = LoadWorker {
                generation: self.generation,
                index,
                path,
                cancelled: self.cancelled.clone(),
                events: self.emitter_tx.clone(),
                results: self.results_tx.clone(),
            };
            pool.spawn(move || worker.run());
        }
        self.pool = Some(pool);

        Ok(self.generation)
    }

    /// Apply every result that has already arrived. Returns the report when
    /// this call completed the load.
    pub fn poll(&mut self) -> Option<LoadReport> {
        while self.pending > 0 {
            let Ok(result) = self.results_rx.try_recv() else {
                break;
            };
            if let Some(report) = self.apply(result) {
                return Some(report);
            }
        }
        None
    }

    /// Block until the current load completes and return its report
    pub fn wait(&mut self) -> PlaybackResult<LoadReport> {
        while self.pending > 0 {
            let result = self
                .results_rx
                .recv()
                .map_err(|_| PlaybackError::Internal("load results channel closed".to_string()))?;
            if let Some(report) = self.apply(result) {
                return Ok(report);
            }
        }

        self.report
            .clone()
            .ok_or_else(|| PlaybackError::invalid_input("no load has been started"))
    }

    fn apply(&mut self, result: WorkerResult) -> Option<LoadReport> {
        if result.generation != self.generation {
            log::debug!(
                "dropping {} from stale generation {}",
                result.emitter.name(),
                result.generation
            );
            return None;
        }

        self.pending -= 1;
        let mut emitter = result.emitter;
        let name = emitter.name().to_string();

        let attached = if emitter.is_valid() {
            emitter
                .attach(self.clock.clone(), self.publisher.clone(), self.max_sleep)
                .map_err(|e| e.to_string())
        } else {
            Err(emitter
                .failure_reason()
                .unwrap_or("unknown failure")
                .to_string())
        };

        match attached {
            Ok(()) => {
                let (start, end) = (emitter.start_time(), emitter.end_time());
                self.earliest_start = Some(self.earliest_start.map_or(start, |s| s.min(start)));
                self.latest_end = Some(self.latest_end.map_or(end, |e| e.max(end)));
                log::info!(
                    "{}: loaded [{:.3}, {:.3}] ({} pending)",
                    name,
                    start,
                    end,
                    self.pending
                );
                self.slots[result.index] = Some(emitter);
                self.broadcast(LoadEvent::ChannelLoaded { name, start, end });
            }
            Err(reason) => {
                log::warn!("{}: failed: {} ({} pending)", name, reason, self.pending);
                let at = self
                    .failures
                    .partition_point(|(index, _, _)| *index < result.index);
                self.failures
                    .insert(at, (result.index, name.clone(), reason.clone()));
                self.broadcast(LoadEvent::ChannelFailed { name, reason });
            }
        }

        if self.pending == 0 {
            Some(self.finish())
        } else {
            None
        }
    }

    fn finish(&mut self) -> LoadReport {
        self.pool = None;

        let loaded: Vec<String> = self.channels().map(|c| c.name().to_string()).collect();
        let failures = self.failures();
        let outcome = if loaded.is_empty() && failures.is_empty() {
            LoadOutcome::NoFiles
        } else if loaded.is_empty() {
            LoadOutcome::TotalFailure
        } else if failures.is_empty() {
            LoadOutcome::Complete
        } else {
            LoadOutcome::Partial(failures.clone())
        };

        let report = LoadReport {
            generation: self.generation,
            directory: self.directory.clone(),
            outcome,
            loaded,
            failures,
            failure_reasons: self
                .failures
                .iter()
                .map(|(_, name, reason)| (name.clone(), reason.clone()))
                .collect(),
            earliest_start: self.earliest_start,
            latest_end: self.latest_end,
        };

        match report.message() {
            Some(message) => log::warn!("{}", message),
            None => log::info!("loaded {} channels", report.loaded.len()),
        }

        self.report = Some(report.clone());
        self.broadcast(LoadEvent::Complete(report.clone()));
        report
    }

    fn broadcast(&self, event: LoadEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Drop for LoadCoordinator {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}
