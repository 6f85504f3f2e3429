//! Channel emitters
//!
//! A [`ChannelEmitter`] owns the ordered records of one channel recording and
//! a cursor to the next record to send. Once attached to a [`VirtualClock`]
//! it runs a pacing thread that sleeps until the record under the cursor is
//! due on the clock, publishes it, and moves on. Sleeps are interrupted by
//! control messages (enable/disable, shutdown) and by every clock event, so a
//! rate change or jump always leads to a fresh computation instead of a stale
//! wake-up.
//!
//! Sequence numbers are checked as records leave: a forward gap counts as a
//! drop, a repeat or step backwards counts as a duplicate. Neither interrupts
//! playback.

use crate::clock::{ClockEvent, VirtualClock};
use crate::communication::ChannelPublisher;
use crate::error::{PlaybackError, PlaybackResult};
use crate::recording::{self, Record};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Observability signals from an emitter
#[derive(Debug, Clone, PartialEq)]
pub enum EmitterEvent {
    /// Fraction of the recording file parsed so far (0.0 to 1.0)
    LoadProgress { channel: String, fraction: f64 },
    /// The network layer reported a new subscriber count
    SubscriberCountChanged { channel: String, count: usize },
    /// The cursor reached the end of the records
    Finished { channel: String },
}

/// Outcome of one pacing step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pace {
    /// The record under the cursor was due and has been sent
    Emitted,
    /// The next record is due after this much wall time
    Wait(Duration),
    /// Channel is disabled or invalid
    Idle,
    /// No records left
    Finished,
}

/// Snapshot of emitter statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitterStats {
    /// Records passed the cursor
    pub emitted: u64,
    /// Records actually handed to the publisher
    pub published: u64,
    pub drops: u64,
    pub duplicates: u64,
    pub cursor: usize,
    pub subscribers: usize,
}

/// How a sequence number relates to the one sent before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStep {
    InOrder,
    /// This many sequence numbers were skipped
    Dropped(u64),
    /// Repeated or stepped backwards
    Duplicate,
}

impl SequenceStep {
    pub fn classify(previous: Option<u64>, sequence: u64) -> Self {
        let Some(previous) = previous else {
            return SequenceStep::InOrder;
        };
        let expected = previous.saturating_add(1);
        if sequence > expected {
            SequenceStep::Dropped(sequence - expected)
        } else if sequence <= previous {
            SequenceStep::Duplicate
        } else {
            SequenceStep::InOrder
        }
    }
}

enum Control {
    /// Re-evaluate state (emitting flag changed)
    Recheck,
    Shutdown,
}

#[derive(Debug, Default)]
struct PacerState {
    cursor: usize,
    last_sequence: Option<u64>,
    /// Clock jump count the cursor is positioned for
    jumps_seen: Option<u64>,
}

#[derive(Debug, Default)]
struct EmitterShared {
    pacer: Mutex<PacerState>,
    enabled: AtomicBool,
    subscriber_count: AtomicUsize,
    emitted: AtomicU64,
    published: AtomicU64,
    drop_count: AtomicU64,
    duplicate_count: AtomicU64,
}

/// The part of an emitter shared with its pacing thread
#[derive(Clone)]
struct Pacer {
    name: Arc<str>,
    records: Arc<Vec<Record>>,
    shared: Arc<EmitterShared>,
}

impl Pacer {
    fn pump(&self, clock: &VirtualClock, publisher: &dyn ChannelPublisher) -> Pace {
        let mut pacer = self.shared.pacer.lock();
        self.follow_jumps(&mut pacer, clock);

        if !self.shared.enabled.load(Ordering::Acquire) {
            return Pace::Idle;
        }

        let Some(record) = self.records.get(pacer.cursor) else {
            return Pace::Finished;
        };

        let (wait, jumps) = clock.wall_wait_checked(record.timestamp);
        if Some(jumps) != pacer.jumps_seen {
            // The clock jumped after the cursor was checked
            return Pace::Wait(Duration::ZERO);
        }
        if let Some(wait) = wait {
            return Pace::Wait(wait);
        }

        // Records are only written when somebody listens, but the cursor and
        // statistics advance either way.
        if self.shared.subscriber_count.load(Ordering::Relaxed) > 0 {
            match publisher.publish(&self.name, record) {
                Ok(()) => {
                    self.shared.published.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => log::warn!("{}: publish of seq {} failed: {}", self.name, record.sequence, e),
            }
        }

        self.track_sequence(&mut pacer.last_sequence, record.sequence);
        pacer.cursor += 1;
        self.shared.emitted.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "{}: emitted seq {} t={:.6}",
            self.name,
            record.sequence,
            record.timestamp
        );
        Pace::Emitted
    }

    fn track_sequence(&self, last: &mut Option<u64>, sequence: u64) {
        match SequenceStep::classify(*last, sequence) {
            SequenceStep::InOrder => {}
            SequenceStep::Dropped(missing) => {
                self.shared.drop_count.fetch_add(missing, Ordering::Relaxed);
                log::debug!(
                    "{}: {} dropped before seq {}",
                    self.name,
                    missing,
                    sequence
                );
            }
            SequenceStep::Duplicate => {
                self.shared.duplicate_count.fetch_add(1, Ordering::Relaxed);
                log::debug!("{}: duplicate/out-of-order seq {}", self.name, sequence);
            }
        }
        *last = Some(sequence);
    }

    /// Reposition when the clock jumped since the last check. The first
    /// check only records the jump count.
    fn follow_jumps(&self, pacer: &mut PacerState, clock: &VirtualClock) {
        let (jumps, target) = clock.last_jump();
        match pacer.jumps_seen {
            Some(seen) if seen == jumps => {}
            Some(_) => {
                pacer.jumps_seen = Some(jumps);
                self.reposition_locked(pacer, target);
            }
            None => pacer.jumps_seen = Some(jumps),
        }
    }

    fn sync(&self, clock: &VirtualClock) {
        let mut pacer = self.shared.pacer.lock();
        self.follow_jumps(&mut pacer, clock);
    }

    fn reposition(&self, when: f64) {
        let mut pacer = self.shared.pacer.lock();
        self.reposition_locked(&mut pacer, when);
    }

    /// Point the cursor at the last record at or before `when` (or the first
    /// record when all are later)
    fn reposition_locked(&self, pacer: &mut PacerState, when: f64) {
        let index = self
            .records
            .partition_point(|r| r.timestamp <= when)
            .saturating_sub(1);
        pacer.cursor = index;
        pacer.last_sequence = None;
        log::debug!("{}: reposition to {:.6} -> record {}", self.name, when, index);
    }

    fn refresh_subscribers(&self, count: usize, events: Option<&Sender<EmitterEvent>>) {
        let previous = self.shared.subscriber_count.swap(count, Ordering::Relaxed);
        if previous != count {
            log::info!("{}: subscribers {} -> {}", self.name, previous, count);
            if let Some(tx) = events {
                let _ = tx.send(EmitterEvent::SubscriberCountChanged {
                    channel: self.name.to_string(),
                    count,
                });
            }
        }
    }
}

struct Driver {
    control: Sender<Control>,
    handle: JoinHandle<()>,
}

/// Replays one recorded channel
pub struct ChannelEmitter {
    pacer: Pacer,
    path: Option<PathBuf>,
    message_type: String,
    valid: bool,
    failure: Option<String>,
    load_fraction: f64,
    events: Option<Sender<EmitterEvent>>,
    driver: Option<Driver>,
}

impl std::fmt::Debug for ChannelEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelEmitter")
            .field("name", &self.name())
            .field("valid", &self.valid)
            .field("records", &self.len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ChannelEmitter {
    /// Create an empty, not yet loaded emitter
    pub fn new(name: &str) -> Self {
        Self {
            pacer: Pacer {
                name: Arc::from(name),
                records: Arc::new(Vec::new()),
                shared: Arc::new(EmitterShared {
                    enabled: AtomicBool::new(true),
                    ..Default::default()
                }),
            },
            path: None,
            message_type: String::new(),
            valid: false,
            failure: None,
            load_fraction: 0.0,
            events: None,
            driver: None,
        }
    }

    /// Create an emitter directly from records (sorted here by timestamp)
    pub fn from_records(name: &str, mut records: Vec<Record>) -> Self {
        records.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        let mut emitter = Self::new(name);
        emitter.valid = !records.is_empty();
        if !emitter.valid {
            emitter.failure = Some("no records".to_string());
        }
        emitter.load_fraction = 1.0;
        emitter.pacer.records = Arc::new(records);
        emitter
    }

    /// Route observability events to `events`
    pub fn with_events(mut self, events: Sender<EmitterEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Parse a recording file into this emitter.
    ///
    /// On failure the emitter stays invalid and remembers the reason.
    pub fn load(&mut self, path: &Path, cancelled: &AtomicBool) -> PlaybackResult<()> {
        log::info!("{}: loading {}", self.name(), path.display());
        self.path = Some(path.to_path_buf());

        let name = self.name().to_string();
        let events = self.events.clone();
        let mut fraction = 0.0;
        let parsed = recording::read_recording(
            path,
            |f| {
                fraction = f;
                if let Some(tx) = &events {
                    let _ = tx.send(EmitterEvent::LoadProgress {
                        channel: name.clone(),
                        fraction: f,
                    });
                }
            },
            cancelled,
        );
        self.load_fraction = fraction;

        match parsed {
            Ok(parsed) => {
                log::info!(
                    "{}: {} records of {} spanning {:.3}s",
                    self.name(),
                    parsed.records.len(),
                    parsed.header.message_type,
                    parsed.records[parsed.records.len() - 1].timestamp
                        - parsed.records[0].timestamp
                );
                self.message_type = parsed.header.message_type;
                self.pacer.records = Arc::new(parsed.records);
                self.pacer.shared.pacer.lock().cursor = 0;
                self.valid = true;
                self.failure = None;
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                log::error!("{}: load failed: {}", self.name(), reason);
                self.valid = false;
                self.failure = Some(reason.clone());
                Err(PlaybackError::load_failure(self.name(), reason))
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.pacer.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Why loading failed, when it did
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Timestamp of the first record (0.0 when invalid)
    pub fn start_time(&self) -> f64 {
        self.pacer.records.first().map(|r| r.timestamp).unwrap_or(0.0)
    }

    /// Timestamp of the last record (0.0 when invalid)
    pub fn end_time(&self) -> f64 {
        self.pacer.records.last().map(|r| r.timestamp).unwrap_or(0.0)
    }

    pub fn duration(&self) -> f64 {
        self.end_time() - self.start_time()
    }

    pub fn len(&self) -> usize {
        self.pacer.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pacer.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.pacer.records
    }

    /// Percentage of the recording file parsed
    pub fn load_percentage(&self) -> f64 {
        self.load_fraction * 100.0
    }

    pub fn is_emitting(&self) -> bool {
        self.pacer.shared.enabled.load(Ordering::Acquire)
    }

    /// Enable or disable emission. The cursor is kept, so re-enabling resumes
    /// with the record that was next when the channel was disabled.
    pub fn set_emitting(&self, emitting: bool) {
        let previous = self.pacer.shared.enabled.swap(emitting, Ordering::AcqRel);
        if previous == emitting {
            return;
        }
        log::info!("{}: emitting {}", self.name(), emitting);
        if let Some(driver) = &self.driver {
            let _ = driver.control.send(Control::Recheck);
        }
    }

    /// Index of the next record to send
    pub fn cursor(&self) -> usize {
        self.pacer.shared.pacer.lock().cursor
    }

    pub fn subscriber_count(&self) -> usize {
        self.pacer.shared.subscriber_count.load(Ordering::Relaxed)
    }

    /// Record a subscriber count reported by the network layer
    pub fn update_subscriber_count(&self, count: usize) {
        self.pacer.refresh_subscribers(count, self.events.as_ref());
    }

    pub fn drop_count(&self) -> u64 {
        self.pacer.shared.drop_count.load(Ordering::Relaxed)
    }

    pub fn duplicate_count(&self) -> u64 {
        self.pacer.shared.duplicate_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> EmitterStats {
        let shared = &self.pacer.shared;
        EmitterStats {
            emitted: shared.emitted.load(Ordering::Relaxed),
            published: shared.published.load(Ordering::Relaxed),
            drops: shared.drop_count.load(Ordering::Relaxed),
            duplicates: shared.duplicate_count.load(Ordering::Relaxed),
            cursor: self.cursor(),
            subscribers: self.subscriber_count(),
        }
    }

    /// Move the cursor to the record current at recording time `when`
    pub fn reposition(&self, when: f64) {
        self.pacer.reposition(when);
    }

    /// Run one pacing step against `clock` on the calling thread
    pub fn pump(&self, clock: &VirtualClock, publisher: &dyn ChannelPublisher) -> Pace {
        if !self.valid {
            return Pace::Idle;
        }
        self.pacer
            .refresh_subscribers(publisher.subscriber_count(self.name()), self.events.as_ref());
        self.pacer.pump(clock, publisher)
    }

    /// Send every record already due on `clock`, returning how many were sent
    pub fn emit_due(&self, clock: &VirtualClock, publisher: &dyn ChannelPublisher) -> usize {
        let mut count = 0;
        while self.pump(clock, publisher) == Pace::Emitted {
            count += 1;
        }
        count
    }

    pub fn is_attached(&self) -> bool {
        self.driver.is_some()
    }

    /// Start the pacing thread. It emits while `clock` runs and the channel
    /// is enabled, and follows clock jumps until [`detach`](Self::detach).
    pub fn attach(
        &mut self,
        clock: VirtualClock,
        publisher: Arc<dyn ChannelPublisher>,
        max_sleep: Duration,
    ) -> PlaybackResult<()> {
        if !self.valid {
            return Err(PlaybackError::invalid_input(format!(
                "cannot attach invalid channel '{}'",
                self.name()
            )));
        }
        self.detach();

        // Jumps made before attaching are not followed
        self.pacer.shared.pacer.lock().jumps_seen = Some(clock.last_jump().0);

        let (control_tx, control_rx) = channel::unbounded();
        let clock_events = clock.subscribe();
        let pacer = self.pacer.clone();
        let events = self.events.clone();

        let handle = thread::Builder::new()
            .name(format!("emit-{}", self.name()))
            .spawn(move || {
                drive(
                    pacer,
                    clock,
                    publisher,
                    control_rx,
                    clock_events,
                    max_sleep,
                    events,
                )
            })?;

        self.driver = Some(Driver {
            control: control_tx,
            handle,
        });
        Ok(())
    }

    /// Stop the pacing thread, keeping cursor and statistics
    pub fn detach(&mut self) {
        if let Some(driver) = self.driver.take() {
            let _ = driver.control.send(Control::Shutdown);
            if driver.handle.join().is_err() {
                log::error!("{}: pacing thread panicked", self.name());
            }
        }
    }
}

impl Drop for ChannelEmitter {
    fn drop(&mut self) {
        self.detach();
    }
}

enum Wake {
    Control(Option<Control>),
    Clock(Option<ClockEvent>),
    Timeout,
}

fn drive(
    pacer: Pacer,
    clock: VirtualClock,
    publisher: Arc<dyn ChannelPublisher>,
    control: Receiver<Control>,
    clock_events: Receiver<ClockEvent>,
    max_sleep: Duration,
    events: Option<Sender<EmitterEvent>>,
) {
    log::debug!("{}: pacing thread started", pacer.name);
    let mut finished_reported = false;

    loop {
        pacer.refresh_subscribers(publisher.subscriber_count(&pacer.name), events.as_ref());
        pacer.sync(&clock);

        let wait = if clock.is_running() {
            match pacer.pump(&clock, publisher.as_ref()) {
                Pace::Emitted => continue,
                Pace::Wait(wait) => Some(wait.min(max_sleep)),
                Pace::Finished => {
                    if !finished_reported {
                        finished_reported = true;
                        log::info!("{}: all records emitted", pacer.name);
                        if let Some(tx) = &events {
                            let _ = tx.send(EmitterEvent::Finished {
                                channel: pacer.name.to_string(),
                            });
                        }
                    }
                    None
                }
                Pace::Idle => None,
            }
        } else {
            None
        };

        let woke = match wait {
            Some(timeout) => select! {
                recv(control) -> msg => Wake::Control(msg.ok()),
                recv(clock_events) -> event => Wake::Clock(event.ok()),
                default(timeout) => Wake::Timeout,
            },
            None => select! {
                recv(control) -> msg => Wake::Control(msg.ok()),
                recv(clock_events) -> event => Wake::Clock(event.ok()),
            },
        };

        match woke {
            Wake::Control(None) | Wake::Control(Some(Control::Shutdown)) => break,
            Wake::Control(Some(Control::Recheck)) | Wake::Timeout => {}
            Wake::Clock(Some(ClockEvent::StartChanged(when))) => {
                log::trace!("{}: clock moved to {:.6}", pacer.name, when);
                finished_reported = false;
            }
            Wake::Clock(Some(_)) => {}
            Wake::Clock(None) => break,
        }
    }

    log::debug!("{}: pacing thread exiting", pacer.name);
}
