//! Virtual playback clock
//!
//! Two time frames are in use during playback. Recording time is the UTC
//! time embedded in the recorded data, expressed here as floating-point
//! seconds. Wall time is the real time that elapses while playback runs.
//! [`VirtualClock`] maps one onto the other under a rate multiplier:
//!
//! ```text
//! current = virtual_anchor + (now - wall_anchor) * rate
//! ```
//!
//! Every transition (start, stop, rate change, jump) re-anchors the pair under
//! a single lock, so readers never observe a half-updated anchor and a rate
//! change never produces a visible jump in recording time.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use playback_core::clock::VirtualClock;
//! use std::time::Duration;
//!
//! let clock = VirtualClock::new(Duration::from_millis(100), 1.0);
//! clock.set_range(1000.0, 2000.0);
//! clock.set_rate(2.0).unwrap();
//! clock.start();
//! let wait = clock.wall_duration_until(1010.0); // ~5 seconds of wall time
//! ```

use crate::error::{PlaybackError, PlaybackResult};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Notification emitted by the clock, delivered to subscribers in order
#[derive(Debug, Clone, PartialEq)]
pub enum ClockEvent {
    /// Clock started running
    Started,
    /// Clock stopped
    Stopped,
    /// Periodic update with the current recording time and the time elapsed
    /// since the start of the range
    Tick { now: f64, elapsed: f64 },
    /// Playback position was explicitly moved
    StartChanged(f64),
    /// Playback rate changed
    RateChanged(f64),
}

#[derive(Debug)]
struct ClockState {
    rate: f64,
    running: bool,
    wall_anchor: Instant,
    virtual_anchor: f64,
    range_min: f64,
    range_max: f64,
    /// Stop signal for the active ticker thread (dropping it ends the thread)
    ticker: Option<Sender<()>>,
    ticker_generation: u64,
    /// Count of explicit position changes, and where the latest one landed
    jumps: u64,
    jump_target: f64,
}

impl ClockState {
    fn current_time(&self) -> f64 {
        if !self.running {
            return self.virtual_anchor;
        }
        self.virtual_anchor + self.wall_anchor.elapsed().as_secs_f64() * self.rate
    }
}

struct ClockInner {
    state: Mutex<ClockState>,
    subscribers: Mutex<Vec<Sender<ClockEvent>>>,
    tick_period: Duration,
}

impl ClockInner {
    /// Deliver an event to every live subscriber. Callers hold the state lock
    /// so events leave in the same order as the transitions that caused them.
    fn emit(&self, event: ClockEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn tick(&self, generation: u64) {
        let state = self.state.lock();
        if !state.running || state.ticker_generation != generation {
            return;
        }
        let now = state.current_time();
        self.emit(ClockEvent::Tick {
            now,
            elapsed: now - state.range_min,
        });
    }
}

/// Rate-scaled mapping from recording time to wall time.
///
/// Cloning yields another handle onto the same clock.
#[derive(Clone)]
pub struct VirtualClock {
    inner: Arc<ClockInner>,
}

impl std::fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("VirtualClock")
            .field("rate", &state.rate)
            .field("running", &state.running)
            .field("virtual_anchor", &state.virtual_anchor)
            .field("range", &(state.range_min, state.range_max))
            .finish_non_exhaustive()
    }
}

impl VirtualClock {
    /// Create a stopped clock at recording time zero.
    ///
    /// A non-positive `rate` falls back to real time.
    pub fn new(tick_period: Duration, rate: f64) -> Self {
        let rate = if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            log::error!("invalid initial rate {}, using 1.0", rate);
            1.0
        };

        Self {
            inner: Arc::new(ClockInner {
                state: Mutex::new(ClockState {
                    rate,
                    running: false,
                    wall_anchor: Instant::now(),
                    virtual_anchor: 0.0,
                    range_min: 0.0,
                    range_max: 0.0,
                    ticker: None,
                    ticker_generation: 0,
                    jumps: 0,
                    jump_target: 0.0,
                }),
                subscribers: Mutex::new(Vec::new()),
                tick_period,
            }),
        }
    }

    /// Register for clock notifications. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<ClockEvent> {
        let (tx, rx) = channel::unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Start (or resume) the clock from its current recording time
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        self.start_locked(&mut state);
    }

    /// Stop the clock, freezing the current recording time
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        self.stop_locked(&mut state);
    }

    fn start_locked(&self, state: &mut ClockState) {
        if state.running {
            return;
        }
        log::info!("clock start at {:.6}", state.virtual_anchor);

        state.wall_anchor = Instant::now();
        state.running = true;
        state.ticker_generation += 1;
        state.ticker = self.spawn_ticker(state.ticker_generation);

        self.inner.emit(ClockEvent::Started);
        let now = state.current_time();
        self.inner.emit(ClockEvent::Tick {
            now,
            elapsed: now - state.range_min,
        });
    }

    fn stop_locked(&self, state: &mut ClockState) {
        if !state.running {
            return;
        }
        state.virtual_anchor = state.current_time();
        state.running = false;
        state.ticker = None;
        log::info!("clock stop at {:.6}", state.virtual_anchor);
        self.inner.emit(ClockEvent::Stopped);
    }

    fn spawn_ticker(&self, generation: u64) -> Option<Sender<()>> {
        let (tx, rx) = channel::bounded::<()>(1);
        let weak: Weak<ClockInner> = Arc::downgrade(&self.inner);
        let period = self.inner.tick_period;

        let spawned = thread::Builder::new()
            .name("playback-clock".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.tick(generation);
            });

        match spawned {
            Ok(_) => Some(tx),
            Err(e) => {
                log::error!("failed to spawn clock ticker: {}", e);
                None
            }
        }
    }

    /// Change the playback rate.
    ///
    /// Time elapsed so far is frozen at the old rate before the new one takes
    /// effect. Works whether or not the clock is running.
    pub fn set_rate(&self, rate: f64) -> PlaybackResult<()> {
        if !(rate.is_finite() && rate > 0.0) {
            log::error!("invalid rate: {}", rate);
            return Err(PlaybackError::InvalidRate(rate));
        }

        let mut state = self.inner.state.lock();
        state.virtual_anchor = state.current_time();
        state.wall_anchor = Instant::now();
        state.rate = rate;
        log::info!("rate: {} at {:.6}", rate, state.virtual_anchor);
        self.inner.emit(ClockEvent::RateChanged(rate));
        Ok(())
    }

    /// Set the recording-time bounds and move to the start of them
    pub fn set_range(&self, min: f64, max: f64) {
        let (min, max) = if min <= max {
            (min, max)
        } else {
            log::warn!("reversed clock range [{}, {}]", min, max);
            (max, min)
        };

        let mut state = self.inner.state.lock();
        log::info!("range: [{:.6}, {:.6}]", min, max);
        state.range_min = min;
        state.range_max = max;
        self.set_start_locked(&mut state, min);
    }

    /// Move playback to `when`, clamped into the current range
    pub fn set_start(&self, when: f64) {
        let mut state = self.inner.state.lock();
        self.set_start_locked(&mut state, when);
    }

    fn set_start_locked(&self, state: &mut ClockState, when: f64) {
        if when.is_nan() {
            log::error!("ignoring NaN playback start");
            return;
        }

        let was_running = state.running;
        if was_running {
            self.stop_locked(state);
        }

        state.virtual_anchor = when.max(state.range_min).min(state.range_max);
        state.wall_anchor = Instant::now();
        state.jumps += 1;
        state.jump_target = state.virtual_anchor;
        log::info!("start: {:.6} (requested {:.6})", state.virtual_anchor, when);
        self.inner
            .emit(ClockEvent::StartChanged(state.virtual_anchor));

        if was_running {
            self.start_locked(state);
        }
    }

    /// Current recording time
    pub fn current_time(&self) -> f64 {
        self.inner.state.lock().current_time()
    }

    /// Wall-clock seconds until `when` occurs on the clock, accounting for the
    /// rate. Zero or negative means the moment is already due.
    pub fn wall_duration_until(&self, when: f64) -> f64 {
        let state = self.inner.state.lock();
        (when - state.current_time()) / state.rate
    }

    /// Like [`wall_duration_until`](Self::wall_duration_until), but `None` once due
    pub fn wall_wait_until(&self, when: f64) -> Option<Duration> {
        wall_wait(self.wall_duration_until(when))
    }

    /// Number of position changes so far and the (clamped) target of the
    /// latest one
    pub fn last_jump(&self) -> (u64, f64) {
        let state = self.inner.state.lock();
        (state.jumps, state.jump_target)
    }

    /// [`wall_wait_until`](Self::wall_wait_until) together with the jump
    /// count it was computed under
    pub fn wall_wait_checked(&self, when: f64) -> (Option<Duration>, u64) {
        let state = self.inner.state.lock();
        let seconds = (when - state.current_time()) / state.rate;
        (wall_wait(seconds), state.jumps)
    }

    pub fn rate(&self) -> f64 {
        self.inner.state.lock().rate
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    /// Recording-time bounds as `(min, max)`
    pub fn range(&self) -> (f64, f64) {
        let state = self.inner.state.lock();
        (state.range_min, state.range_max)
    }

    /// Recording time elapsed since the start of the range
    pub fn elapsed(&self) -> f64 {
        let state = self.inner.state.lock();
        state.current_time() - state.range_min
    }

    pub fn tick_period(&self) -> Duration {
        self.inner.tick_period
    }
}

/// Waits too long for a `Duration` (tiny rates) saturate
fn wall_wait(seconds: f64) -> Option<Duration> {
    if seconds > 0.0 {
        Some(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn clock() -> VirtualClock {
        let clock = VirtualClock::new(Duration::from_millis(100), 1.0);
        clock.set_range(100.0, 200.0);
        clock
    }

    fn drain(rx: &Receiver<ClockEvent>) -> Vec<ClockEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_stopped_clock_holds_anchor() {
        let clock = clock();
        assert_eq!(clock.current_time(), 100.0);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(clock.current_time(), 100.0);
        assert!(!clock.is_running());
    }

    #[test]
    fn test_start_resumes_instead_of_resetting() {
        let clock = clock();
        clock.set_rate(10.0).unwrap();
        clock.start();
        thread::sleep(Duration::from_millis(30));
        clock.stop();

        let paused = clock.current_time();
        assert!(paused > 100.0);

        clock.start();
        assert!(clock.current_time() >= paused);
        clock.stop();
    }

    #[test]
    fn test_rate_change_is_continuous() {
        let clock = clock();
        clock.start();
        thread::sleep(Duration::from_millis(20));

        for rate in [4.0, 0.25, 16.0, 1.0] {
            let before = clock.current_time();
            clock.set_rate(rate).unwrap();
            let after = clock.current_time();
            assert_abs_diff_eq!(before, after, epsilon = 0.01);
            thread::sleep(Duration::from_millis(5));
        }
        clock.stop();
    }

    #[test]
    fn test_rate_change_while_stopped_keeps_position() {
        let clock = clock();
        clock.set_start(150.0);
        clock.set_rate(8.0).unwrap();
        assert_eq!(clock.current_time(), 150.0);
        assert_eq!(clock.rate(), 8.0);
    }

    #[test]
    fn test_invalid_rate_rejected() {
        let clock = clock();
        clock.set_rate(2.0).unwrap();

        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                clock.set_rate(rate),
                Err(PlaybackError::InvalidRate(_))
            ));
        }
        assert_eq!(clock.rate(), 2.0);
        assert_eq!(clock.current_time(), 100.0);
    }

    #[test]
    fn test_duration_inversion_stopped() {
        let clock = clock();
        clock.set_start(120.0);
        clock.set_rate(2.0).unwrap();

        assert_abs_diff_eq!(clock.wall_duration_until(126.0), 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(clock.wall_duration_until(110.0), -5.0, epsilon = 1e-9);
        assert!(clock.wall_wait_until(119.0).is_none());
    }

    #[test]
    fn test_duration_inversion_running() {
        let clock = clock();
        clock.set_rate(4.0).unwrap();
        clock.start();

        let delta = 20.0;
        let wait = clock.wall_duration_until(clock.current_time() + delta);
        assert_abs_diff_eq!(wait, delta / 4.0, epsilon = 0.01);
        clock.stop();
    }

    #[test]
    fn test_set_start_clamps() {
        let clock = clock();

        clock.set_start(-1.0e9);
        assert_eq!(clock.current_time(), 100.0);

        clock.set_start(1.0e12);
        assert_eq!(clock.current_time(), 200.0);

        clock.set_start(f64::NEG_INFINITY);
        assert_eq!(clock.current_time(), 100.0);

        clock.set_start(150.5);
        assert_eq!(clock.current_time(), 150.5);
    }

    #[test]
    fn test_reversed_range_is_normalized() {
        let clock = VirtualClock::new(Duration::from_millis(100), 1.0);
        clock.set_range(20.0, 10.0);
        assert_eq!(clock.range(), (10.0, 20.0));
        assert_eq!(clock.current_time(), 10.0);
    }

    #[test]
    fn test_event_order() {
        let clock = clock();
        let rx = clock.subscribe();

        clock.start();
        let events = drain(&rx);
        assert_eq!(events[0], ClockEvent::Started);
        assert!(matches!(events[1], ClockEvent::Tick { .. }));

        clock.set_start(150.0);
        let events = drain(&rx);
        let kinds: Vec<_> = events
            .iter()
            .filter(|e| !matches!(e, ClockEvent::Tick { .. }))
            .cloned()
            .collect();
        assert_eq!(
            kinds,
            vec![
                ClockEvent::Stopped,
                ClockEvent::StartChanged(150.0),
                ClockEvent::Started
            ]
        );

        clock.stop();
        let events = drain(&rx);
        assert_eq!(events.last(), Some(&ClockEvent::Stopped));
    }

    #[test]
    fn test_jump_while_running_keeps_running() {
        let clock = clock();
        clock.start();
        clock.set_start(180.0);
        assert!(clock.is_running());
        assert!(clock.current_time() >= 180.0);
        clock.stop();
    }

    #[test]
    fn test_periodic_ticks() {
        let clock = VirtualClock::new(Duration::from_millis(10), 1.0);
        clock.set_range(0.0, 60.0);
        let rx = clock.subscribe();
        clock.start();

        let mut ticks = 0;
        let deadline = Instant::now() + Duration::from_secs(2);
        while ticks < 3 && Instant::now() < deadline {
            if let Ok(ClockEvent::Tick { elapsed, .. }) =
                rx.recv_timeout(Duration::from_millis(100))
            {
                assert!(elapsed >= 0.0);
                ticks += 1;
            }
        }
        clock.stop();
        assert!(ticks >= 3);
    }

    #[test]
    fn test_no_ticks_after_stop() {
        let clock = VirtualClock::new(Duration::from_millis(5), 1.0);
        clock.set_range(0.0, 60.0);
        clock.start();
        clock.stop();

        let rx = clock.subscribe();
        thread::sleep(Duration::from_millis(30));
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_jumps_are_counted() {
        let clock = clock();
        let (before, target) = clock.last_jump();
        assert_eq!(target, 100.0);

        clock.set_start(500.0);
        clock.set_start(f64::NAN);
        let (after, target) = clock.last_jump();
        assert_eq!(after, before + 1);
        assert_eq!(target, 200.0);

        let (wait, jumps) = clock.wall_wait_checked(150.0);
        assert_eq!(wait, None);
        assert_eq!(jumps, after);
    }

    #[test]
    fn test_tiny_rate_saturates_wait() {
        let clock = clock();
        clock.set_rate(1e-20).unwrap();

        assert_eq!(clock.wall_wait_until(150.0), Some(Duration::MAX));
        let (wait, _) = clock.wall_wait_checked(150.0);
        assert_eq!(wait, Some(Duration::MAX));
        assert_eq!(clock.wall_wait_until(100.0), None);
    }
}
