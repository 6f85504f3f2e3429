//! Playback session
//!
//! [`PlaybackSession`] is the command surface of the engine. It owns the
//! clock and the load coordinator, keeps the bookmarks of the loaded
//! directory, and enforces the playback region: when the clock passes the
//! region end playback stops, or jumps back to the region start when looping.

use crate::bookmarks::{describe, Bookmark, BookmarkSet};
use crate::clock::{ClockEvent, VirtualClock};
use crate::communication::ChannelPublisher;
use crate::config::PlaybackConfig;
use crate::emitter::EmitterStats;
use crate::error::{PlaybackError, PlaybackResult};
use crate::loader::{LoadCoordinator, LoadReport};
use crate::timespec::{midnight_of, TimeSpec};
use crossbeam::channel::Receiver;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What the region check did in response to a clock tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionAction {
    /// Playback reached the region end and stopped
    Stopped,
    /// Playback reached the region end and restarted at the region start
    Looped,
}

/// Per-channel view for status displays
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStatus {
    pub name: String,
    pub emitting: bool,
    pub start: f64,
    pub end: f64,
    pub records: usize,
    pub stats: EmitterStats,
}

/// Snapshot of the session state
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub running: bool,
    pub rate: f64,
    pub now: f64,
    /// Time since the start of the recording
    pub elapsed: f64,
    pub region: (f64, f64),
    pub looping: bool,
    pub channels: Vec<ChannelStatus>,
}

pub struct PlaybackSession {
    config: PlaybackConfig,
    clock: VirtualClock,
    coordinator: LoadCoordinator,
    clock_events: Receiver<ClockEvent>,
    bookmarks: BookmarkSet,
    directory: Option<PathBuf>,
    span: Option<(f64, f64)>,
    midnight: f64,
    looping: bool,
}

impl PlaybackSession {
    pub fn new(config: PlaybackConfig, publisher: Arc<dyn ChannelPublisher>) -> PlaybackResult<Self> {
        config.validate()?;

        let clock = VirtualClock::new(config.tick_period(), config.rate);
        let clock_events = clock.subscribe();
        let coordinator = LoadCoordinator::new(clock.clone(), publisher, &config);
        let looping = config.region_loop;

        Ok(Self {
            config,
            clock,
            coordinator,
            clock_events,
            bookmarks: BookmarkSet::default(),
            directory: None,
            span: None,
            midnight: 0.0,
            looping,
        })
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn coordinator(&self) -> &LoadCoordinator {
        &self.coordinator
    }

    pub fn bookmarks(&self) -> &BookmarkSet {
        &self.bookmarks
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// First and last timestamp over all loaded channels
    pub fn span(&self) -> Option<(f64, f64)> {
        self.span
    }

    /// Midnight (UTC) of the recording day, the base of absolute time specs
    pub fn midnight(&self) -> f64 {
        self.midnight
    }

    pub fn is_loaded(&self) -> bool {
        self.span.is_some()
    }

    /// Active region, defaulting to the whole recording
    pub fn region(&self) -> (f64, f64) {
        let (min, max) = self.span.unwrap_or((0.0, 0.0));
        (
            self.bookmarks.region_start().map_or(min, |b| b.when),
            self.bookmarks.region_end().map_or(max, |b| b.when),
        )
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        log::info!("region loop: {}", looping);
        self.looping = looping;
    }

    /// Load every recording of `dir`, replacing the current channels.
    ///
    /// Partial failures still return the report; a load with no usable
    /// channel fails with [`PlaybackError::SessionLoadFailure`].
    pub fn load(&mut self, dir: &Path) -> PlaybackResult<LoadReport> {
        self.clock.stop();
        self.span = None;
        self.directory = None;
        self.bookmarks = BookmarkSet::default();

        self.coordinator.begin_load(dir)?;
        let report = self.coordinator.wait()?;

        let (Some(start), Some(end)) = (report.earliest_start, report.latest_end) else {
            let message = report
                .message()
                .unwrap_or_else(|| "no channels loaded".to_string());
            return Err(PlaybackError::SessionLoadFailure(message));
        };

        // Bookmarks are optional; an unreadable file never fails the load
        self.bookmarks = match BookmarkSet::load_or_seed(dir, start, end) {
            Ok(bookmarks) => bookmarks,
            Err(e) => {
                log::warn!("ignoring bookmarks of {}: {}", dir.display(), e);
                BookmarkSet::seeded(start, end)
            }
        };
        self.span = Some((start, end));
        self.midnight = midnight_of(start);
        self.directory = Some(dir.to_path_buf());

        let (region_start, region_end) = self.region();
        self.clock.set_range(region_start, region_end);
        log::info!(
            "session ready: {} channels, region [{:.3}, {:.3}]",
            report.loaded.len(),
            region_start,
            region_end
        );
        Ok(report)
    }

    fn require_loaded(&self) -> PlaybackResult<(f64, f64)> {
        self.span
            .ok_or_else(|| PlaybackError::invalid_input("no recording loaded"))
    }

    pub fn start(&self) -> PlaybackResult<()> {
        self.require_loaded()?;
        self.clock.start();
        Ok(())
    }

    pub fn stop(&self) {
        self.clock.stop();
    }

    /// Jump back to the region start
    pub fn rewind(&self) {
        let (start, _) = self.region();
        self.clock.set_start(start);
    }

    pub fn set_rate(&self, rate: f64) -> PlaybackResult<()> {
        self.clock.set_rate(rate)
    }

    /// Set the rate to `2^power`
    pub fn set_rate_power(&self, power: i32) -> PlaybackResult<()> {
        self.clock.set_rate(2f64.powi(power))
    }

    /// Turn a time specification into recording time
    pub fn resolve(&self, spec: &str) -> PlaybackResult<f64> {
        let spec = TimeSpec::parse(spec)?;
        Ok(spec.resolve(self.midnight, self.clock.current_time()))
    }

    /// Move playback to the time given by `spec`, returning where it landed
    /// (clamped into the region)
    pub fn jump_to(&self, spec: &str) -> PlaybackResult<f64> {
        self.require_loaded()?;
        let when = self.resolve(spec)?;
        self.clock.set_start(when);
        let (min, max) = self.clock.range();
        Ok(when.max(min).min(max))
    }

    fn check_in_span(&self, when: f64) -> PlaybackResult<(f64, f64)> {
        let (min, max) = self.require_loaded()?;
        if when < min || when > max {
            log::warn!("{:.3} outside of [{:.3}, {:.3}]", when, min, max);
            return Err(PlaybackError::OutOfRange { when, min, max });
        }
        Ok((min, max))
    }

    /// Start the region at `spec`. Times outside the recording or after the
    /// region end are rejected.
    pub fn set_region_start(&mut self, spec: &str) -> PlaybackResult<f64> {
        let when = self.resolve(spec)?;
        let (min, _) = self.check_in_span(when)?;
        let (_, end) = self.region();
        if when > end {
            return Err(PlaybackError::OutOfRange { when, min, max: end });
        }

        self.bookmarks
            .add_region_start(Bookmark::new(spec.trim(), when, &describe(when, min)));
        self.apply_region()?;
        Ok(when)
    }

    /// End the region at `spec`. Times outside the recording or before the
    /// region start are rejected.
    pub fn set_region_end(&mut self, spec: &str) -> PlaybackResult<f64> {
        let when = self.resolve(spec)?;
        let (min, max) = self.check_in_span(when)?;
        let (start, _) = self.region();
        if when < start {
            return Err(PlaybackError::OutOfRange {
                when,
                min: start,
                max,
            });
        }

        self.bookmarks
            .add_region_end(Bookmark::new(spec.trim(), when, &describe(when, min)));
        self.apply_region()?;
        Ok(when)
    }

    /// Make an existing region start candidate active
    pub fn select_region_start(&mut self, index: usize) -> PlaybackResult<f64> {
        self.require_loaded()?;
        let (_, end) = self.region();
        let when = self.bookmarks.region_starts.get(index).map(|b| b.when);
        if let Some(when) = when.filter(|w| *w > end) {
            return Err(PlaybackError::OutOfRange {
                when,
                min: self.region().0,
                max: end,
            });
        }
        let when = self.bookmarks.select_region_start(index)?.when;
        self.apply_region()?;
        Ok(when)
    }

    /// Make an existing region end candidate active
    pub fn select_region_end(&mut self, index: usize) -> PlaybackResult<f64> {
        self.require_loaded()?;
        let (start, _) = self.region();
        let when = self.bookmarks.region_ends.get(index).map(|b| b.when);
        if let Some(when) = when.filter(|w| *w < start) {
            return Err(PlaybackError::OutOfRange {
                when,
                min: start,
                max: self.region().1,
            });
        }
        let when = self.bookmarks.select_region_end(index)?.when;
        self.apply_region()?;
        Ok(when)
    }

    fn apply_region(&mut self) -> PlaybackResult<()> {
        let (start, end) = self.region();
        self.clock.set_range(start, end);
        self.save_bookmarks()
    }

    fn save_bookmarks(&self) -> PlaybackResult<()> {
        match &self.directory {
            Some(dir) => self.bookmarks.save(dir),
            None => Ok(()),
        }
    }

    /// Enable or disable emission on one channel
    pub fn set_emitting(&self, channel: &str, emitting: bool) -> PlaybackResult<()> {
        let emitter = self
            .coordinator
            .channel(channel)
            .ok_or_else(|| PlaybackError::not_found(format!("channel '{}'", channel)))?;
        emitter.set_emitting(emitting);
        Ok(())
    }

    /// Bookmark the current playback time
    pub fn add_bookmark(&mut self, name: &str) -> PlaybackResult<Bookmark> {
        let when = self.clock.current_time();
        self.add_bookmark_at(name, when)
    }

    pub fn add_bookmark_at(&mut self, name: &str, when: f64) -> PlaybackResult<Bookmark> {
        let (min, _) = self.check_in_span(when)?;
        let bookmark = Bookmark::new(name.trim(), when, &describe(when, min));
        self.bookmarks.add(bookmark.clone())?;
        self.save_bookmarks()?;
        Ok(bookmark)
    }

    pub fn delete_bookmark(&mut self, name: &str) -> PlaybackResult<Bookmark> {
        let region = self.region();
        let removed = self.bookmarks.delete(name)?;
        if self.region() != region {
            self.apply_region()?;
        } else {
            self.save_bookmarks()?;
        }
        Ok(removed)
    }

    pub fn jump_to_bookmark(&self, name: &str) -> PlaybackResult<f64> {
        let when = self
            .bookmarks
            .find(name)
            .map(|b| b.when)
            .ok_or_else(|| PlaybackError::not_found(format!("bookmark '{}'", name)))?;
        self.clock.set_start(when);
        Ok(when)
    }

    /// Region check driven by clock ticks
    pub fn handle_clock_event(&self, event: &ClockEvent) -> Option<RegionAction> {
        if !matches!(event, ClockEvent::Tick { .. }) || !self.clock.is_running() {
            return None;
        }

        // Queued ticks may be stale; the clock itself decides
        let (start, end) = self.region();
        if self.clock.current_time() < end {
            return None;
        }

        self.clock.stop();
        if self.looping {
            log::info!("region end reached, looping to {:.3}", start);
            self.clock.set_start(start);
            self.clock.start();
            Some(RegionAction::Looped)
        } else {
            log::info!("region end reached, stopping");
            Some(RegionAction::Stopped)
        }
    }

    /// Handle every queued clock event, returning the last region action
    pub fn poll_clock(&self) -> Option<RegionAction> {
        let mut action = None;
        for event in self.clock_events.try_iter() {
            if let Some(taken) = self.handle_clock_event(&event) {
                action = Some(taken);
            }
        }
        action
    }

    pub fn status(&self) -> SessionStatus {
        let now = self.clock.current_time();
        let channels = self
            .coordinator
            .channels()
            .map(|c| ChannelStatus {
                name: c.name().to_string(),
                emitting: c.is_emitting(),
                start: c.start_time(),
                end: c.end_time(),
                records: c.len(),
                stats: c.stats(),
            })
            .collect();

        SessionStatus {
            running: self.clock.is_running(),
            rate: self.clock.rate(),
            now,
            elapsed: self.span.map_or(0.0, |(start, _)| now - start),
            region: self.region(),
            looping: self.looping,
            channels,
        }
    }
}
