// Integration tests for the playback session command surface
use approx::assert_abs_diff_eq;
use playback_core::bookmarks::{BookmarkSet, RECORDING_END, RECORDING_START};
use playback_core::communication::MemoryPublisher;
use playback_core::recording::{Record, RecordingWriter};
use playback_core::{PlaybackConfig, PlaybackError, PlaybackSession, RegionAction};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

/// 2023-11-14 22:13:20 UTC
const BASE: f64 = 1_700_000_000.0;

fn write_channel(dir: &Path, name: &str, offsets: &[f64]) {
    let mut writer = RecordingWriter::create(&dir.join(format!("{}.pri", name)), name, "Raw").unwrap();
    for (i, offset) in offsets.iter().enumerate() {
        writer
            .write(&Record::new(i as u64 + 1, BASE + offset, vec![i as u8]))
            .unwrap();
    }
    writer.finish().unwrap();
}

fn recording_dir() -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    let offsets: Vec<f64> = (0..=100).map(|i| i as f64 * 0.1).collect();
    write_channel(dir.path(), "radar", &offsets);
    write_channel(dir.path(), "video", &[1.0, 2.0, 3.0]);
    dir
}

fn session() -> (PlaybackSession, Arc<MemoryPublisher>) {
    let config = PlaybackConfig {
        tick_period_ms: 10,
        max_sleep_ms: 20,
        ..Default::default()
    };
    let publisher = Arc::new(MemoryPublisher::new());
    let session = PlaybackSession::new(config, publisher.clone()).unwrap();
    (session, publisher)
}

#[test]
fn test_load_seeds_clock_and_region() {
    let dir = recording_dir();
    let (mut session, _) = session();

    let report = session.load(dir.path()).unwrap();
    assert_eq!(report.loaded, vec!["radar", "video"]);

    assert_eq!(session.span(), Some((BASE, BASE + 10.0)));
    assert_eq!(session.region(), (BASE, BASE + 10.0));
    assert_eq!(session.clock().range(), (BASE, BASE + 10.0));
    assert_eq!(session.clock().current_time(), BASE);
    assert_eq!(session.midnight(), 1_699_920_000.0);

    let bookmarks = session.bookmarks();
    assert_eq!(bookmarks.region_start().unwrap().name, RECORDING_START);
    assert_eq!(bookmarks.region_end().unwrap().name, RECORDING_END);
    assert!(!BookmarkSet::path_in(dir.path()).exists());
}

#[test]
fn test_total_failure_keeps_session_usable() {
    let bad = tempdir().unwrap();
    fs::write(bad.path().join("broken.pri"), b"garbage").unwrap();
    let good = recording_dir();
    let (mut session, _) = session();

    let err = session.load(bad.path()).unwrap_err();
    assert!(matches!(err, PlaybackError::SessionLoadFailure(_)));
    assert!(!session.is_loaded());
    assert!(session.start().is_err());

    session.load(good.path()).unwrap();
    assert!(session.is_loaded());
    assert!(session.start().is_ok());
    session.stop();
}

#[test]
fn test_corrupt_bookmarks_fall_back_to_recording_bounds() {
    let dir = recording_dir();
    fs::write(BookmarkSet::path_in(dir.path()), "this is = = not toml").unwrap();
    let (mut session, _) = session();

    session.load(dir.path()).unwrap();
    assert!(session.is_loaded());
    assert_eq!(session.region(), (BASE, BASE + 10.0));
    assert_eq!(session.clock().range(), (BASE, BASE + 10.0));
    assert_eq!(session.bookmarks().region_start().unwrap().name, RECORDING_START);
    assert!(session.start().is_ok());
    session.stop();
}

#[test]
fn test_empty_directory_is_a_load_failure() {
    let empty = tempdir().unwrap();
    let (mut session, _) = session();

    let err = session.load(empty.path()).unwrap_err();
    assert!(matches!(err, PlaybackError::SessionLoadFailure(_)));
}

#[test]
fn test_jump_specs() {
    let dir = recording_dir();
    let (mut session, _) = session();
    session.load(dir.path()).unwrap();

    let landed = session.jump_to("+2.5").unwrap();
    assert_abs_diff_eq!(landed, BASE + 2.5, epsilon = 1e-6);
    assert_abs_diff_eq!(session.clock().current_time(), BASE + 2.5, epsilon = 1e-6);

    session.jump_to("-1s").unwrap();
    assert_abs_diff_eq!(session.clock().current_time(), BASE + 1.5, epsilon = 1e-6);

    session.jump_to("22:13:27.5").unwrap();
    assert_abs_diff_eq!(session.clock().current_time(), BASE + 7.5, epsilon = 1e-6);

    // Beyond the region clamps
    let landed = session.jump_to("+1h").unwrap();
    assert_abs_diff_eq!(landed, BASE + 10.0, epsilon = 1e-6);

    let before = session.clock().current_time();
    let err = session.jump_to("soon").unwrap_err();
    assert!(matches!(err, PlaybackError::InvalidTimeSpec(_)));
    assert_eq!(session.clock().current_time(), before);
}

#[test]
fn test_invalid_rate_is_rejected() {
    let dir = recording_dir();
    let (mut session, _) = session();
    session.load(dir.path()).unwrap();

    session.set_rate(4.0).unwrap();
    assert!(matches!(
        session.set_rate(0.0),
        Err(PlaybackError::InvalidRate(_))
    ));
    assert!(session.set_rate(-1.0).is_err());
    assert_eq!(session.clock().rate(), 4.0);

    session.set_rate_power(-2).unwrap();
    assert_eq!(session.clock().rate(), 0.25);
}

#[test]
fn test_region_bounds() {
    let dir = recording_dir();
    let (mut session, _) = session();
    session.load(dir.path()).unwrap();

    let err = session.set_region_start("22:00:00").unwrap_err();
    assert!(matches!(err, PlaybackError::OutOfRange { .. }));
    assert_eq!(session.region(), (BASE, BASE + 10.0));

    let start = session.set_region_start("22:13:22").unwrap();
    assert_abs_diff_eq!(start, BASE + 2.0, epsilon = 1e-6);
    let end = session.set_region_end("22:13:26").unwrap();
    assert_abs_diff_eq!(end, BASE + 6.0, epsilon = 1e-6);

    let (min, max) = session.clock().range();
    assert_abs_diff_eq!(min, BASE + 2.0, epsilon = 1e-6);
    assert_abs_diff_eq!(max, BASE + 6.0, epsilon = 1e-6);
    assert_abs_diff_eq!(session.clock().current_time(), BASE + 2.0, epsilon = 1e-6);

    // End before start is rejected
    session.jump_to("22:13:24").unwrap();
    assert!(session.set_region_end("22:13:21").is_err());

    // Region survives a reload
    assert!(BookmarkSet::path_in(dir.path()).exists());
    let (mut reloaded, _) = self::session();
    reloaded.load(dir.path()).unwrap();
    let (min, max) = reloaded.region();
    assert_abs_diff_eq!(min, BASE + 2.0, epsilon = 1e-6);
    assert_abs_diff_eq!(max, BASE + 6.0, epsilon = 1e-6);
}

#[test]
fn test_set_emitting_unknown_channel() {
    let dir = recording_dir();
    let (mut session, _) = session();
    session.load(dir.path()).unwrap();

    assert!(session.set_emitting("sonar", false).unwrap_err().is_not_found());

    session.set_emitting("video", false).unwrap();
    let status = session.status();
    let video = status.channels.iter().find(|c| c.name == "video").unwrap();
    assert!(!video.emitting);
    assert_eq!(video.records, 3);
}

#[test]
fn test_bookmarks() {
    let dir = recording_dir();
    let (mut session, _) = session();
    session.load(dir.path()).unwrap();

    session.jump_to("+3").unwrap();
    let mark = session.add_bookmark("launch").unwrap();
    assert_abs_diff_eq!(mark.when, BASE + 3.0, epsilon = 1e-6);
    assert!(mark.tooltip.contains("+00:00:03.00"));
    assert!(session.add_bookmark("launch").is_err());
    assert!(matches!(
        session.add_bookmark_at("late", BASE + 99.0),
        Err(PlaybackError::OutOfRange { .. })
    ));

    session.rewind();
    assert_eq!(session.clock().current_time(), BASE);
    let when = session.jump_to_bookmark("launch").unwrap();
    assert_eq!(session.clock().current_time(), when);

    let stored = BookmarkSet::load(dir.path()).unwrap().unwrap();
    assert_eq!(stored.bookmarks.len(), 1);
    assert_eq!(stored.region_starts.len(), 2);

    session.delete_bookmark("launch").unwrap();
    assert!(session.bookmarks().find("launch").is_none());
    assert!(session.jump_to_bookmark("launch").unwrap_err().is_not_found());
    let stored = BookmarkSet::load(dir.path()).unwrap().unwrap();
    assert!(stored.bookmarks.is_empty());
    assert_eq!(stored.region_starts.len(), 1);
}

#[test]
fn test_region_end_stops_playback() {
    let dir = recording_dir();
    let (mut session, _) = session();
    session.load(dir.path()).unwrap();
    session.set_region_end("+1").unwrap();
    session.set_rate(20.0).unwrap();

    session.start().unwrap();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(session.poll_clock(), Some(RegionAction::Stopped));
    assert!(!session.clock().is_running());
}

#[test]
fn test_region_loop_restarts_at_start() {
    let dir = recording_dir();
    let (mut session, _) = session();
    session.load(dir.path()).unwrap();
    session.set_region_start("+2").unwrap();
    session.set_region_end("+1").unwrap();
    session.set_looping(true);
    session.set_rate(20.0).unwrap();

    session.start().unwrap();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(session.poll_clock(), Some(RegionAction::Looped));
    assert!(session.clock().is_running());
    session.stop();

    let (start, end) = session.region();
    let now = session.clock().current_time();
    assert!(now >= start && now < end, "{} not in [{}, {}]", now, start, end);
}

#[test]
fn test_end_to_end_replay() {
    let dir = recording_dir();
    let (mut session, publisher) = session();
    session.load(dir.path()).unwrap();
    session.set_rate(50.0).unwrap();
    session.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while publisher.total_published() < 104 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    session.stop();

    let expected: Vec<u64> = (1..=101).collect();
    assert_eq!(publisher.sequences("radar"), expected);
    assert_eq!(publisher.sequences("video"), vec![1, 2, 3]);

    let status = session.status();
    assert!(status.channels.iter().all(|c| c.stats.drops == 0));
}
