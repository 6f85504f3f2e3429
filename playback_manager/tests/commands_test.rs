// Integration tests for the playback command implementations
use playback_core::bookmarks::BookmarkSet;
use playback_core::loader::LoadOutcome;
use playback_core::PlaybackConfig;
use playback_manager::commands::bookmarks::{add_bookmark, delete_bookmark};
use playback_manager::commands::info::summarize;
use playback_manager::commands::synth::{synthesize, SynthOptions};
use tempfile::tempdir;

const START: f64 = 1_700_000_000.0;

fn options() -> SynthOptions {
    SynthOptions {
        channels: 3,
        records: 20,
        period: 0.1,
        drop_every: None,
        start: Some(START),
    }
}

#[test]
fn test_synth_then_info() {
    let dir = tempdir().unwrap();
    let created = synthesize(dir.path(), &options()).unwrap();
    assert_eq!(created.len(), 3);
    assert!(created[0]
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("20231114-221320-"));

    let summary = summarize(dir.path(), &PlaybackConfig::default()).unwrap();
    assert_eq!(summary.outcome, LoadOutcome::Complete);
    let names: Vec<&str> = summary.channels.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["channel1", "channel2", "channel3"]);
    assert!(summary.channels.iter().all(|c| c.records == 20));
    assert!(summary.channels.iter().all(|c| c.drops == 0));
    assert_eq!(summary.start, Some(START));
    assert!(summary.bookmarks.is_none());
}

#[test]
fn test_synth_drop_pattern() {
    let dir = tempdir().unwrap();
    let mut options = options();
    options.channels = 1;
    options.drop_every = Some(5);
    synthesize(dir.path(), &options).unwrap();

    let summary = summarize(dir.path(), &PlaybackConfig::default()).unwrap();
    assert_eq!(summary.channels[0].records, 20);
    assert_eq!(summary.channels[0].drops, 4);
    assert_eq!(summary.channels[0].duplicates, 0);
}

#[test]
fn test_synth_rejects_bad_options() {
    let dir = tempdir().unwrap();

    let mut zero_channels = options();
    zero_channels.channels = 0;
    assert!(synthesize(dir.path(), &zero_channels).is_err());

    let mut bad_period = options();
    bad_period.period = -1.0;
    assert!(synthesize(dir.path(), &bad_period).is_err());

    let mut bad_drop = options();
    bad_drop.drop_every = Some(1);
    assert!(synthesize(dir.path(), &bad_drop).is_err());
}

#[test]
fn test_info_on_empty_directory() {
    let dir = tempdir().unwrap();
    let summary = summarize(dir.path(), &PlaybackConfig::default()).unwrap();
    assert_eq!(summary.outcome, LoadOutcome::NoFiles);
    assert!(summary.channels.is_empty());
}

#[test]
fn test_bookmark_commands() {
    let dir = tempdir().unwrap();
    synthesize(dir.path(), &options()).unwrap();

    add_bookmark(dir.path(), "mark", "+1.5", PlaybackConfig::default()).unwrap();
    assert!(add_bookmark(dir.path(), "mark", "+1.0", PlaybackConfig::default()).is_err());
    assert!(add_bookmark(dir.path(), "far", "+1h", PlaybackConfig::default()).is_err());

    let set = BookmarkSet::load(dir.path()).unwrap().unwrap();
    assert_eq!(set.bookmarks.len(), 1);
    assert!((set.bookmarks[0].when - (START + 1.5)).abs() < 1e-6);

    let summary = summarize(dir.path(), &PlaybackConfig::default()).unwrap();
    assert_eq!(summary.bookmarks.unwrap().bookmarks.len(), 1);

    delete_bookmark(dir.path(), "mark", PlaybackConfig::default()).unwrap();
    assert!(delete_bookmark(dir.path(), "mark", PlaybackConfig::default()).is_err());
    let set = BookmarkSet::load(dir.path()).unwrap().unwrap();
    assert!(set.bookmarks.is_empty());
}
