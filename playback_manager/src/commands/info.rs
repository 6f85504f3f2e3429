//! Info command - Describe a recording directory
//!
//! Loads every channel without replaying anything and prints the channel
//! spans, failures and bookmarks.

use colored::*;
use playback_core::bookmarks::BookmarkSet;
use playback_core::communication::LogPublisher;
use playback_core::emitter::SequenceStep;
use playback_core::error::PlaybackResult;
use playback_core::loader::{LoadCoordinator, LoadOutcome};
use playback_core::timespec::{format_date_time, format_duration, format_time_stamp};
use playback_core::{PlaybackConfig, VirtualClock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    pub name: String,
    pub file: Option<PathBuf>,
    pub message_type: String,
    pub records: usize,
    pub start: f64,
    pub end: f64,
    /// Sequence gaps and repeats found in the file
    pub drops: u64,
    pub duplicates: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectorySummary {
    pub directory: PathBuf,
    pub outcome: LoadOutcome,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub channels: Vec<ChannelSummary>,
    pub failures: BTreeMap<String, String>,
    pub bookmarks: Option<BookmarkSet>,
}

/// Count drops and duplicates the way playback would see them
fn sequence_stats(sequences: impl Iterator<Item = u64>) -> (u64, u64) {
    let mut drops = 0;
    let mut duplicates = 0;
    let mut last = None;
    for sequence in sequences {
        match SequenceStep::classify(last, sequence) {
            SequenceStep::InOrder => {}
            SequenceStep::Dropped(missing) => drops += missing,
            SequenceStep::Duplicate => duplicates += 1,
        }
        last = Some(sequence);
    }
    (drops, duplicates)
}

/// Load `dir` and summarize its contents
pub fn summarize(dir: &Path, config: &PlaybackConfig) -> PlaybackResult<DirectorySummary> {
    let clock = VirtualClock::new(config.tick_period(), 1.0);
    let publisher = Arc::new(LogPublisher::new(0, ""));
    let mut coordinator = LoadCoordinator::new(clock, publisher, config);

    coordinator.begin_load(dir)?;
    let report = coordinator.wait()?;

    let channels = coordinator
        .channels()
        .map(|c| {
            let (drops, duplicates) = sequence_stats(c.records().iter().map(|r| r.sequence));
            ChannelSummary {
                name: c.name().to_string(),
                file: c.path().map(Path::to_path_buf),
                message_type: c.message_type().to_string(),
                records: c.len(),
                start: c.start_time(),
                end: c.end_time(),
                drops,
                duplicates,
            }
        })
        .collect();

    Ok(DirectorySummary {
        directory: dir.to_path_buf(),
        outcome: report.outcome,
        start: report.earliest_start,
        end: report.latest_end,
        channels,
        failures: report.failure_reasons,
        bookmarks: BookmarkSet::load(dir)?,
    })
}

pub fn run_info(dir: &Path, json: bool, config: &PlaybackConfig) -> PlaybackResult<()> {
    let summary = summarize(dir, config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{} {}",
        "Recording:".green().bold(),
        summary.directory.display().to_string().white().bold()
    );

    if let (Some(start), Some(end)) = (summary.start, summary.end) {
        println!("  {} {}", "Start:".cyan(), format_date_time(start));
        println!("  {} {}", "End:".cyan(), format_date_time(end));
        println!("  {} {}", "Duration:".cyan(), format_duration(end - start));
    }
    println!();

    if summary.channels.is_empty() {
        println!("{}", "No channels loaded.".yellow());
    } else {
        println!("{}", "Channels:".green().bold());
        for channel in &summary.channels {
            println!(
                "  {} {} records, {} to {} ({})",
                channel.name.white().bold(),
                channel.records,
                format_time_stamp(channel.start),
                format_time_stamp(channel.end),
                channel.message_type.dimmed()
            );
            if channel.drops > 0 || channel.duplicates > 0 {
                println!(
                    "    {} {} dropped, {} duplicated",
                    "Gaps:".yellow(),
                    channel.drops,
                    channel.duplicates
                );
            }
        }
    }

    if !summary.failures.is_empty() {
        println!();
        println!("{}", "Failed:".red().bold());
        for (name, reason) in &summary.failures {
            println!("  {} {}", name.red(), reason.dimmed());
        }
    }

    if let Some(bookmarks) = &summary.bookmarks {
        if !bookmarks.bookmarks.is_empty() {
            println!();
            println!("{}", "Bookmarks:".green().bold());
            for bookmark in &bookmarks.bookmarks {
                println!(
                    "  {} {}",
                    bookmark.name.white().bold(),
                    format_time_stamp(bookmark.when)
                );
            }
        }
    }

    if summary.outcome == LoadOutcome::NoFiles {
        println!(
            "  {} Create test data with 'playback synth {}'",
            "Tip:".dimmed(),
            summary.directory.display()
        );
    }

    Ok(())
}
