//! Play command - Replay a recording directory
//!
//! Loads the directory, applies the requested region and channel selection,
//! and replays through the logging publisher until the region end is reached
//! or Ctrl+C is pressed.

use colored::*;
use playback_core::communication::LogPublisher;
use playback_core::error::PlaybackResult;
use playback_core::session::{PlaybackSession, RegionAction, SessionStatus};
use playback_core::timespec::{format_duration, format_time_stamp};
use playback_core::PlaybackConfig;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often the status line is refreshed
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct PlayOptions {
    pub rate: Option<f64>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub looping: bool,
    pub disable: Vec<String>,
}

fn print_status(status: &SessionStatus) {
    let published: u64 = status.channels.iter().map(|c| c.stats.published).sum();
    let drops: u64 = status.channels.iter().map(|c| c.stats.drops).sum();
    println!(
        "  {} {} {}  {} x{}  {} {}  {} {}",
        "Time:".cyan(),
        format_time_stamp(status.now),
        format_duration(status.elapsed).dimmed(),
        "Rate:".cyan(),
        status.rate,
        "Sent:".cyan(),
        published,
        "Drops:".cyan(),
        if drops > 0 {
            drops.to_string().yellow()
        } else {
            drops.to_string().normal()
        }
    );
}

fn print_summary(status: &SessionStatus) {
    println!();
    println!("{}", "Channels:".green().bold());
    for channel in &status.channels {
        let state = if channel.emitting {
            "on".green()
        } else {
            "off".red()
        };
        println!(
            "  {} [{}] {}/{} sent, {} dropped, {} duplicated",
            channel.name.white().bold(),
            state,
            channel.stats.emitted,
            channel.records,
            channel.stats.drops,
            channel.stats.duplicates
        );
    }
}

pub fn run_play(dir: &Path, options: &PlayOptions, mut config: PlaybackConfig) -> PlaybackResult<()> {
    if let Some(rate) = options.rate {
        config.rate = rate;
    }
    if options.looping {
        config.region_loop = true;
    }

    let publisher = Arc::new(LogPublisher::new(
        config.subscriber_count,
        &config.channel_suffix,
    ));
    let mut session = PlaybackSession::new(config, publisher.clone())?;

    println!(
        "{} {}",
        "Loading".green().bold(),
        dir.display().to_string().white().bold()
    );
    let report = session.load(dir)?;
    if let Some(message) = report.message() {
        println!("  {} {}", "Warning:".yellow().bold(), message);
    }

    if let Some(spec) = &options.start {
        let when = session.set_region_start(spec)?;
        println!("  {} {}", "Region start:".cyan(), format_time_stamp(when));
    }
    if let Some(spec) = &options.end {
        let when = session.set_region_end(spec)?;
        println!("  {} {}", "Region end:".cyan(), format_time_stamp(when));
    }
    for channel in &options.disable {
        session.set_emitting(channel, false)?;
        println!("  {} {}", "Disabled:".yellow(), channel);
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        log::warn!("failed to install Ctrl-C handler: {}", e);
    }

    let (start, end) = session.region();
    println!(
        "{} {} to {} at x{}{}",
        "Playing".green().bold(),
        format_time_stamp(start),
        format_time_stamp(end),
        session.clock().rate(),
        if session.is_looping() { " (looping)" } else { "" }
    );
    session.start()?;

    let tick = session.config().tick_period();
    let mut last_status = Instant::now();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(tick);

        match session.poll_clock() {
            Some(RegionAction::Stopped) => {
                println!("{}", "Reached region end".green());
                break;
            }
            Some(RegionAction::Looped) => {
                println!("  {} {}", "Looped to".cyan(), format_time_stamp(start));
            }
            None => {}
        }

        if last_status.elapsed() >= STATUS_INTERVAL {
            print_status(&session.status());
            last_status = Instant::now();
        }
    }

    session.stop();
    if !running.load(Ordering::SeqCst) {
        println!("{}", "Interrupted".yellow());
    }

    print_summary(&session.status());
    println!(
        "  {} {} messages, {} bytes",
        "Published:".cyan(),
        publisher.messages_sent(),
        publisher.bytes_sent()
    );
    Ok(())
}
