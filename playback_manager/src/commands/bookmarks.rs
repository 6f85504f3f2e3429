//! Bookmarks command - List and edit the bookmarks of a recording directory

use colored::*;
use playback_core::bookmarks::BookmarkSet;
use playback_core::communication::LogPublisher;
use playback_core::error::PlaybackResult;
use playback_core::session::PlaybackSession;
use playback_core::timespec::format_time_stamp;
use playback_core::PlaybackConfig;
use std::path::Path;
use std::sync::Arc;

fn open_session(dir: &Path, config: PlaybackConfig) -> PlaybackResult<PlaybackSession> {
    let mut session = PlaybackSession::new(config, Arc::new(LogPublisher::new(0, "")))?;
    session.load(dir)?;
    Ok(session)
}

pub fn list_bookmarks(dir: &Path) -> PlaybackResult<()> {
    let Some(set) = BookmarkSet::load(dir)? else {
        println!("{}", "No bookmarks saved.".yellow());
        return Ok(());
    };

    if set.bookmarks.is_empty() {
        println!("{}", "No bookmarks saved.".yellow());
    } else {
        println!("{}", "Bookmarks:".green().bold());
        for bookmark in &set.bookmarks {
            println!(
                "  {} {} {}",
                bookmark.name.white().bold(),
                format_time_stamp(bookmark.when),
                bookmark.tooltip.dimmed()
            );
        }
    }

    if let (Some(start), Some(end)) = (set.region_start(), set.region_end()) {
        println!();
        println!(
            "{} {} ({}) to {} ({})",
            "Region:".cyan(),
            start.name,
            format_time_stamp(start.when),
            end.name,
            format_time_stamp(end.when)
        );
    }
    Ok(())
}

/// Add a bookmark at the time given by `when` (any time specification)
pub fn add_bookmark(dir: &Path, name: &str, when: &str, config: PlaybackConfig) -> PlaybackResult<()> {
    let mut session = open_session(dir, config)?;
    let when = session.resolve(when)?;
    let bookmark = session.add_bookmark_at(name, when)?;
    println!(
        "{} '{}' at {}",
        "Added bookmark".green(),
        bookmark.name,
        bookmark.tooltip
    );
    Ok(())
}

pub fn delete_bookmark(dir: &Path, name: &str, config: PlaybackConfig) -> PlaybackResult<()> {
    let mut session = open_session(dir, config)?;
    session.delete_bookmark(name)?;
    println!("{} '{}'", "Deleted bookmark".green(), name);
    Ok(())
}
