//! Named time markers and the playback region
//!
//! A recording directory may hold a `bookmarks.toml` with three lists: the
//! bookmarks themselves and the candidates for the region start and end.
//! Adding a bookmark makes it a candidate for both region bounds; deleting
//! it removes it everywhere. The active region bounds are stored as indices
//! into the candidate lists.

use crate::error::{PlaybackError, PlaybackResult};
use crate::timespec::{format_duration, format_time_stamp};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the bookmark store inside a recording directory
pub const BOOKMARKS_FILE: &str = "bookmarks.toml";

/// Name of the region start seeded for a fresh directory
pub const RECORDING_START: &str = "Recording Start";

/// Name of the region end seeded for a fresh directory
pub const RECORDING_END: &str = "Recording End";

/// A named point in recording time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub name: String,
    /// Recording time in seconds
    pub when: f64,
    #[serde(default)]
    pub tooltip: String,
}

impl Bookmark {
    pub fn new(name: &str, when: f64, tooltip: &str) -> Self {
        Self {
            name: name.to_string(),
            when,
            tooltip: tooltip.to_string(),
        }
    }
}

/// Tooltip text for a marker: time of day plus offset from the recording start
pub fn describe(when: f64, recording_start: f64) -> String {
    format!(
        "{} {}",
        format_time_stamp(when),
        format_duration(when - recording_start)
    )
}

/// Bookmarks and region candidates of one recording directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarkSet {
    pub region_start_index: Option<usize>,
    pub region_end_index: Option<usize>,
    pub bookmarks: Vec<Bookmark>,
    pub region_starts: Vec<Bookmark>,
    pub region_ends: Vec<Bookmark>,
}

impl BookmarkSet {
    /// Location of the bookmark store for a recording directory
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(BOOKMARKS_FILE)
    }

    /// Region candidates covering the whole recording, both selected
    pub fn seeded(start: f64, end: f64) -> Self {
        Self {
            region_start_index: Some(0),
            region_end_index: Some(0),
            bookmarks: Vec::new(),
            region_starts: vec![Bookmark::new(
                RECORDING_START,
                start,
                &describe(start, start),
            )],
            region_ends: vec![Bookmark::new(RECORDING_END, end, &describe(end, start))],
        }
    }

    /// Read the store of `dir`, `None` when it has none
    pub fn load(dir: &Path) -> PlaybackResult<Option<Self>> {
        let path = Self::path_in(dir);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let mut set: BookmarkSet = toml::from_str(&content)?;

        // Indices past the end of their list select nothing
        if set.region_start_index.is_some_and(|i| i >= set.region_starts.len()) {
            log::warn!("{}: region start index out of range", path.display());
            set.region_start_index = None;
        }
        if set.region_end_index.is_some_and(|i| i >= set.region_ends.len()) {
            log::warn!("{}: region end index out of range", path.display());
            set.region_end_index = None;
        }

        log::debug!(
            "loaded {} bookmarks from {}",
            set.bookmarks.len(),
            path.display()
        );
        Ok(Some(set))
    }

    /// Read the store of `dir`, or seed one spanning `[start, end]`
    pub fn load_or_seed(dir: &Path, start: f64, end: f64) -> PlaybackResult<Self> {
        Ok(Self::load(dir)?.unwrap_or_else(|| Self::seeded(start, end)))
    }

    pub fn save(&self, dir: &Path) -> PlaybackResult<()> {
        let path = Self::path_in(dir);
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        log::debug!("saved bookmarks to {}", path.display());
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&Bookmark> {
        self.bookmarks.iter().find(|b| b.name == name)
    }

    /// Add a bookmark, also offering it as region start and end
    pub fn add(&mut self, bookmark: Bookmark) -> PlaybackResult<()> {
        if bookmark.name.trim().is_empty() {
            return Err(PlaybackError::invalid_input("bookmark name is empty"));
        }
        if self.find(&bookmark.name).is_some() {
            return Err(PlaybackError::invalid_input(format!(
                "bookmark '{}' already exists",
                bookmark.name
            )));
        }

        log::info!("bookmark '{}' at {:.3}", bookmark.name, bookmark.when);
        self.region_starts.push(bookmark.clone());
        self.region_ends.push(bookmark.clone());
        self.bookmarks.push(bookmark);
        Ok(())
    }

    /// Remove a bookmark from all three lists
    pub fn delete(&mut self, name: &str) -> PlaybackResult<Bookmark> {
        let index = self
            .bookmarks
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| PlaybackError::not_found(format!("bookmark '{}'", name)))?;
        let removed = self.bookmarks.remove(index);

        remove_candidate(&mut self.region_starts, &mut self.region_start_index, name);
        remove_candidate(&mut self.region_ends, &mut self.region_end_index, name);

        log::info!("deleted bookmark '{}'", name);
        Ok(removed)
    }

    /// Append a region start candidate and make it active
    pub fn add_region_start(&mut self, candidate: Bookmark) -> usize {
        self.region_starts.push(candidate);
        let index = self.region_starts.len() - 1;
        self.region_start_index = Some(index);
        index
    }

    /// Append a region end candidate and make it active
    pub fn add_region_end(&mut self, candidate: Bookmark) -> usize {
        self.region_ends.push(candidate);
        let index = self.region_ends.len() - 1;
        self.region_end_index = Some(index);
        index
    }

    pub fn select_region_start(&mut self, index: usize) -> PlaybackResult<&Bookmark> {
        if index >= self.region_starts.len() {
            return Err(PlaybackError::not_found(format!(
                "region start candidate {}",
                index
            )));
        }
        self.region_start_index = Some(index);
        Ok(&self.region_starts[index])
    }

    pub fn select_region_end(&mut self, index: usize) -> PlaybackResult<&Bookmark> {
        if index >= self.region_ends.len() {
            return Err(PlaybackError::not_found(format!(
                "region end candidate {}",
                index
            )));
        }
        self.region_end_index = Some(index);
        Ok(&self.region_ends[index])
    }

    pub fn region_start(&self) -> Option<&Bookmark> {
        self.region_start_index
            .and_then(|i| self.region_starts.get(i))
    }

    pub fn region_end(&self) -> Option<&Bookmark> {
        self.region_end_index.and_then(|i| self.region_ends.get(i))
    }
}

fn remove_candidate(list: &mut Vec<Bookmark>, active: &mut Option<usize>, name: &str) {
    let Some(index) = list.iter().position(|b| b.name == name) else {
        return;
    };
    list.remove(index);
    *active = match *active {
        Some(i) if i == index => None,
        Some(i) if i > index => Some(i - 1),
        other => other,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_seeded_region() {
        let set = BookmarkSet::seeded(100.0, 250.0);
        assert_eq!(set.region_start().unwrap().name, RECORDING_START);
        assert_eq!(set.region_start().unwrap().when, 100.0);
        assert_eq!(set.region_end().unwrap().name, RECORDING_END);
        assert_eq!(set.region_end().unwrap().when, 250.0);
        assert!(set.bookmarks.is_empty());
        assert!(set.region_end().unwrap().tooltip.ends_with("+00:02:30.00"));
    }

    #[test]
    fn test_add_offers_region_candidates() {
        let mut set = BookmarkSet::seeded(0.0, 100.0);
        set.add(Bookmark::new("launch", 42.0, "")).unwrap();

        assert_eq!(set.bookmarks.len(), 1);
        assert_eq!(set.region_starts.len(), 2);
        assert_eq!(set.region_ends.len(), 2);
        assert_eq!(set.region_starts[1].name, "launch");

        assert!(set.add(Bookmark::new("launch", 50.0, "")).is_err());
        assert!(set.add(Bookmark::new("  ", 50.0, "")).is_err());
    }

    #[test]
    fn test_delete_removes_everywhere() {
        let mut set = BookmarkSet::seeded(0.0, 100.0);
        set.add(Bookmark::new("a", 10.0, "")).unwrap();
        set.add(Bookmark::new("b", 20.0, "")).unwrap();

        set.select_region_start(1).unwrap();
        set.select_region_end(2).unwrap();

        let removed = set.delete("a").unwrap();
        assert_eq!(removed.when, 10.0);
        assert!(set.find("a").is_none());
        assert!(set.region_starts.iter().all(|b| b.name != "a"));
        assert!(set.region_ends.iter().all(|b| b.name != "a"));

        // Active start pointed at "a", active end shifts down onto "b"
        assert_eq!(set.region_start_index, None);
        assert_eq!(set.region_end().unwrap().name, "b");

        assert!(set.delete("a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_user_region_candidates() {
        let mut set = BookmarkSet::seeded(0.0, 100.0);
        let index = set.add_region_start(Bookmark::new("+10", 10.0, ""));
        assert_eq!(index, 1);
        assert_eq!(set.region_start().unwrap().when, 10.0);
        assert!(set.select_region_end(5).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        assert!(BookmarkSet::load(dir.path()).unwrap().is_none());

        let mut set = BookmarkSet::seeded(5.0, 15.0);
        set.add(Bookmark::new("mid", 10.0, "halfway")).unwrap();
        set.select_region_end(1).unwrap();
        set.save(dir.path()).unwrap();

        let loaded = BookmarkSet::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, set);

        let seeded = BookmarkSet::load_or_seed(dir.path(), 0.0, 1.0).unwrap();
        assert_eq!(seeded.region_end().unwrap().name, "mid");
    }

    #[test]
    fn test_stale_index_is_dropped() {
        let dir = tempdir().unwrap();
        fs::write(
            BookmarkSet::path_in(dir.path()),
            "region_start_index = 4\n\n[[region_starts]]\nname = \"x\"\nwhen = 1.0\n",
        )
        .unwrap();

        let set = BookmarkSet::load(dir.path()).unwrap().unwrap();
        assert_eq!(set.region_start_index, None);
        assert_eq!(set.region_starts.len(), 1);
        assert!(set.bookmarks.is_empty());
    }
}
