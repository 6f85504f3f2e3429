//! Per-channel recording files
//!
//! A channel recording (`.pri`) is a bincode stream holding a
//! [`RecordingHeader`] followed by [`Record`] frames until end of file.
//! Frames are written in capture order; readers sort them by timestamp.

use crate::error::{PlaybackError, PlaybackResult};
use bincode::Options;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Recording file extension
pub const RECORDING_EXT: &str = "pri";

/// Magic bytes at the start of every recording
const RECORDING_MAGIC: [u8; 4] = *b"PBRC";

/// Current on-disk format version
const FORMAT_VERSION: u16 = 1;

/// Largest single frame accepted when decoding (64MB)
const MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

/// Leading `<digits>[-<digits>...]-` prefix stamped on recording names
static TIMESTAMP_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+(?:[-_]\d+)*-(.+)$").expect("timestamp prefix pattern is valid")
});

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_FRAME_SIZE)
}

/// Header stored once at the start of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingHeader {
    pub magic: [u8; 4],
    pub version: u16,
    /// Channel the data was captured from
    pub channel: String,
    /// Message type name of the payloads
    pub message_type: String,
}

/// One captured message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Per-channel sequence number assigned at capture time
    pub sequence: u64,
    /// Capture time in recording time (UTC seconds)
    pub timestamp: f64,
    /// Encoded message body, replayed verbatim
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(sequence: u64, timestamp: f64, payload: Vec<u8>) -> Self {
        Self {
            sequence,
            timestamp,
            payload,
        }
    }
}

/// Fully parsed recording
#[derive(Debug, Clone)]
pub struct ParsedRecording {
    pub header: RecordingHeader,
    /// Records ordered by timestamp
    pub records: Vec<Record>,
}

/// Writer producing a recording file
pub struct RecordingWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    count: u64,
}

impl RecordingWriter {
    /// Create a recording at `path`, replacing any existing file
    pub fn create(path: &Path, channel: &str, message_type: &str) -> PlaybackResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(path)?);
        let header = RecordingHeader {
            magic: RECORDING_MAGIC,
            version: FORMAT_VERSION,
            channel: channel.to_string(),
            message_type: message_type.to_string(),
        };
        codec().serialize_into(&mut writer, &header)?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            count: 0,
        })
    }

    pub fn write(&mut self, record: &Record) -> PlaybackResult<()> {
        codec().serialize_into(&mut self.writer, record)?;
        self.count += 1;
        Ok(())
    }

    /// Flush and close, returning the number of records written
    pub fn finish(mut self) -> PlaybackResult<u64> {
        self.writer.flush()?;
        log::debug!("wrote {} records to {}", self.count, self.path.display());
        Ok(self.count)
    }
}

/// Reader wrapper tracking how many bytes have been consumed
struct CountingReader<R> {
    inner: R,
    consumed: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed += n as u64;
        Ok(n)
    }
}

/// Parse a recording file.
///
/// `progress` receives the fraction of the file consumed (0.0 to 1.0) as
/// whole-percent steps. Parsing aborts early once `cancelled` is set.
pub fn read_recording(
    path: &Path,
    mut progress: impl FnMut(f64),
    cancelled: &AtomicBool,
) -> PlaybackResult<ParsedRecording> {
    let file = File::open(path)?;
    let length = file.metadata()?.len();
    if length == 0 {
        return Err(PlaybackError::ParseError("recording is empty".to_string()));
    }

    let mut reader = CountingReader {
        inner: BufReader::new(file),
        consumed: 0,
    };

    let header: RecordingHeader = codec()
        .deserialize_from(&mut reader)
        .map_err(|e| PlaybackError::ParseError(format!("bad header: {}", e)))?;
    if header.magic != RECORDING_MAGIC {
        return Err(PlaybackError::ParseError(
            "not a recording file (bad magic)".to_string(),
        ));
    }
    if header.version != FORMAT_VERSION {
        return Err(PlaybackError::ParseError(format!(
            "unsupported format version {}",
            header.version
        )));
    }

    let mut records = Vec::new();
    let mut last_percent = 0;
    progress(0.0);

    while reader.consumed < length {
        if cancelled.load(Ordering::Relaxed) {
            return Err(PlaybackError::Internal("load cancelled".to_string()));
        }

        let record: Record = codec().deserialize_from(&mut reader).map_err(|e| {
            PlaybackError::ParseError(format!(
                "malformed record {} at byte {}: {}",
                records.len(),
                reader.consumed,
                e
            ))
        })?;
        if !record.timestamp.is_finite() {
            return Err(PlaybackError::ParseError(format!(
                "record {} has non-finite timestamp",
                record.sequence
            )));
        }
        records.push(record);

        let percent = (reader.consumed * 100 / length) as u32;
        if percent > last_percent {
            last_percent = percent;
            progress(reader.consumed as f64 / length as f64);
        }
    }

    if records.is_empty() {
        return Err(PlaybackError::ParseError(
            "recording holds no records".to_string(),
        ));
    }

    // Stable sort keeps capture order for equal timestamps
    records.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    Ok(ParsedRecording { header, records })
}

/// Channel name for a recording path: the file stem without any leading
/// timestamp prefix (`20240101-120000-radar.pri` -> `radar`)
pub fn channel_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    match TIMESTAMP_PREFIX.captures(&stem) {
        Some(caps) => caps[1].to_string(),
        None => stem,
    }
}

fn is_recording(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|e| e == RECORDING_EXT)
            .unwrap_or(false)
}

/// List the recording files of a directory, including those held in
/// per-channel subdirectories one level down, sorted by file name
pub fn list_recordings(dir: &Path) -> PlaybackResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PlaybackError::not_found(format!(
            "recording directory {}",
            dir.display()
        )));
    }

    let mut recordings = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            for inner in fs::read_dir(&path)? {
                let inner = inner?.path();
                if is_recording(&inner) {
                    recordings.push(inner);
                }
            }
        } else if is_recording(&path) {
            recordings.push(path);
        }
    }

    recordings.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));
    Ok(recordings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_channel(path: &Path, timestamps: &[f64]) {
        let mut writer = RecordingWriter::create(path, "test", "Video").unwrap();
        for (i, ts) in timestamps.iter().enumerate() {
            writer
                .write(&Record::new(i as u64 + 1, *ts, vec![i as u8; 16]))
                .unwrap();
        }
        assert_eq!(writer.finish().unwrap(), timestamps.len() as u64);
    }

    #[test]
    fn test_read_sorts_by_timestamp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chan.pri");
        write_channel(&path, &[3.0, 1.0, 2.0]);

        let mut updates = Vec::new();
        let parsed = read_recording(&path, |p| updates.push(p), &AtomicBool::new(false)).unwrap();

        let times: Vec<f64> = parsed.records.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![1.0, 2.0, 3.0]);
        assert_eq!(parsed.header.message_type, "Video");
        assert_eq!(updates.first(), Some(&0.0));
        assert_eq!(updates.last(), Some(&1.0));
    }

    #[test]
    fn test_empty_and_garbage_files_fail() {
        let dir = tempdir().unwrap();
        let cancelled = AtomicBool::new(false);

        let empty = dir.path().join("empty.pri");
        fs::write(&empty, b"").unwrap();
        assert!(read_recording(&empty, |_| {}, &cancelled).is_err());

        let garbage = dir.path().join("garbage.pri");
        fs::write(&garbage, b"this is not a recording at all").unwrap();
        assert!(read_recording(&garbage, |_| {}, &cancelled).is_err());

        let header_only = dir.path().join("header.pri");
        write_channel(&header_only, &[]);
        assert!(read_recording(&header_only, |_| {}, &cancelled).is_err());
    }

    #[test]
    fn test_truncated_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chan.pri");
        write_channel(&path, &[1.0, 2.0]);

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        let err = read_recording(&path, |_| {}, &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, PlaybackError::ParseError(_)));
    }

    #[test]
    fn test_cancelled_read_aborts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chan.pri");
        write_channel(&path, &[1.0, 2.0]);

        assert!(read_recording(&path, |_| {}, &AtomicBool::new(true)).is_err());
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(channel_name(Path::new("/x/20240101-120000-radar.pri")), "radar");
        assert_eq!(channel_name(Path::new("20240101-channel2.pri")), "channel2");
        assert_eq!(channel_name(Path::new("channel2.pri")), "channel2");
        assert_eq!(channel_name(Path::new("2024-rx-3.pri")), "rx-3");
    }

    #[test]
    fn test_list_recordings() {
        let dir = tempdir().unwrap();
        write_channel(&dir.path().join("b.pri"), &[1.0]);
        write_channel(&dir.path().join("a.pri"), &[1.0]);
        write_channel(&dir.path().join("sub").join("c.pri"), &[1.0]);
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let names: Vec<String> = list_recordings(dir.path())
            .unwrap()
            .iter()
            .map(|p| channel_name(p))
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        assert!(list_recordings(&dir.path().join("missing"))
            .unwrap_err()
            .is_not_found());
    }
}
