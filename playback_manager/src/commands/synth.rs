//! Synth command - Generate synthetic recordings
//!
//! Produces a directory of evenly spaced channel recordings, optionally with
//! periodic sequence gaps, for trying out playback without captured data.

use chrono::{DateTime, Utc};
use colored::*;
use playback_core::error::{PlaybackError, PlaybackResult};
use playback_core::recording::{Record, RecordingWriter, RECORDING_EXT};
use std::path::{Path, PathBuf};

/// Parameters of a synthetic recording set
#[derive(Debug, Clone)]
pub struct SynthOptions {
    pub channels: usize,
    pub records: usize,
    /// Seconds between consecutive records of a channel
    pub period: f64,
    /// Skip every Nth sequence number to simulate drops
    pub drop_every: Option<u64>,
    /// Recording time of the first record (UTC seconds), defaults to now
    pub start: Option<f64>,
}

/// Write the recordings into `dir`, returning the created files
pub fn synthesize(dir: &Path, options: &SynthOptions) -> PlaybackResult<Vec<PathBuf>> {
    if options.channels == 0 || options.records == 0 {
        return Err(PlaybackError::invalid_input(
            "channels and records must be greater than zero",
        ));
    }
    if !(options.period.is_finite() && options.period > 0.0) {
        return Err(PlaybackError::invalid_input("period must be greater than zero"));
    }
    if options.drop_every == Some(0) || options.drop_every == Some(1) {
        return Err(PlaybackError::invalid_input("drop-every must be at least 2"));
    }

    let start = options
        .start
        .unwrap_or_else(|| Utc::now().timestamp() as f64);
    let prefix = DateTime::from_timestamp(start.floor() as i64, 0)
        .map(|dt| dt.format("%Y%m%d-%H%M%S").to_string())
        .unwrap_or_else(|| "0".to_string());

    let mut created = Vec::with_capacity(options.channels);
    for channel in 0..options.channels {
        let name = format!("channel{}", channel + 1);
        let path = dir.join(format!("{}-{}.{}", prefix, name, RECORDING_EXT));
        let mut writer = RecordingWriter::create(&path, &name, "Synthetic")?;

        // Channels are staggered so their records interleave
        let offset = options.period * channel as f64 / options.channels as f64;
        let mut sequence = 0u64;
        for index in 0..options.records {
            sequence += 1;
            if let Some(every) = options.drop_every {
                if sequence % every == 0 {
                    sequence += 1;
                }
            }
            let timestamp = start + offset + index as f64 * options.period;
            let payload = format!("{} #{} @{:.6}", name, sequence, timestamp).into_bytes();
            writer.write(&Record::new(sequence, timestamp, payload))?;
        }

        let count = writer.finish()?;
        log::debug!("{}: {} records", path.display(), count);
        created.push(path);
    }

    Ok(created)
}

pub fn run_synth(dir: &Path, options: &SynthOptions) -> PlaybackResult<()> {
    let created = synthesize(dir, options)?;

    println!(
        "{} {} recordings in {}",
        "Created".green().bold(),
        created.len(),
        dir.display().to_string().white().bold()
    );
    for path in &created {
        println!(
            "  {} {}",
            "-".dimmed(),
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
    }
    Ok(())
}
