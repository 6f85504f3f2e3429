use clap::{Parser, Subcommand};
use colored::*;
use playback_core::error::PlaybackResult;
use playback_core::PlaybackConfig;
use std::path::PathBuf;

use playback_manager::commands;
use playback_manager::commands::play::PlayOptions;
use playback_manager::commands::synth::SynthOptions;

#[derive(Parser)]
#[command(name = "playback")]
#[command(about = "Replay multi-channel recordings against a virtual clock")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (defaults to ~/.playback/config.toml)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the channels, span and bookmarks of a recording directory
    Info {
        /// Recording directory
        dir: PathBuf,
        /// Output as JSON
        #[arg(long = "json")]
        json: bool,
    },

    /// Replay a recording directory
    Play {
        /// Recording directory
        dir: PathBuf,
        /// Playback rate (1.0 = real time)
        #[arg(short = 'r', long = "rate")]
        rate: Option<f64>,
        /// Region start (HH:MM:SS.sss, seconds since midnight, or +/-offset)
        #[arg(short = 's', long = "start", allow_hyphen_values = true)]
        start: Option<String>,
        /// Region end (same forms as --start)
        #[arg(short = 'e', long = "end", allow_hyphen_values = true)]
        end: Option<String>,
        /// Restart at the region start when the region end is reached
        #[arg(short = 'l', long = "loop")]
        looping: bool,
        /// Channels to keep silent (comma-separated list)
        #[arg(short = 'd', long = "disable", value_delimiter = ',')]
        disable: Vec<String>,
    },

    /// List or edit bookmarks
    Bookmarks {
        /// Recording directory
        dir: PathBuf,
        #[command(subcommand)]
        command: BookmarkCommands,
    },

    /// Generate synthetic recordings
    Synth {
        /// Output directory
        dir: PathBuf,
        /// Number of channels
        #[arg(short = 'n', long = "channels", default_value = "3")]
        channels: usize,
        /// Records per channel
        #[arg(short = 'm', long = "records", default_value = "100")]
        records: usize,
        /// Seconds between records
        #[arg(short = 'p', long = "period", default_value = "0.1")]
        period: f64,
        /// Skip every Nth sequence number
        #[arg(long = "drop-every")]
        drop_every: Option<u64>,
        /// UTC seconds of the first record (defaults to now)
        #[arg(long = "start-time")]
        start_time: Option<f64>,
    },
}

#[derive(Subcommand)]
enum BookmarkCommands {
    /// List bookmarks and the active region
    List,
    /// Add a bookmark
    Add {
        name: String,
        /// Time of the bookmark (any time specification)
        #[arg(allow_hyphen_values = true)]
        when: String,
    },
    /// Delete a bookmark
    Delete { name: String },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Err(e) = run_command(cli.command, cli.config) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: Option<PathBuf>) -> PlaybackResult<()> {
    let config = PlaybackConfig::load_or_default(config_path.as_deref())?;
    tracing::debug!(?config, "configuration");

    match command {
        Commands::Info { dir, json } => commands::info::run_info(&dir, json, &config),

        Commands::Play {
            dir,
            rate,
            start,
            end,
            looping,
            disable,
        } => {
            let options = PlayOptions {
                rate,
                start,
                end,
                looping,
                disable,
            };
            commands::play::run_play(&dir, &options, config)
        }

        Commands::Bookmarks { dir, command } => match command {
            BookmarkCommands::List => commands::bookmarks::list_bookmarks(&dir),
            BookmarkCommands::Add { name, when } => {
                commands::bookmarks::add_bookmark(&dir, &name, &when, config)
            }
            BookmarkCommands::Delete { name } => {
                commands::bookmarks::delete_bookmark(&dir, &name, config)
            }
        },

        Commands::Synth {
            dir,
            channels,
            records,
            period,
            drop_every,
            start_time,
        } => {
            let options = SynthOptions {
                channels,
                records,
                period,
                drop_every,
                start: start_time,
            };
            commands::synth::run_synth(&dir, &options)
        }
    }
}
