//! Playback Manager Library
//!
//! This library provides the commands behind the `playback` binary.

pub mod commands;
