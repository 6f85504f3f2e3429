//! # Publishing boundary
//!
//! Emitters hand due records to a [`ChannelPublisher`]. The wire transport
//! lives outside this crate; two in-process implementations are provided:
//!
//! - **MemoryPublisher**: keeps every published record, for embedding and tests
//! - **LogPublisher**: logs each publish and reports a fixed subscriber count
//!
//! ```rust
//! use playback_core::communication::{ChannelPublisher, MemoryPublisher};
//! use playback_core::recording::Record;
//!
//! let publisher = MemoryPublisher::new();
//! publisher.publish("radar", &Record::new(1, 0.5, vec![])).unwrap();
//! assert_eq!(publisher.published("radar").len(), 1);
//! ```

use crate::error::PlaybackResult;
use crate::recording::Record;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Network boundary used by emitters
pub trait ChannelPublisher: Send + Sync {
    /// Publish one record on a channel
    fn publish(&self, channel: &str, record: &Record) -> PlaybackResult<()>;

    /// Number of subscribers currently attached to a channel
    fn subscriber_count(&self, channel: &str) -> usize;
}

/// Publisher that stores everything it is given
#[derive(Debug)]
pub struct MemoryPublisher {
    published: Mutex<HashMap<String, Vec<Record>>>,
    subscribers: Mutex<HashMap<String, usize>>,
    default_subscribers: usize,
}

impl Default for MemoryPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPublisher {
    /// Every channel starts with one subscriber
    pub fn new() -> Self {
        Self::with_default_subscribers(1)
    }

    pub fn with_default_subscribers(count: usize) -> Self {
        Self {
            published: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            default_subscribers: count,
        }
    }

    /// Override the subscriber count of one channel
    pub fn set_subscriber_count(&self, channel: &str, count: usize) {
        self.subscribers.lock().insert(channel.to_string(), count);
    }

    /// Records published on a channel so far, in publish order
    pub fn published(&self, channel: &str) -> Vec<Record> {
        self.published
            .lock()
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Sequence numbers published on a channel so far
    pub fn sequences(&self, channel: &str) -> Vec<u64> {
        self.published(channel).iter().map(|r| r.sequence).collect()
    }

    pub fn total_published(&self) -> usize {
        self.published.lock().values().map(Vec::len).sum()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }
}

impl ChannelPublisher for MemoryPublisher {
    fn publish(&self, channel: &str, record: &Record) -> PlaybackResult<()> {
        self.published
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .lock()
            .get(channel)
            .copied()
            .unwrap_or(self.default_subscribers)
    }
}

/// Publisher that only logs, for running playback without a transport
#[derive(Debug)]
pub struct LogPublisher {
    subscribers: usize,
    suffix: String,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl LogPublisher {
    pub fn new(subscribers: usize, suffix: &str) -> Self {
        Self {
            subscribers,
            suffix: suffix.to_string(),
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

impl ChannelPublisher for LogPublisher {
    fn publish(&self, channel: &str, record: &Record) -> PlaybackResult<()> {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add(record.payload.len() as u64, Ordering::Relaxed);
        log::debug!(
            "publish {}{} seq={} t={:.6} bytes={}",
            channel,
            self.suffix,
            record.sequence,
            record.timestamp,
            record.payload.len()
        );
        Ok(())
    }

    fn subscriber_count(&self, _channel: &str) -> usize {
        self.subscribers
    }
}
