//! Channel list cache.
//!
//! `LIST` on a large network returns tens of thousands of `322` lines, so
//! the result is kept per server and reused until it is older than the
//! configured max age. One cache is owned by each connection; the store
//! keeps a copy so a fresh listing survives a restart.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Default max age of a listing (setting `channel_list_expiration`).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);

/// One `322` (RPL_LIST) entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelListing {
    pub name: String,
    pub users: u32,
    pub topic: String,
}

impl ChannelListing {
    /// Build from a `322` reply: `<me> <channel> <users> :<topic>`.
    pub fn from_params(params: &[String]) -> Option<Self> {
        let name = params.get(1)?.clone();
        let users = params.get(2).and_then(|n| n.parse().ok()).unwrap_or(0);
        let topic = params.get(3).cloned().unwrap_or_default();
        Some(Self { name, users, topic })
    }
}

/// Cached listing for one server.
#[derive(Debug)]
pub struct ChannelListCache {
    max_age: Duration,
    /// Committed listing and when it was fetched (unix seconds).
    committed: Option<(Vec<ChannelListing>, u64)>,
    /// Entries received since the last `LIST` request.
    pending: Vec<ChannelListing>,
    /// Position of each pending channel in `pending`.
    index: HashMap<String, usize>,
}

impl ChannelListCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            committed: None,
            pending: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Seed from a persisted listing.
    pub fn restore(&mut self, channels: Vec<ChannelListing>, fetched_at: u64) {
        self.committed = Some((channels, fetched_at));
    }

    /// The listing if it is younger than the max age at `now`.
    pub fn fresh(&self, now: u64) -> Option<&[ChannelListing]> {
        let (channels, fetched_at) = self.committed.as_ref()?;
        let age = now.saturating_sub(*fetched_at);
        (age <= self.max_age.as_secs()).then_some(channels.as_slice())
    }

    /// Start collecting a new listing.
    pub fn begin(&mut self) {
        self.pending.clear();
        self.index.clear();
    }

    /// Record one `322` entry. A repeated channel replaces its earlier entry.
    pub fn add(&mut self, entry: ChannelListing) {
        match self.index.get(&entry.name) {
            Some(&i) => self.pending[i] = entry,
            None => {
                self.index.insert(entry.name.clone(), self.pending.len());
                self.pending.push(entry);
            }
        }
    }

    /// `323` received: the pending listing becomes the cached one.
    pub fn commit(&mut self, now: u64) -> &[ChannelListing] {
        let channels = std::mem::take(&mut self.pending);
        self.index.clear();
        &self.committed.insert((channels, now)).0
    }

    /// Drop the cached listing so the next request goes to the server.
    pub fn invalidate(&mut self) {
        self.committed = None;
    }
}

impl Default for ChannelListCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

/// Current wall-clock time in unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
