//! Bounded per-host history: 24h at 10-minute resolution.

use crate::models::ServerState;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// 24 hours of 10-minute points.
pub const HISTORY_CAPACITY: usize = 144;
pub const HISTORY_RESOLUTION_MINUTES: i64 = 10;

/// Insertion-ordered ring buffer of past snapshots for one host.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct HistoricalSeries {
    entries: VecDeque<ServerState>,
}

impl HistoricalSeries {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Append a snapshot, evicting the oldest entry once the cap is reached.
    pub fn push(&mut self, state: ServerState) {
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(state);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&ServerState> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerState> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<ServerState> {
        self.entries.iter().cloned().collect()
    }
}

/// Hostname -> history
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    series: BTreeMap<String, HistoricalSeries>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, state: &ServerState) {
        self.series
            .entry(state.hostname.clone())
            .or_insert_with(HistoricalSeries::new)
            .push(state.clone());
    }

    /// Append a batch of snapshots in iteration order, e.g. the frames of a
    /// pre-baked overlay dataset.
    pub fn extend<'a, I>(&mut self, states: I)
    where
        I: IntoIterator<Item = &'a ServerState>,
    {
        for state in states {
            self.record(state);
        }
    }

    pub fn series(&self, hostname: &str) -> Option<&HistoricalSeries> {
        self.series.get(hostname)
    }

    pub fn all(&self) -> &BTreeMap<String, HistoricalSeries> {
        &self.series
    }

    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}
