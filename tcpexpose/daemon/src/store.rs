//! Per-connection trace storage
//!
//! Holds the trace buffers keyed by connection quartet. The store is owned by
//! the correlation actor and is never shared; it performs no I/O.

use crate::types::{Quartet, TraceSample};
use std::collections::HashMap;

/// In-memory trace buffers, one per registered connection
#[derive(Debug, Default)]
pub struct TraceStore {
    records: HashMap<Quartet, Vec<TraceSample>>,
}

impl TraceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh, empty record for `key`
    ///
    /// Re-registering an existing key discards its samples.
    ///
    /// # Returns
    ///
    /// `true` if an existing record was replaced
    pub fn create(&mut self, key: Quartet) -> bool {
        self.records.insert(key, Vec::new()).is_some()
    }

    /// Append a sample to the record for `key`
    ///
    /// # Returns
    ///
    /// `false` if no record exists; the sample is dropped
    pub fn append(&mut self, key: &Quartet, sample: TraceSample) -> bool {
        match self.records.get_mut(key) {
            Some(samples) => {
                samples.push(sample);
                true
            }
            None => false,
        }
    }

    /// Delete the record for `key`, if any
    pub fn remove(&mut self, key: &Quartet) -> bool {
        self.records.remove(key).is_some()
    }

    /// Take every sample recorded under either key, forward first
    ///
    /// Both records are deleted. Missing records contribute nothing.
    pub fn drain(&mut self, forward: &Quartet, reverse: &Quartet) -> Vec<TraceSample> {
        let mut samples = self.records.remove(forward).unwrap_or_default();
        if let Some(mut peer) = self.records.remove(reverse) {
            samples.append(&mut peer);
        }
        samples
    }

    pub fn contains(&self, key: &Quartet) -> bool {
        self.records.contains_key(key)
    }

    /// Number of samples buffered for `key`
    pub fn sample_count(&self, key: &Quartet) -> Option<usize> {
        self.records.get(key).map(Vec::len)
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
