//! # Size/age bounded record batch.
//!
//! A batch is flushed when it reaches `capacity` records or when its oldest
//! record is older than `timeout`, whichever comes first.

use std::time::Duration;

use tokio::time::Instant;

use crate::record::Record;

/// Accumulates records for one bulk write.
#[derive(Debug)]
pub struct Batch {
    records: Vec<Record>,
    capacity: usize,
    timeout: Duration,
    opened_at: Option<Instant>,
}

impl Batch {
    /// Creates an empty batch (`capacity` is clamped to at least 1).
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            timeout,
            opened_at: None,
        }
    }

    /// Adds a record; returns the full batch once `capacity` is reached.
    pub fn add(&mut self, record: Record) -> Option<Vec<Record>> {
        if self.records.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.records.push(record);
        if self.records.len() >= self.capacity {
            Some(self.flush())
        } else {
            None
        }
    }

    /// Returns the pending records if the batch is older than `timeout`.
    pub fn flush_if_expired(&mut self) -> Option<Vec<Record>> {
        match self.opened_at {
            Some(at) if at.elapsed() >= self.timeout => Some(self.flush()),
            _ => None,
        }
    }

    /// Time left until the batch expires, if it holds anything.
    pub fn remaining(&self) -> Option<Duration> {
        self.opened_at
            .map(|at| self.timeout.saturating_sub(at.elapsed()))
    }

    /// Takes every pending record.
    pub fn flush(&mut self) -> Vec<Record> {
        self.opened_at = None;
        std::mem::replace(&mut self.records, Vec::with_capacity(self.capacity))
    }

    /// Number of pending records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str) -> Record {
        Record::new(id).unwrap()
    }

    #[test]
    fn test_flush_on_capacity() {
        let mut batch = Batch::new(2, Duration::from_secs(60));
        assert!(batch.add(rec("a")).is_none());
        let full = batch.add(rec("b")).unwrap();
        assert_eq!(full.len(), 2);
        assert!(batch.is_empty());
        assert!(batch.remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_timeout() {
        let mut batch = Batch::new(100, Duration::from_millis(100));
        batch.add(rec("a"));
        assert!(batch.flush_if_expired().is_none());

        tokio::time::advance(Duration::from_millis(100)).await;
        let out = batch.flush_if_expired().unwrap();
        assert_eq!(out.len(), 1);
        assert!(batch.flush_if_expired().is_none());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut batch = Batch::new(0, Duration::from_secs(1));
        assert_eq!(batch.add(rec("a")).map(|b| b.len()), Some(1));
    }
}
