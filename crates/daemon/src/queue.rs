use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Queue handle shared between the ingestion reader (append) and the
/// worker (pop-head). Nothing else mutates it.
pub type SharedQueue = Arc<Mutex<JobQueue>>;

/// Outcome of an enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// Path was appended to the tail
    Queued,
    /// Path is already pending; it keeps its position
    Duplicate,
}

/// Ordered, duplicate-free FIFO of pending source paths.
///
/// Admission is a linear membership scan, fine at human-submitted queue
/// depths. Order is never reshuffled, and the head is only ever removed
/// by the worker once the job it denotes has finished or been skipped.
#[derive(Debug, Default)]
pub struct JobQueue {
    paths: VecDeque<String>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            paths: VecDeque::new(),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Append `path` unless it is already pending
    pub fn enqueue(&mut self, path: &str) -> Enqueue {
        if self.contains(path) {
            return Enqueue::Duplicate;
        }
        self.paths.push_back(path.to_string());
        Enqueue::Queued
    }

    /// Head of the queue, if any
    pub fn peek_head(&self) -> Option<&str> {
        self.paths.front().map(|p| p.as_str())
    }

    /// Remove and return the head; no-op on an empty queue
    pub fn pop_head(&mut self) -> Option<String> {
        self.paths.pop_front()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Ordered copy of the pending paths for the observability surface
    pub fn snapshot(&self) -> Vec<String> {
        self.paths.iter().cloned().collect()
    }
}
