use crate::backup::LogEntry;
use crate::sinks::LogSink;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Bounded in-memory backup log. Oldest entries are dropped first.
#[derive(Clone)]
pub struct LogBuffer {
    buffer: Arc<Mutex<VecDeque<LogEntry>>>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(max_entries))),
            max_entries,
        }
    }

    pub fn add_log(&self, entry: LogEntry) {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.max_entries {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }

    pub fn get_logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        let buffer = self.buffer.lock();
        let skip = match limit {
            Some(n) => buffer.len().saturating_sub(n),
            None => 0,
        };
        buffer.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

#[async_trait]
impl LogSink for LogBuffer {
    async fn append(&self, entry: LogEntry) {
        self.add_log(entry);
    }
}
