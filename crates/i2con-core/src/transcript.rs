use i2con_proto::FRAME_SIZE;
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct FrameEntry {
    /// Milliseconds since the UNIX epoch.
    pub timestamp: u64,
    pub direction: Direction,
    pub bytes: [u8; FRAME_SIZE],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

/// Bounded record of the raw frames exchanged on a connection, oldest first.
#[derive(Debug)]
pub struct FrameLog {
    entries: VecDeque<FrameEntry>,
    max_entries: usize,
}

impl FrameLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries),
            max_entries,
        }
    }

    pub fn push(&mut self, direction: Direction, bytes: [u8; FRAME_SIZE]) {
        if self.max_entries == 0 {
            return;
        }
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        if self.entries.len() == self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(FrameEntry {
            timestamp,
            direction,
            bytes,
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &FrameEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
