use std::collections::VecDeque;

use parking_lot::RwLock;

use crate::models::MessageRecord;

/// Bounded, oldest-first log of recent messages
///
/// Appending past capacity drops the oldest record. Nothing is persisted.
pub struct MessageLog {
    capacity: usize,
    records: RwLock<VecDeque<MessageRecord>>,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn append(&self, record: MessageRecord) {
        if self.capacity == 0 {
            return;
        }

        let mut records = self.records.write();
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    /// Records addressed to everyone, to `username`, or sent by `username`
    pub fn history_for(&self, username: &str) -> Vec<MessageRecord> {
        self.records
            .read()
            .iter()
            .filter(|record| record.visible_to(username))
            .cloned()
            .collect()
    }

    /// Records exchanged between `a` and `b` in either direction
    pub fn conversation_between(&self, a: &str, b: &str) -> Vec<MessageRecord> {
        self.records
            .read()
            .iter()
            .filter(|record| {
                (record.sender == a && record.recipient == b)
                    || (record.sender == b && record.recipient == a)
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
