use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// One journal entry on the inter-agent channel.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BusMessage {
    /// Monotonic arrival sequence, usable as an observe watermark.
    pub seq: u64,
    pub from: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Process-wide inter-agent channel: an append-only, totally ordered,
/// in-memory journal. Observers poll with a watermark; nothing is pushed
/// and nothing survives the process.
#[derive(Default)]
pub struct MessageBus {
    journal: Mutex<Vec<BusMessage>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its sequence number.
    pub fn broadcast(&self, from: impl Into<String>, text: impl Into<String>) -> u64 {
        let mut journal = self.lock();
        let seq = journal.len() as u64 + 1;
        journal.push(BusMessage {
            seq,
            from: from.into(),
            text: text.into(),
            timestamp: Utc::now(),
        });
        seq
    }

    /// Entries with a sequence number strictly greater than `since`
    /// (pass `None` for the whole journal).
    pub fn observe(&self, since: Option<u64>) -> Vec<BusMessage> {
        let watermark = since.unwrap_or(0);
        self.lock()
            .iter()
            .filter(|m| m.seq > watermark)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<BusMessage>> {
        self.journal
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn broadcast_appends_in_order() {
        let bus = MessageBus::new();
        assert_eq!(bus.broadcast("a", "first"), 1);
        assert_eq!(bus.broadcast("b", "second"), 2);

        let all = bus.observe(None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].from, "a");
        assert_eq!(all[1].from, "b");
        assert!(all[0].timestamp <= all[1].timestamp);
    }

    #[test]
    fn observe_honors_watermark() {
        let bus = MessageBus::new();
        bus.broadcast("a", "one");
        let mark = bus.broadcast("a", "two");
        bus.broadcast("b", "three");

        let newer = bus.observe(Some(mark));
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].text, "three");

        assert!(bus.observe(Some(u64::MAX)).is_empty());
    }

    #[test]
    fn journal_is_append_only_and_totally_ordered() {
        let bus = Arc::new(MessageBus::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let bus = bus.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..50 {
                    bus.broadcast(format!("agent-{i}"), format!("msg-{j}"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let all = bus.observe(None);
        assert_eq!(all.len(), 400);
        for (i, msg) in all.iter().enumerate() {
            assert_eq!(msg.seq, i as u64 + 1);
        }
    }
}
