use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Source of request sequence numbers.
///
/// Values are the wall-clock time in milliseconds. The source never hands out
/// the same value twice: if the clock has not moved past the previous value
/// (two requests in one millisecond, or the clock stepped backwards) the
/// previous value plus one is used instead.
#[derive(Debug, Default)]
pub struct SequenceSource {
    last: u64,
}

impl SequenceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number, formatted for the `sn` field.
    pub fn next(&mut self) -> String {
        self.next_at(now_millis()).to_string()
    }

    fn next_at(&mut self, now_ms: u64) -> u64 {
        let next = if now_ms > self.last {
            now_ms
        } else {
            self.last.wrapping_add(1)
        };
        self.last = next;
        next
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
