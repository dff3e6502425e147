/// Counters describing what happened during a single polling cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleStats {
    points_seen: u64,
    points_filtered: u64,
    messages_sent: u64,
    messages_dropped: u64,
    bytes_sent: u64,
    bytes_dropped: u64,
    source_unavailable: bool,
}

impl CycleStats {
    /// Number of points enumerated from the counter source.
    pub fn points_seen(&self) -> u64 {
        self.points_seen
    }

    /// Number of points skipped by the field filter.
    pub fn points_filtered(&self) -> u64 {
        self.points_filtered
    }

    /// Number of messages handed off to the transport successfully.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    /// Number of messages the transport failed to send.
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped
    }

    /// Number of bytes handed off to the transport successfully.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Number of bytes in messages the transport failed to send.
    pub fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped
    }

    /// Returns `true` if the cycle was skipped because the counter source could not be read.
    pub fn source_unavailable(&self) -> bool {
        self.source_unavailable
    }

    pub(crate) fn track_point(&mut self) {
        self.points_seen += 1;
    }

    pub(crate) fn track_point_filtered(&mut self) {
        self.points_filtered += 1;
    }

    pub(crate) fn track_send_succeeded(&mut self, bytes_len: usize) {
        self.messages_sent += 1;
        self.bytes_sent += bytes_len as u64;
    }

    pub(crate) fn track_send_failed(&mut self, bytes_len: usize) {
        self.messages_dropped += 1;
        self.bytes_dropped += bytes_len as u64;
    }

    pub(crate) fn track_source_unavailable(&mut self) {
        self.source_unavailable = true;
    }
}
