//! Running-time bookkeeping across segment swaps
//!
//! A pipeline instance may decode several consecutive segments (gapless
//! advance, CUE sections) while the downstream graph keeps running. Buffers
//! of a newly linked segment must continue exactly where the previous segment
//! stopped, so the source pad of every new segment is offset by the running
//! time accumulated by the previous one.

/// Time segment announced by the engine ahead of a run of buffers
///
/// All values are nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    /// Stream time of the first buffer in the segment
    pub start: u64,
    /// Stream time at which the segment ends, if bounded
    pub stop: Option<u64>,
    /// Running time accumulated before this segment
    pub base: u64,
    /// Last known position inside the segment
    pub position: u64,
}

impl Segment {
    /// Segment starting at `start` with no prior running time
    pub fn starting_at(start: u64) -> Self {
        Self {
            start,
            stop: None,
            base: 0,
            position: start,
        }
    }

    /// Convert a stream position inside this segment to running time
    ///
    /// Positions before the segment start map to the segment's base.
    pub fn to_running_time(&self, position: u64) -> u64 {
        self.base + position.saturating_sub(self.start)
    }
}

/// Segment offset state of one pipeline instance
///
/// The accumulated running time only moves forward while the instance lives;
/// it restarts when the engine performs a flushing seek (see
/// [`Timeline::flush`]).
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    /// Start of the first segment seen after the queue stage
    segment_start: Option<u64>,
    /// Most recent segment of the current source, advanced by every buffer
    source_segment: Segment,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the start of the first downstream segment
    ///
    /// Later calls are ignored; buffer timestamps are always made relative to
    /// the first segment of the instance.
    pub fn record_segment_start(&mut self, start: u64) {
        if self.segment_start.is_none() {
            self.segment_start = Some(start);
        }
    }

    /// Offset subtracted from downstream buffer timestamps
    pub fn segment_start(&self) -> u64 {
        self.segment_start.unwrap_or(0)
    }

    /// Zero-based start time of a downstream buffer
    pub fn buffer_start(&self, timestamp: Option<u64>) -> i64 {
        timestamp.unwrap_or(0) as i64 - self.segment_start() as i64
    }

    /// Replace the current source segment with a newly announced one
    pub fn record_segment(&mut self, segment: Segment) {
        self.source_segment = segment;
    }

    /// Account for one buffer produced by the current source
    ///
    /// The position becomes `timestamp + duration`; a missing timestamp
    /// continues from the last position and a missing duration adds nothing.
    pub fn advance(&mut self, timestamp: Option<u64>, duration: Option<u64>) {
        let start = timestamp.unwrap_or(self.source_segment.position);
        self.source_segment.position = start + duration.unwrap_or(0);
    }

    /// Running time at an arbitrary position of the current source segment
    pub fn running_time_at(&self, position: u64) -> u64 {
        self.source_segment.to_running_time(position)
    }

    /// Running time at the end of the last buffer produced
    ///
    /// This is the pad offset to apply to the next segment when it is linked.
    pub fn running_time(&self) -> u64 {
        self.running_time_at(self.source_segment.position)
    }

    /// Current source segment
    pub fn source_segment(&self) -> &Segment {
        &self.source_segment
    }

    /// A flushing seek restarts the running-time clock
    pub fn flush(&mut self) {
        self.source_segment = Segment::default();
    }
}
