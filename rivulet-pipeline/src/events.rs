//! Caller-facing pipeline events
//!
//! Everything the engine reports asynchronously reaches the caller here,
//! including runtime errors. Events are broadcast via `EventBus`; a slow
//! subscriber lags instead of blocking the streaming threads.

use crate::metadata::MetaBundle;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Identifier of one pipeline instance
///
/// Assigned from a process-wide counter; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PipelineId(pub u64);

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

impl PipelineId {
    pub(crate) fn next() -> Self {
        PipelineId(NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Events published by a pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// The current track ended
    ///
    /// `has_successor` is true when playback continues seamlessly with the
    /// staged next track (gapless advance or the next CUE section).
    EndOfStream { id: PipelineId, has_successor: bool },

    /// Tags were read from the stream
    MetadataFound { id: PipelineId, bundle: MetaBundle },

    /// The current track failed
    Error {
        id: PipelineId,
        message: String,
        domain: i32,
        code: i32,
    },

    /// The queue ran dry; playback paused until it refills
    BufferingStarted { id: PipelineId },

    /// Queue refill level while buffering
    BufferingProgress { id: PipelineId, percent: i32 },

    /// The queue refilled; playback resumed
    BufferingFinished { id: PipelineId },

    /// A volume ramp completed, including its settle delay
    FaderFinished { id: PipelineId },
}

impl PipelineEvent {
    /// Pipeline the event belongs to
    pub fn id(&self) -> PipelineId {
        match self {
            PipelineEvent::EndOfStream { id, .. }
            | PipelineEvent::MetadataFound { id, .. }
            | PipelineEvent::Error { id, .. }
            | PipelineEvent::BufferingStarted { id }
            | PipelineEvent::BufferingProgress { id, .. }
            | PipelineEvent::BufferingFinished { id }
            | PipelineEvent::FaderFinished { id } => *id,
        }
    }
}

/// Default channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Broadcast channel for pipeline events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Receive all events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the absence of subscribers
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
