//! Buffer consumer registry
//!
//! Analyzers and visualizers receive a copy of every normalized buffer. The
//! registry has its own lock, never shared with pipeline state, and it is
//! released before any consumer runs: delivery iterates a snapshot.

use crate::events::PipelineId;
use crate::format::AudioBuffer;
use std::sync::{Arc, Mutex, MutexGuard};

/// Receiver of normalized audio buffers
///
/// Called on the engine's streaming thread; implementations must return
/// quickly and must not block.
pub trait BufferConsumer: Send + Sync {
    /// `format` is the tag of the buffer as the engine produced it, before
    /// normalization.
    fn consume_buffer(&self, buffer: &AudioBuffer, pipeline: PipelineId, format: &str);
}

/// Ordered set of consumers
#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: Mutex<Vec<Arc<dyn BufferConsumer>>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn BufferConsumer>>> {
        self.consumers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, consumer: Arc<dyn BufferConsumer>) {
        self.lock().push(consumer);
    }

    /// Remove every registration of `consumer`
    pub fn remove(&self, consumer: &Arc<dyn BufferConsumer>) {
        self.lock().retain(|c| !Arc::ptr_eq(c, consumer));
    }

    pub fn remove_all(&self) {
        self.lock().clear();
    }

    /// Copy of the current consumers, in registration order
    pub fn snapshot(&self) -> Vec<Arc<dyn BufferConsumer>> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Hand `buffer` to every consumer without holding the lock
    pub fn deliver(&self, buffer: &AudioBuffer, pipeline: PipelineId, format: &str) {
        for consumer in self.snapshot() {
            consumer.consume_buffer(buffer, pipeline, format);
        }
    }
}
