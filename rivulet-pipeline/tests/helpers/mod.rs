//! Test helper modules for rivulet-pipeline integration tests
//!
//! Provides reusable test infrastructure components:
//! - Harness: a pipeline bound to the simulated engine plus its event stream
//! - Audio: synthetic buffers and a recording consumer

#![allow(dead_code)]

pub mod audio;
pub mod harness;

// Re-export commonly used types
pub use audio::{s16_buffer, s32_buffer, RecordingConsumer, BUFFER_NS};
pub use harness::{wait_until, Harness, TEST_URL};
