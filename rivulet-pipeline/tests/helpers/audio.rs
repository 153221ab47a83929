//! Synthetic audio for driving the simulated engine

use rivulet_pipeline::consumers::BufferConsumer;
use rivulet_pipeline::format::AudioBuffer;
use rivulet_pipeline::PipelineId;
use std::sync::Mutex;

/// Length of every generated buffer (40 ms)
pub const BUFFER_NS: u64 = 40_000_000;

const RATE: u32 = 1000;
const CHANNELS: u32 = 2;
/// Frames in one 40 ms buffer at the test rate
const FRAMES: usize = 40;

/// 40 ms of 32-bit samples, all equal to `value`, starting at `timestamp`
pub fn s32_buffer(timestamp: u64, value: i32) -> AudioBuffer {
    let data = std::iter::repeat(value.to_le_bytes())
        .take(FRAMES * CHANNELS as usize)
        .flatten()
        .collect();
    AudioBuffer {
        data,
        format: "S32LE".to_string(),
        channels: CHANNELS,
        rate: RATE,
        timestamp: Some(timestamp),
        duration: Some(BUFFER_NS),
    }
}

/// 40 ms of 16-bit samples, all equal to `value`, starting at `timestamp`
pub fn s16_buffer(timestamp: u64, value: i16) -> AudioBuffer {
    let samples = vec![value; FRAMES * CHANNELS as usize];
    AudioBuffer::from_s16(&samples, CHANNELS, RATE).with_timing(Some(timestamp), Some(BUFFER_NS))
}

/// Consumer remembering everything it was handed
#[derive(Default)]
pub struct RecordingConsumer {
    received: Mutex<Vec<(AudioBuffer, PipelineId, String)>>,
}

impl RecordingConsumer {
    pub fn received(&self) -> Vec<(AudioBuffer, PipelineId, String)> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

impl BufferConsumer for RecordingConsumer {
    fn consume_buffer(&self, buffer: &AudioBuffer, pipeline: PipelineId, format: &str) {
        self.received
            .lock()
            .unwrap()
            .push((buffer.clone(), pipeline, format.to_string()));
    }
}
