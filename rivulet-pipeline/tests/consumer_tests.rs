//! Integration tests for buffer consumers

mod helpers;

use helpers::{s16_buffer, s32_buffer, Harness, RecordingConsumer, BUFFER_NS};
use rivulet_pipeline::consumers::BufferConsumer;
use rivulet_pipeline::format::AudioBuffer;
use std::sync::Arc;

fn attach(harness: &Harness) -> (Arc<RecordingConsumer>, Arc<dyn BufferConsumer>) {
    let consumer = Arc::new(RecordingConsumer::default());
    let handle: Arc<dyn BufferConsumer> = consumer.clone();
    harness.pipeline.add_buffer_consumer(handle.clone());
    (consumer, handle)
}

#[tokio::test]
async fn test_consumers_get_16_bit_audio() {
    let harness = Harness::bound(0);
    let (consumer, _) = attach(&harness);
    let pad = harness.connect_pad();

    pad.push_buffer(&s32_buffer(BUFFER_NS, 0x4000_0000));

    let received = consumer.received();
    assert_eq!(received.len(), 1);
    let (buffer, pipeline, format) = &received[0];
    assert_eq!(*pipeline, harness.pipeline.id());
    // Tagged with the format the engine produced
    assert_eq!(format, "S32LE");
    assert_eq!(buffer.format, "S16LE");
    assert_eq!(buffer.timestamp, Some(BUFFER_NS));
    assert_eq!(buffer.duration, Some(BUFFER_NS));
    assert!(buffer.samples_s16().iter().all(|sample| *sample == 0x4000));
}

#[tokio::test]
async fn test_16_bit_audio_passed_unchanged() {
    let harness = Harness::bound(0);
    let (consumer, _) = attach(&harness);
    let pad = harness.connect_pad();

    let original = s16_buffer(0, -1234);
    pad.push_buffer(&original);

    let received = consumer.received();
    assert_eq!(received[0].0, original);
    assert_eq!(received[0].2, "S16LE");
}

#[tokio::test]
async fn test_unsupported_format_passed_through() {
    let harness = Harness::bound(0);
    let (consumer, _) = attach(&harness);
    let pad = harness.connect_pad();

    let odd = AudioBuffer {
        data: vec![0x80; 64],
        format: "U8".to_string(),
        channels: 2,
        rate: 8000,
        timestamp: Some(0),
        duration: Some(4_000_000),
    };
    pad.push_buffer(&odd);
    pad.push_buffer(&odd);

    let received = consumer.received();
    assert_eq!(received.len(), 2);
    assert_eq!(received[1].0, odd);
    assert_eq!(received[1].2, "U8");
}

#[tokio::test]
async fn test_every_consumer_served_in_order() {
    let harness = Harness::bound(0);
    let (first, _) = attach(&harness);
    let (second, _) = attach(&harness);
    let pad = harness.connect_pad();

    pad.push_buffer(&s32_buffer(0, 1 << 20));
    pad.push_buffer(&s32_buffer(BUFFER_NS, 1 << 20));

    assert_eq!(first.count(), 2);
    assert_eq!(second.count(), 2);
}

#[tokio::test]
async fn test_removed_consumer_not_called() {
    let harness = Harness::bound(0);
    let (kept, _) = attach(&harness);
    let (removed, handle) = attach(&harness);
    let pad = harness.connect_pad();

    pad.push_buffer(&s32_buffer(0, 1));
    harness.pipeline.remove_buffer_consumer(&handle);
    pad.push_buffer(&s32_buffer(BUFFER_NS, 1));

    assert_eq!(kept.count(), 2);
    assert_eq!(removed.count(), 1);

    harness.pipeline.remove_all_buffer_consumers();
    pad.push_buffer(&s32_buffer(2 * BUFFER_NS, 1));
    assert_eq!(kept.count(), 2);
}

#[tokio::test]
async fn test_consumers_see_audio_before_volume() {
    let harness = Harness::bound(0);
    let (consumer, _) = attach(&harness);
    let pad = harness.connect_pad();
    harness.pipeline.set_volume(10);

    pad.push_buffer(&s16_buffer(0, 1000));

    let received = consumer.received();
    assert!(received[0].0.samples_s16().iter().all(|sample| *sample == 1000));
}
