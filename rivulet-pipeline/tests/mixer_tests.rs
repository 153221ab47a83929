//! Integration tests for volume, stereo balance and equalizer control

mod helpers;

use helpers::Harness;
use rivulet_pipeline::config::{EqualizerConfig, EQ_BAND_COUNT};
use rivulet_pipeline::engine::PropValue;
use rivulet_pipeline::PipelineConfig;

fn double(value: Option<PropValue>) -> f64 {
    value.and_then(|value| value.as_f64()).unwrap()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Equalizer on, no volume stage, so the only volume element is the preamp
fn equalizer_config(preamp: i32, band_gains: [i32; EQ_BAND_COUNT]) -> PipelineConfig {
    PipelineConfig {
        volume_enabled: false,
        equalizer: EqualizerConfig {
            enabled: true,
            preamp,
            band_gains,
        },
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn test_volume_percent_and_modifier_combine() {
    let harness = Harness::bound(0);
    let volume = harness.single("volume");
    assert!(close(double(volume.property("volume")), 1.0));

    harness.pipeline.set_volume(50);
    assert!(close(double(volume.property("volume")), 0.5));

    harness.pipeline.set_volume_modifier(0.5);
    assert!(close(double(volume.property("volume")), 0.25));

    harness.pipeline.set_volume(100);
    assert!(close(double(volume.property("volume")), 0.5));
}

#[tokio::test]
async fn test_volume_without_volume_stage_is_ignored() {
    let config = PipelineConfig {
        volume_enabled: false,
        ..PipelineConfig::default()
    };
    let harness = Harness::bound_with(config, 0);

    harness.pipeline.set_volume(30);
    harness.pipeline.set_volume_modifier(0.1);
    assert!(harness.engine.elements_of("volume").is_empty());
}

#[tokio::test]
async fn test_initial_balance_applied() {
    let config = PipelineConfig {
        stereo_balancer_enabled: true,
        stereo_balance: 0.3,
        ..PipelineConfig::default()
    };
    let harness = Harness::bound_with(config, 0);

    let panorama = harness.single("audiopanorama");
    assert_eq!(panorama.property("panorama"), Some(PropValue::Float(0.3)));
}

#[tokio::test]
async fn test_disabling_balancer_centers_balance() {
    let config = PipelineConfig {
        stereo_balancer_enabled: true,
        ..PipelineConfig::default()
    };
    let harness = Harness::bound_with(config, 0);
    let panorama = harness.single("audiopanorama");

    harness.pipeline.set_stereo_balance(-0.5);
    assert_eq!(panorama.property("panorama"), Some(PropValue::Float(-0.5)));

    harness.pipeline.set_stereo_balancer_enabled(false);
    assert_eq!(panorama.property("panorama"), Some(PropValue::Float(0.0)));
}

#[tokio::test]
async fn test_balance_ignored_when_not_configured() {
    let harness = Harness::bound(0);

    harness.pipeline.set_stereo_balance(0.8);
    assert!(harness.engine.elements_of("audiopanorama").is_empty());
}

#[tokio::test]
async fn test_equalizer_gains_scaled() {
    let mut gains = [0; EQ_BAND_COUNT];
    gains[0] = -50;
    gains[9] = 100;
    let harness = Harness::bound_with(equalizer_config(0, gains), 0);
    let bands = harness.single("equalizer-nbands");
    let preamp = harness.single("volume");

    // Band 0 is the low dummy band
    assert!(close(double(bands.child_property(1, "gain")), -12.0));
    assert!(close(double(bands.child_property(10, "gain")), 12.0));
    assert!(close(double(bands.child_property(5, "gain")), 0.0));
    assert!(close(double(preamp.property("volume")), 1.0));

    harness.pipeline.set_equalizer_params(50, &[10; EQ_BAND_COUNT]);
    assert!(close(double(bands.child_property(1, "gain")), 1.2));
    assert!(close(double(preamp.property("volume")), 1.5));
}

#[tokio::test]
async fn test_disabled_equalizer_is_flat() {
    let harness = Harness::bound_with(equalizer_config(-100, [40; EQ_BAND_COUNT]), 0);
    let bands = harness.single("equalizer-nbands");
    let preamp = harness.single("volume");
    assert!(close(double(preamp.property("volume")), 0.0));

    harness.pipeline.set_equalizer_enabled(false);
    for band in 1..=EQ_BAND_COUNT {
        assert!(close(double(bands.child_property(band, "gain")), 0.0));
    }
    assert!(close(double(preamp.property("volume")), 1.0));

    // Gains survive and come back on re-enable
    harness.pipeline.set_equalizer_enabled(true);
    assert!(close(double(bands.child_property(3, "gain")), 4.8));
}
