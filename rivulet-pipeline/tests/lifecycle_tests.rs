//! Integration tests for pipeline binding, lifecycle, seeking and teardown
//!
//! Every test drives a real `Pipeline` against the simulated engine.

mod helpers;

use helpers::{Harness, TEST_URL};
use rivulet_pipeline::engine::sim::SimEngine;
use rivulet_pipeline::engine::{ElementOps, EngineState, StateChangeReturn};
use rivulet_pipeline::fader::FadeDirection;
use rivulet_pipeline::{Error, EventBus, Pipeline, PipelineConfig, PipelineState};
use rivulet_common::FadeCurve;
use std::sync::Arc;
use std::time::Duration;

const SECOND: i64 = 1_000_000_000;

#[tokio::test]
async fn test_init_binds_player_to_graph() {
    let harness = Harness::bound(3 * SECOND);

    assert_eq!(harness.player.uri_history(), vec![TEST_URL.to_string()]);
    assert!(harness.player.soft_volume());
    assert_eq!(
        harness.player.audio_sink().as_deref(),
        Some(harness.queue().name())
    );
    assert!(harness.player.is_connected());

    assert_eq!(harness.pipeline.url(), TEST_URL);
    assert_eq!(harness.pipeline.original_url(), TEST_URL);
    assert_eq!(harness.pipeline.end_offset(), 3 * SECOND);
    assert!(!harness.pipeline.is_initialized());
}

#[tokio::test]
async fn test_soft_volume_follows_volume_setting() {
    let config = PipelineConfig {
        volume_enabled: false,
        ..PipelineConfig::default()
    };
    let harness = Harness::bound_with(config, 0);

    assert!(!harness.player.soft_volume());
    assert!(harness.engine.elements_of("volume").is_empty());
}

#[tokio::test]
async fn test_lifecycle_transitions() {
    let harness = Harness::unbound(PipelineConfig::default());
    assert_eq!(harness.pipeline.lifecycle(), PipelineState::Unconnected);

    harness
        .pipeline
        .init_from_url(TEST_URL, TEST_URL, 0)
        .unwrap();
    assert_eq!(harness.pipeline.lifecycle(), PipelineState::Connected);

    harness.connect_pad();
    assert_eq!(harness.pipeline.lifecycle(), PipelineState::Connected);

    harness.set_state(EngineState::Paused).await;
    assert_eq!(harness.pipeline.lifecycle(), PipelineState::Paused);
    assert!(harness.pipeline.is_initialized());

    harness.set_state(EngineState::Playing).await;
    assert_eq!(harness.pipeline.lifecycle(), PipelineState::Playing);
    assert_eq!(harness.pipeline.state(), EngineState::Playing);

    // Dropping below paused requires a new preroll before seeking
    harness.set_state(EngineState::Ready).await;
    assert_eq!(harness.pipeline.lifecycle(), PipelineState::Connected);
    assert!(!harness.pipeline.is_initialized());

    harness.pipeline.shutdown();
    assert_eq!(harness.pipeline.lifecycle(), PipelineState::Finished);
}

#[tokio::test]
async fn test_second_init_rejected() {
    let harness = Harness::bound(0);

    let result = harness
        .pipeline
        .init_from_url("file:///other.flac", "file:///other.flac", 0);
    assert!(matches!(result, Err(Error::InvalidState(_))));
    assert_eq!(harness.pipeline.url(), TEST_URL);
    assert_eq!(harness.engine.elements_of("queue2").len(), 1);
}

#[tokio::test]
async fn test_init_after_shutdown_rejected() {
    let harness = Harness::unbound(PipelineConfig::default());
    harness.pipeline.shutdown();

    let result = harness.pipeline.init_from_url(TEST_URL, TEST_URL, 0);
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_build_failure_releases_created_elements() {
    let harness = Harness::unbound(PipelineConfig::default());
    harness.engine.fail_factory("audioconvert");

    let result = harness.pipeline.init_from_url(TEST_URL, TEST_URL, 0);
    assert!(matches!(result, Err(Error::GraphBuildFailed(_))));

    let elements = harness.engine.elements();
    assert!(!elements.is_empty());
    assert!(elements.iter().all(|element| element.is_released()));
    assert!(!harness.player.is_connected());
}

#[tokio::test]
async fn test_missing_player_fails_construction() {
    let engine = SimEngine::new();
    engine.fail_player();

    let result = Pipeline::new(
        Arc::new(engine),
        PipelineConfig::default(),
        EventBus::default(),
    );
    assert!(matches!(result, Err(Error::GraphBuildFailed(_))));
}

#[test]
fn test_construction_requires_runtime() {
    let result = Pipeline::new(
        Arc::new(SimEngine::new()),
        PipelineConfig::default(),
        EventBus::default(),
    );
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_seek_before_playing_is_deferred() {
    let harness = Harness::bound(0);
    let position = 5 * SECOND;

    assert!(harness.pipeline.seek(position));
    assert!(harness.player.seeks().is_empty());

    harness.connect_pad();
    assert!(harness.player.seeks().is_empty());

    harness.set_state(EngineState::Playing).await;
    harness.pipeline.sync().await;
    assert_eq!(harness.player.seeks(), vec![position]);
    assert_eq!(harness.pipeline.position(), position);
}

#[tokio::test]
async fn test_bound_pipeline_is_connected() {
    let harness = Harness::bound(0);
    assert_eq!(harness.pipeline.lifecycle(), PipelineState::Connected);
    assert!(!harness.pipeline.is_initialized());
}

#[tokio::test]
async fn test_deferred_seek_applied_at_first_preroll() {
    let harness = Harness::bound(0);
    let position = 2 * SECOND;

    harness.pipeline.seek(position);
    assert!(harness.player.seeks().is_empty());

    // Bound to the graph, so the preroll alone completes the seek
    harness.set_state(EngineState::Paused).await;
    harness.pipeline.sync().await;
    assert_eq!(harness.player.seeks(), vec![position]);

    // Nothing left pending for the decoded stream
    harness.connect_pad();
    harness.pipeline.sync().await;
    assert_eq!(harness.player.seeks(), vec![position]);
}

#[tokio::test]
async fn test_latest_deferred_seek_wins() {
    let harness = Harness::bound(0);

    harness.pipeline.seek(SECOND);
    harness.pipeline.seek(4 * SECOND);
    harness.connect_pad();
    harness.set_state(EngineState::Paused).await;
    harness.pipeline.sync().await;

    assert_eq!(harness.player.seeks(), vec![4 * SECOND]);
}

#[tokio::test]
async fn test_seek_while_playing_is_immediate() {
    let (harness, _pad) = Harness::playing(0).await;

    assert!(harness.pipeline.seek(2 * SECOND));
    assert_eq!(harness.player.seeks(), vec![2 * SECOND]);
    assert_eq!(harness.pipeline.position(), 2 * SECOND);
}

#[tokio::test]
async fn test_position_and_length() {
    let harness = Harness::bound(0);
    harness.player.set_position(Some(7 * SECOND));
    // Not queried before the first preroll
    assert_eq!(harness.pipeline.position(), 0);

    harness.connect_pad();
    harness.set_state(EngineState::Playing).await;
    assert_eq!(harness.pipeline.position(), 7 * SECOND);

    // Unknown position keeps the last known one
    harness.player.set_position(None);
    assert_eq!(harness.pipeline.position(), 7 * SECOND);

    assert_eq!(harness.pipeline.length(), 0);
    harness.player.set_duration(Some(180 * SECOND));
    assert_eq!(harness.pipeline.length(), 180 * SECOND);
}

#[tokio::test]
async fn test_state_change_failure_reported() {
    let harness = Harness::bound(0);
    harness.player.fail_state_changes(true);

    assert_eq!(
        harness.pipeline.set_state(EngineState::Playing).await,
        StateChangeReturn::Failure
    );
    assert!(!harness.pipeline.is_initialized());
}

#[tokio::test]
async fn test_shutdown_disconnects_stops_and_releases() {
    let (mut harness, pad) = Harness::playing(0).await;
    harness.drain();

    harness.pipeline.shutdown();

    assert!(!harness.player.is_connected());
    assert_eq!(harness.player.state_requests().last(), Some(&EngineState::Null));
    assert_eq!(harness.pipeline.state(), EngineState::Null);
    assert!(harness
        .engine
        .elements()
        .iter()
        .all(|element| element.is_released()));
    assert_eq!(harness.queue().buffer_probe_count(), 0);
    assert_eq!(harness.queue().event_probe_count(), 0);
    assert_eq!(harness.pipeline.lifecycle(), PipelineState::Finished);

    // Nothing reaches the caller any more
    pad.push_buffer(&helpers::s32_buffer(0, 1));
    harness.player.about_to_finish();
    harness.pipeline.start_fader(
        Duration::ZERO,
        FadeDirection::Forward,
        FadeCurve::Linear,
        false,
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(harness.drain().is_empty());

    assert_eq!(
        harness.pipeline.set_state(EngineState::Playing).await,
        StateChangeReturn::Failure
    );
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let harness = Harness::bound(0);
    harness.pipeline.shutdown();
    harness.pipeline.shutdown();

    let nulls = harness
        .player
        .state_requests()
        .into_iter()
        .filter(|state| *state == EngineState::Null)
        .count();
    assert_eq!(nulls, 1);
}

#[tokio::test]
async fn test_drop_tears_down() {
    let harness = Harness::bound(0);
    let Harness {
        engine,
        pipeline,
        player,
        ..
    } = harness;

    drop(pipeline);
    assert!(!player.is_connected());
    assert!(engine.elements().iter().all(|element| element.is_released()));
}
