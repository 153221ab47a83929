//! Pipeline bound to the simulated engine

use rivulet_pipeline::bus::BusMessageKind;
use rivulet_pipeline::engine::sim::{SimElement, SimEngine, SimPad, SimPlayer};
use rivulet_pipeline::engine::{EngineState, StateChangeReturn};
use rivulet_pipeline::timeline::Segment;
use rivulet_pipeline::{EventBus, Pipeline, PipelineConfig, PipelineEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const TEST_URL: &str = "file:///music/album.flac";

pub struct Harness {
    pub engine: SimEngine,
    pub pipeline: Pipeline,
    pub player: Arc<SimPlayer>,
    pub events: broadcast::Receiver<PipelineEvent>,
}

impl Harness {
    /// Unbound pipeline with `config`
    pub fn unbound(config: PipelineConfig) -> Self {
        let engine = SimEngine::new();
        let bus = EventBus::default();
        let events = bus.subscribe();
        let pipeline = Pipeline::new(Arc::new(engine.clone()), config, bus).unwrap();
        let player = engine.last_player().unwrap();
        Self {
            engine,
            pipeline,
            player,
            events,
        }
    }

    /// Pipeline bound to `TEST_URL` with default settings
    pub fn bound(end_offset: i64) -> Self {
        Self::bound_with(PipelineConfig::default(), end_offset)
    }

    pub fn bound_with(config: PipelineConfig, end_offset: i64) -> Self {
        let harness = Self::unbound(config);
        harness
            .pipeline
            .init_from_url(TEST_URL, TEST_URL, end_offset)
            .unwrap();
        harness
    }

    pub async fn set_state(&self, state: EngineState) {
        assert_eq!(
            self.pipeline.set_state(state).await,
            StateChangeReturn::Success
        );
    }

    /// Announce a decoded stream with a segment starting at 0
    pub fn connect_pad(&self) -> Arc<SimPad> {
        let pad = self.player.emit_pad_added();
        pad.push_segment(Segment::starting_at(0));
        pad
    }

    /// Bound, connected and playing
    pub async fn playing(end_offset: i64) -> (Self, Arc<SimPad>) {
        let harness = Self::bound(end_offset);
        let pad = harness.connect_pad();
        harness.set_state(EngineState::Playing).await;
        harness.pipeline.sync().await;
        (harness, pad)
    }

    pub fn queue(&self) -> Arc<SimElement> {
        self.single("queue2")
    }

    pub fn single(&self, factory: &str) -> Arc<SimElement> {
        let elements = self.engine.elements_of(factory);
        assert_eq!(elements.len(), 1, "expected one {} element", factory);
        elements[0].clone()
    }

    pub fn post(&self, kind: BusMessageKind) {
        self.player.post_own(kind);
    }

    /// Events received so far
    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Poll `condition` until it holds or two seconds passed
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
