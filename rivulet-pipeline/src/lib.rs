//! # Rivulet Pipeline Controller (rivulet-pipeline)
//!
//! Playback pipeline control on top of a streaming media engine.
//!
//! **Purpose:** Build the processing graph for a track (buffering queue,
//! replaygain, equalizer, balance, volume, output sink), drive it through its
//! lifecycle, hand over to a staged next track without a gap, ramp the volume
//! for crossfades and pauses, and report everything the engine says as typed
//! events.
//!
//! **Architecture:** The engine sits behind the traits in [`engine`]; an
//! in-process simulation ([`engine::sim`]) implements them for tests and the
//! `rivulet-sim` binary. Engine callbacks run on engine threads, state changes
//! on a per-pipeline thread, and commands plus the fader on a tokio task.

pub mod bus;
pub mod config;
pub mod consumers;
pub mod engine;
pub mod error;
pub mod events;
pub mod factory;
pub mod fader;
pub mod format;
pub mod graph;
pub mod metadata;
pub mod pipeline;
pub mod timeline;
pub mod url;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use events::{EventBus, PipelineEvent, PipelineId};
pub use factory::PipelineFactory;
pub use pipeline::{Pipeline, PipelineState};
