//! Upstream streaming engine abstraction
//!
//! The controller never decodes or renders audio itself. It drives an engine
//! that supplies elements (processing stages), a player (the source/decoder
//! graph that produces pads) and an asynchronous bus. Every creation call is
//! fallible and returns `None` when the engine cannot provide the element.
//!
//! All callbacks registered here may be invoked from engine threads. They are
//! typed closures; implementations must not hold internal locks while calling
//! them.

pub mod sim;

use crate::bus::BusMessage;
use crate::format::AudioBuffer;
use crate::timeline::Segment;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Engine-level state of a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineState {
    Null,
    Ready,
    Paused,
    Playing,
}

impl EngineState {
    /// Intermediate states visited on the way from `self` to `target`,
    /// including the target itself
    pub fn path_to(self, target: EngineState) -> Vec<EngineState> {
        const ORDER: [EngineState; 4] = [
            EngineState::Null,
            EngineState::Ready,
            EngineState::Paused,
            EngineState::Playing,
        ];
        let from = ORDER.iter().position(|s| *s == self).unwrap_or(0);
        let to = ORDER.iter().position(|s| *s == target).unwrap_or(0);
        if from <= to {
            ORDER[from + 1..=to].to_vec()
        } else {
            ORDER[to..from].iter().rev().copied().collect()
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Null => "NULL",
            EngineState::Ready => "READY",
            EngineState::Paused => "PAUSED",
            EngineState::Playing => "PLAYING",
        };
        f.write_str(name)
    }
}

/// Outcome of a state change request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeReturn {
    Success,
    /// The change continues in the background
    Async,
    /// Live source; no preroll possible in paused
    NoPreroll,
    Failure,
}

/// Typed element property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Float(f32),
    Str(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
}

impl PropValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropValue::Double(v) => Some(*v),
            PropValue::Float(v) => Some(*v as f64),
            PropValue::Int(v) => Some(*v as f64),
            PropValue::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Media type restriction on a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caps {
    pub media_type: String,
    pub channels: Option<u32>,
}

impl Caps {
    /// Raw audio, optionally with a fixed channel count
    pub fn raw_audio(channels: Option<u32>) -> Self {
        Self {
            media_type: "audio/x-raw".to_string(),
            channels,
        }
    }
}

/// Serialized events travelling with the data stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Segment(Segment),
    FlushStart,
    FlushStop,
    Eos,
    Other(String),
}

/// Handle of an installed probe
pub type ProbeId = u64;

/// Handle of a player callback subscription
pub type SubscriptionId = u64;

/// Called for every buffer leaving an element
pub type BufferProbe = Box<dyn Fn(&AudioBuffer) + Send + Sync>;

/// Called for every stream event leaving an element
pub type EventProbe = Box<dyn Fn(&StreamEvent) + Send + Sync>;

/// One processing stage
pub trait ElementOps: Send + Sync {
    /// Unique instance name
    fn name(&self) -> &str;

    /// Factory the element was created from
    fn factory(&self) -> &str;

    fn has_property(&self, name: &str) -> bool;

    /// Set a property; false when the element has no such property
    fn set_property(&self, name: &str, value: PropValue) -> bool;

    /// Set a property of the child object at `index` (equalizer bands)
    fn set_child_property(&self, index: usize, name: &str, value: PropValue) -> bool;

    /// Link this element's output to `downstream`, optionally restricted by caps
    fn link(&self, downstream: &dyn ElementOps, caps: Option<&Caps>) -> bool;

    /// Observe buffers on the output side
    fn add_buffer_probe(&self, probe: BufferProbe) -> ProbeId;

    /// Observe stream events on the output side
    fn add_event_probe(&self, probe: EventProbe) -> ProbeId;

    fn remove_probe(&self, id: ProbeId);

    /// Whether a pad currently feeds this element's input
    fn is_input_linked(&self) -> bool;

    /// Detach the pad feeding this element's input; false when none did
    fn unlink_input(&self) -> bool;

    /// Push an end-of-stream event into the element's input
    fn send_eos(&self) -> bool;

    /// Give the element back to the engine; no further calls are made
    fn release(&self);
}

/// Shared handle to a stage
pub type Element = Arc<dyn ElementOps>;

/// What a pad probe observed
#[derive(Debug, Clone, PartialEq)]
pub enum PadProbe {
    Buffer {
        timestamp: Option<u64>,
        duration: Option<u64>,
    },
    Segment(Segment),
    FlushStart,
}

/// Called for buffers, downstream events and flushes on a pad
pub type PadProbeFn = Box<dyn Fn(&dyn Pad, &PadProbe) + Send + Sync>;

/// Output pad of the player, created per decoded stream
pub trait Pad: Send + Sync {
    fn name(&self) -> &str;

    /// Running-time offset applied to everything leaving the pad
    fn offset(&self) -> i64;

    fn set_offset(&self, offset: i64);

    /// Link to the input of `element`
    ///
    /// Fails when another pad already feeds that input; unlink it first.
    fn link_to(&self, element: &dyn ElementOps) -> bool;

    fn add_probe(&self, probe: PadProbeFn) -> ProbeId;
}

/// Thread about to run a streaming task
pub trait ThreadControl {
    /// Ask the OS for real-time scheduling at `priority`
    fn request_realtime_priority(&self, priority: i32) -> bool;
}

/// Hook run on every thread that enters a streaming task
pub type TaskEnterHook = Box<dyn Fn(&dyn ThreadControl) + Send + Sync>;

/// Streaming task announced through a stream-status message
pub trait StreamTask: Send + Sync {
    fn set_enter_hook(&self, hook: TaskEnterHook);
}

pub type PadAddedFn = Box<dyn Fn(Arc<dyn Pad>) + Send + Sync>;
pub type SourceSetupFn = Box<dyn Fn(&dyn ElementOps) + Send + Sync>;
pub type AboutToFinishFn = Box<dyn Fn() + Send + Sync>;
pub type BusMessageFn = Box<dyn Fn(&BusMessage) + Send + Sync>;

/// Callbacks registered on a player
///
/// Bus messages are delivered synchronously, in posting order, from whichever
/// thread posted them.
pub struct PlayerCallbacks {
    pub on_pad_added: PadAddedFn,
    pub on_source_setup: SourceSetupFn,
    pub on_about_to_finish: AboutToFinishFn,
    pub on_bus_message: BusMessageFn,
}

/// Source and decoder graph
pub trait Player: Send + Sync {
    fn name(&self) -> &str;

    fn set_uri(&self, uri: &str);

    fn uri(&self) -> String;

    /// Let the player apply volume in software
    fn set_soft_volume(&self, enabled: bool);

    /// Route decoded audio into `sink` (the input of the processing graph)
    fn set_audio_sink(&self, sink: &Element);

    /// Change state; blocks until the engine accepted or refused the change
    fn set_state(&self, state: EngineState) -> StateChangeReturn;

    /// Current state, `None` when it cannot be determined in time
    fn current_state(&self) -> Option<EngineState>;

    /// Flushing seek to `position` nanoseconds
    fn seek(&self, position: i64) -> bool;

    fn query_position(&self) -> Option<i64>;

    fn query_duration(&self) -> Option<i64>;

    fn connect(&self, callbacks: PlayerCallbacks) -> SubscriptionId;

    /// Remove a subscription; no callback of it starts after this returns
    fn disconnect(&self, id: SubscriptionId);
}

/// Element and player construction
pub trait EngineBackend: Send + Sync {
    fn create_element(&self, factory: &str) -> Option<Element>;

    fn create_player(&self) -> Option<Arc<dyn Player>>;
}
