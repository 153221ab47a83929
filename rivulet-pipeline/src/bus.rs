//! Engine bus messages and per-pipeline routing
//!
//! The engine posts every notification of a graph on one bus, including
//! messages from individual elements the controller does not care about.
//! `BusDispatcher` keeps the ones relevant to its pipeline and turns them
//! into `BusSignal`s without reordering anything.

use crate::engine::{EngineState, StreamTask};
use crate::metadata::TagList;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Structure name of element messages announcing a redirect
pub const REDIRECT_MESSAGE: &str = "redirect";

/// Field carrying the redirect target
pub const REDIRECT_LOCATION_FIELD: &str = "new-location";

/// Resource error code for a failure to open a device for writing
pub const RESOURCE_ERROR_OPEN_WRITE: i32 = 6;

/// Error category reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    Core,
    Library,
    /// Opening, reading or writing a resource (file, device, network)
    Resource,
    /// Demuxing or decoding the stream
    Stream,
    Other(i32),
}

impl ErrorDomain {
    /// Numeric domain code reported to the caller
    pub fn code(&self) -> i32 {
        match self {
            ErrorDomain::Core => 1,
            ErrorDomain::Library => 2,
            ErrorDomain::Resource => 3,
            ErrorDomain::Stream => 4,
            ErrorDomain::Other(code) => *code,
        }
    }

    /// Errors that may be caused by a bad next track rather than the current one
    pub fn is_resource_or_stream(&self) -> bool {
        matches!(self, ErrorDomain::Resource | ErrorDomain::Stream)
    }
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDomain::Core => f.write_str("core"),
            ErrorDomain::Library => f.write_str("library"),
            ErrorDomain::Resource => f.write_str("resource"),
            ErrorDomain::Stream => f.write_str("stream"),
            ErrorDomain::Other(code) => write!(f, "domain {}", code),
        }
    }
}

/// Error posted by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineError {
    pub domain: ErrorDomain,
    pub code: i32,
    pub message: String,
    /// Engine-internal detail text
    pub debug: String,
}

/// Kind of stream-status notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatusType {
    Create,
    Enter,
    Leave,
    Destroy,
    Start,
    Pause,
    Stop,
}

/// Streaming task attached to a stream-status message
#[derive(Clone)]
pub struct TaskHandle(pub Arc<dyn StreamTask>);

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TaskHandle")
    }
}

/// Element-specific message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementMessage {
    pub structure: String,
    pub fields: HashMap<String, String>,
}

impl ElementMessage {
    /// Redirect notification pointing at `location`
    pub fn redirect(location: &str) -> Self {
        let mut fields = HashMap::new();
        fields.insert(REDIRECT_LOCATION_FIELD.to_string(), location.to_string());
        Self {
            structure: REDIRECT_MESSAGE.to_string(),
            fields,
        }
    }
}

#[derive(Debug, Clone)]
pub enum BusMessageKind {
    Eos,
    Tag(TagList),
    Error(EngineError),
    Element(ElementMessage),
    StateChanged {
        old: EngineState,
        new: EngineState,
        pending: Option<EngineState>,
    },
    /// Queue fill level, 0..=100
    Buffering(i32),
    StreamStatus {
        status: StreamStatusType,
        task: Option<TaskHandle>,
    },
    StreamStart,
    Other(String),
}

/// A message as posted on the bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Name of the posting object
    pub source: String,
    pub kind: BusMessageKind,
}

impl BusMessage {
    pub fn new(source: impl Into<String>, kind: BusMessageKind) -> Self {
        Self {
            source: source.into(),
            kind,
        }
    }
}

/// A message that concerns the owning pipeline
#[derive(Debug)]
pub enum BusSignal<'a> {
    EndOfStream,
    Tags(&'a TagList),
    Error(&'a EngineError),
    Redirect(&'a str),
    StateChanged {
        old: EngineState,
        new: EngineState,
        pending: Option<EngineState>,
    },
    Buffering(i32),
    TaskCreated(&'a TaskHandle),
    StreamStart,
}

/// Filters bus traffic for one pipeline
#[derive(Debug, Clone)]
pub struct BusDispatcher {
    /// Name of the whole graph; only its state changes count
    pipeline_source: String,
    /// Name of the queue stage; only its buffering reports count
    buffering_source: String,
}

impl BusDispatcher {
    pub fn new(pipeline_source: impl Into<String>, buffering_source: impl Into<String>) -> Self {
        Self {
            pipeline_source: pipeline_source.into(),
            buffering_source: buffering_source.into(),
        }
    }

    /// Map a message to a signal, or `None` when it is not for this pipeline
    pub fn route<'a>(&self, msg: &'a BusMessage) -> Option<BusSignal<'a>> {
        match &msg.kind {
            BusMessageKind::Eos => Some(BusSignal::EndOfStream),
            BusMessageKind::Tag(tags) => Some(BusSignal::Tags(tags)),
            BusMessageKind::Error(err) => Some(BusSignal::Error(err)),
            BusMessageKind::Element(element) => {
                if element.structure != REDIRECT_MESSAGE {
                    return None;
                }
                element
                    .fields
                    .get(REDIRECT_LOCATION_FIELD)
                    .map(|location| BusSignal::Redirect(location.as_str()))
            }
            BusMessageKind::StateChanged { old, new, pending } => {
                (msg.source == self.pipeline_source).then_some(BusSignal::StateChanged {
                    old: *old,
                    new: *new,
                    pending: *pending,
                })
            }
            BusMessageKind::Buffering(percent) => {
                (msg.source == self.buffering_source).then_some(BusSignal::Buffering(*percent))
            }
            BusMessageKind::StreamStatus { status, task } => match (status, task) {
                (StreamStatusType::Create, Some(task)) => Some(BusSignal::TaskCreated(task)),
                _ => None,
            },
            BusMessageKind::StreamStart => Some(BusSignal::StreamStart),
            BusMessageKind::Other(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> BusDispatcher {
        BusDispatcher::new("playbin-0", "queue2-1")
    }

    #[test]
    fn test_state_changes_filtered_to_whole_graph() {
        let d = dispatcher();
        let change = BusMessageKind::StateChanged {
            old: EngineState::Ready,
            new: EngineState::Paused,
            pending: None,
        };

        let own = BusMessage::new("playbin-0", change.clone());
        assert!(matches!(
            d.route(&own),
            Some(BusSignal::StateChanged {
                new: EngineState::Paused,
                ..
            })
        ));

        let element = BusMessage::new("volume-3", change);
        assert!(d.route(&element).is_none());
    }

    #[test]
    fn test_buffering_only_from_queue_stage() {
        let d = dispatcher();
        let ours = BusMessage::new("queue2-1", BusMessageKind::Buffering(40));
        assert!(matches!(d.route(&ours), Some(BusSignal::Buffering(40))));

        let internal = BusMessage::new("queue2-9", BusMessageKind::Buffering(40));
        assert!(d.route(&internal).is_none());
    }

    #[test]
    fn test_redirect_element_message() {
        let d = dispatcher();
        let msg = BusMessage::new(
            "mmssrc",
            BusMessageKind::Element(ElementMessage::redirect("mms://other/stream")),
        );
        assert!(matches!(
            d.route(&msg),
            Some(BusSignal::Redirect("mms://other/stream"))
        ));

        let unrelated = BusMessage::new(
            "level",
            BusMessageKind::Element(ElementMessage {
                structure: "level".to_string(),
                fields: HashMap::new(),
            }),
        );
        assert!(d.route(&unrelated).is_none());
    }

    #[test]
    fn test_stream_status_without_task_dropped() {
        let d = dispatcher();
        let msg = BusMessage::new(
            "src",
            BusMessageKind::StreamStatus {
                status: StreamStatusType::Create,
                task: None,
            },
        );
        assert!(d.route(&msg).is_none());
    }

    #[test]
    fn test_error_domain_codes() {
        assert_eq!(ErrorDomain::Resource.code(), 3);
        assert_eq!(ErrorDomain::Other(42).code(), 42);
        assert!(ErrorDomain::Stream.is_resource_or_stream());
        assert!(!ErrorDomain::Core.is_resource_or_stream());
    }
}
