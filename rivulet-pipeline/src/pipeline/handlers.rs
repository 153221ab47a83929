//! Engine callbacks
//!
//! Everything in here runs on engine threads: the streaming thread for probes
//! and pad notifications, whichever thread posted a message for the bus.
//! Handlers take the narrowest lock they need and never call into the engine
//! or emit events while holding one.

use super::worker::Command;
use super::{lock, Shared};
use crate::bus::{BusSignal, EngineError, ErrorDomain, TaskHandle, RESOURCE_ERROR_OPEN_WRITE};
use crate::engine::{ElementOps, EngineState, Pad, PadProbe, PropValue, StreamEvent, ThreadControl};
use crate::events::PipelineEvent;
use crate::format::AudioBuffer;
use crate::metadata::{MetaBundle, TagList};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Debug text of the error some sources post together with a redirect
pub const REDIRECT_NOT_HANDLED: &str =
    "A redirect message was posted on the bus and should have been handled by the application.";

/// Status text of a DirectSound sink reporting success as an error
pub const DIRECTSOUND_STATUS_OK: &str =
    "IDirectSoundBuffer_GetStatus The operation completed successfully";

/// Scheduling priority requested for streaming threads on macOS
const STREAMING_THREAD_PRIORITY: i32 = 99;

/// DirectSound sinks report a successful status query as an open-write error
pub fn is_spurious_sink_error(err: &EngineError) -> bool {
    err.domain == ErrorDomain::Resource
        && err.code == RESOURCE_ERROR_OPEN_WRITE
        && err.message.contains(DIRECTSOUND_STATUS_OK)
}

impl Shared {
    /// A decoded stream appeared on the player
    ///
    /// The pad is linked into the graph with an offset equal to the running
    /// time reached by the previous stream, so the new stream continues where
    /// the old one stopped.
    pub(crate) fn on_pad_added(self: &Arc<Self>, pad: Arc<dyn Pad>) {
        let input = lock(&self.graph).as_ref().map(|graph| graph.input().clone());
        let Some(input) = input else {
            warn!("Pipeline {}: pad {} added without a graph", self.id, pad.name());
            return;
        };

        if input.is_input_linked() {
            warn!(
                "Pipeline {}: {} is already linked, unlinking old pad",
                self.id,
                input.name()
            );
            input.unlink_input();
        }

        if !pad.link_to(input.as_ref()) {
            error!("Pipeline {}: cannot link {} to {}", self.id, pad.name(), input.name());
            return;
        }

        let running_time = lock(&self.timeline).running_time();
        pad.set_offset(running_time as i64);
        debug!(
            "Pipeline {}: linked {} with offset {}",
            self.id,
            pad.name(),
            running_time
        );

        let weak = Arc::downgrade(self);
        pad.add_probe(Box::new(move |pad: &dyn Pad, info: &PadProbe| {
            if let Some(shared) = weak.upgrade() {
                shared.on_pad_probe(pad, info);
            }
        }));

        let pending = {
            let mut control = lock(&self.control);
            control.connected = true;
            control.pending_seek.filter(|_| control.initialized)
        };
        if let Some(position) = pending {
            self.send(Command::Seek(position));
        }
    }

    /// Player output, before the graph
    pub(crate) fn on_pad_probe(&self, pad: &dyn Pad, info: &PadProbe) {
        match info {
            PadProbe::Buffer {
                timestamp,
                duration,
            } => lock(&self.timeline).advance(*timestamp, *duration),
            PadProbe::Segment(segment) => lock(&self.timeline).record_segment(*segment),
            PadProbe::FlushStart => {
                pad.set_offset(0);
                lock(&self.timeline).flush();
            }
        }
    }

    /// Stream events leaving the queue (or the replaygain stage)
    pub(crate) fn on_stream_event(&self, event: &StreamEvent) {
        if let StreamEvent::Segment(segment) = event {
            debug!("Pipeline {}: segment starting at {}", self.id, segment.start);
            lock(&self.timeline).record_segment_start(segment.start);
        }
    }

    /// Buffers leaving the queue, before any gain stage
    pub(crate) fn on_buffer(&self, buffer: &AudioBuffer) {
        let start = lock(&self.timeline).buffer_start(buffer.timestamp);
        let end = start + buffer.duration.unwrap_or(0) as i64;

        let converted = self.converter.process(buffer);
        self.consumers.deliver(&converted, self.id, &buffer.format);

        let has_successor = {
            let mut control = lock(&self.control);
            let end_offset = control.current.end_offset;
            if end_offset <= 0 || end <= end_offset {
                return;
            }

            let continues_same_stream = control.has_next_valid_url()
                && control.next.as_ref().is_some_and(|next| {
                    next.url == control.current.url && next.begin_offset == end_offset
                });
            if continues_same_stream {
                // Next section of the same file: keep playing, only move the end
                if let Some(next) = control.next.take() {
                    control.current.end_offset = next.end_offset;
                }
                // The caller seeks to the start of the section; we are already there
                control.ignore_next_seek = true;
            }
            continues_same_stream
        };

        if has_successor {
            debug!("Pipeline {}: advancing to the next section", self.id);
        }
        self.emit(PipelineEvent::EndOfStream {
            id: self.id,
            has_successor,
        });
    }

    /// The player created its source element
    pub(crate) fn on_source_setup(&self, source: &dyn ElementOps) {
        let device = lock(&self.control).source_device.clone();
        if let Some(device) = device.filter(|device| !device.is_empty()) {
            if source.has_property("device") {
                debug!("Pipeline {}: source device {}", self.id, device);
                source.set_property("device", PropValue::Str(device));
            }
        }

        if source.has_property("user-agent") {
            source.set_property("user-agent", PropValue::Str(self.config.user_agent.clone()));
            source.set_property("ssl-strict", PropValue::Bool(false));
        }

        let proxy = &self.config.proxy;
        if !proxy.address.is_empty() && source.has_property("proxy") {
            debug!("Pipeline {}: setting proxy to {}", self.id, proxy.address);
            source.set_property("proxy", PropValue::Str(proxy.address.clone()));
            if proxy.authentication
                && source.has_property("proxy-id")
                && source.has_property("proxy-pw")
                && !proxy.user.is_empty()
                && !proxy.password.is_empty()
            {
                source.set_property("proxy-id", PropValue::Str(proxy.user.clone()));
                source.set_property("proxy-pw", PropValue::Str(proxy.password.clone()));
            }
        }

        let was_buffering = std::mem::replace(&mut lock(&self.control).buffering, false);
        if was_buffering {
            self.emit(PipelineEvent::BufferingFinished { id: self.id });
            let _ = self.states.request(EngineState::Playing);
        }
    }

    /// The current stream is about to run out; hand over the staged one
    pub(crate) fn on_about_to_finish(&self) {
        let next_url = {
            let mut control = lock(&self.control);
            if control.has_next_valid_url() && !control.next_uri_set {
                control.next_uri_set = true;
                control.next.as_ref().map(|next| next.url.clone())
            } else {
                None
            }
        };

        if let Some(url) = next_url {
            debug!("Pipeline {}: queueing next URL {}", self.id, url);
            self.player.set_uri(&url);
        }
    }

    pub(crate) fn on_bus_message(&self, signal: BusSignal<'_>) {
        match signal {
            BusSignal::EndOfStream => self.emit(PipelineEvent::EndOfStream {
                id: self.id,
                has_successor: false,
            }),
            BusSignal::Tags(tags) => self.on_tags(tags),
            BusSignal::Error(err) => self.on_error(err),
            BusSignal::Redirect(location) => {
                debug!("Pipeline {}: redirected to {}", self.id, location);
                lock(&self.control).redirect_url = Some(location.to_string());
            }
            BusSignal::StateChanged { old, new, .. } => self.on_state_changed(old, new),
            BusSignal::Buffering(percent) => self.on_buffering(percent),
            BusSignal::TaskCreated(task) => on_task_created(task),
            BusSignal::StreamStart => self.on_stream_start(),
        }
    }

    fn on_tags(&self, tags: &TagList) {
        let url = {
            let control = lock(&self.control);
            if control.ignore_tags {
                return;
            }
            control.current.original_url.clone()
        };

        let bundle = MetaBundle::from_tags(tags, &url);
        self.emit(PipelineEvent::MetadataFound {
            id: self.id,
            bundle,
        });
    }

    fn on_error(&self, err: &EngineError) {
        let (next_failed, redirected) = {
            let control = lock(&self.control);
            (
                control.initialized && control.next_uri_set && err.domain.is_resource_or_stream(),
                control.redirect_url.is_some(),
            )
        };

        if next_failed {
            // The current track keeps playing; the engine will not end it by itself
            info!(
                "Pipeline {}: ignoring error while loading the next track: {}",
                self.id, err.message
            );
            let input = lock(&self.graph).as_ref().map(|graph| graph.input().clone());
            if let Some(input) = input {
                input.send_eos();
            }
            return;
        }

        error!(
            "Pipeline {}: {} error {}: {}",
            self.id, err.domain, err.code, err.message
        );
        error!("Pipeline {}: debug: {}", self.id, err.debug);

        if redirected && err.debug.contains(REDIRECT_NOT_HANDLED) {
            return;
        }

        if cfg!(windows) && is_spurious_sink_error(err) {
            return;
        }

        self.emit(PipelineEvent::Error {
            id: self.id,
            message: err.message.clone(),
            domain: err.domain.code(),
            code: err.code,
        });
    }

    fn on_state_changed(&self, old: EngineState, new: EngineState) {
        debug!("Pipeline {}: state {} -> {}", self.id, old, new);
        let active = matches!(new, EngineState::Paused | EngineState::Playing);

        let mut seek = None;
        let mut revert_to = None;
        {
            let mut control = lock(&self.control);
            control.engine_state = new;

            if !control.initialized && active {
                control.initialized = true;
                if control.connected {
                    seek = control.pending_seek;
                }
            }

            if control.initialized && !active {
                control.initialized = false;
                if control.next_uri_set && new == EngineState::Ready {
                    control.next_uri_set = false;
                    revert_to = Some(control.current.url.clone());
                }
            }
        }

        if let Some(position) = seek {
            self.send(Command::Seek(position));
        }
        if let Some(url) = revert_to {
            debug!("Pipeline {}: reverting to {} and resuming", self.id, url);
            self.player.set_uri(&url);
            let _ = self.states.request(EngineState::Playing);
        }
    }

    fn on_buffering(&self, percent: i32) {
        let current = self.player.current_state().unwrap_or(EngineState::Null);

        let mut control = lock(&self.control);
        if percent == 0 && current == EngineState::Playing && !control.buffering {
            control.buffering = true;
            drop(control);
            debug!("Pipeline {}: buffering started", self.id);
            self.emit(PipelineEvent::BufferingStarted { id: self.id });
            let _ = self.states.request(EngineState::Paused);
        } else if percent == 100 && control.buffering {
            control.buffering = false;
            drop(control);
            debug!("Pipeline {}: buffering finished", self.id);
            self.emit(PipelineEvent::BufferingFinished { id: self.id });
            let _ = self.states.request(EngineState::Playing);
        } else if control.buffering {
            drop(control);
            self.emit(PipelineEvent::BufferingProgress {
                id: self.id,
                percent,
            });
        }
    }

    /// The staged URL started playing
    fn on_stream_start(&self) {
        let swapped = {
            let mut control = lock(&self.control);
            if !control.next_uri_set {
                return;
            }
            control.next_uri_set = false;
            match control.next.take() {
                Some(next) => {
                    control.current.url = next.url;
                    control.current.original_url = next.original_url;
                    control.current.end_offset = next.end_offset;
                }
                None => control.current.end_offset = 0,
            }
            control.current.url.clone()
        };

        debug!("Pipeline {}: now playing {}", self.id, swapped);
        self.emit(PipelineEvent::EndOfStream {
            id: self.id,
            has_successor: true,
        });
    }
}

fn on_task_created(task: &TaskHandle) {
    task.0.set_enter_hook(Box::new(|thread: &dyn ThreadControl| {
        if cfg!(target_os = "macos") && !thread.request_realtime_priority(STREAMING_THREAD_PRIORITY) {
            warn!("Cannot raise streaming thread priority");
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(domain: ErrorDomain, code: i32, message: &str) -> EngineError {
        EngineError {
            domain,
            code,
            message: message.to_string(),
            debug: String::new(),
        }
    }

    #[test]
    fn test_directsound_status_error_is_spurious() {
        let err = error(
            ErrorDomain::Resource,
            RESOURCE_ERROR_OPEN_WRITE,
            "IDirectSoundBuffer_GetStatus The operation completed successfully.",
        );
        assert!(is_spurious_sink_error(&err));
    }

    #[test]
    fn test_other_errors_are_not_spurious() {
        let wrong_code = error(
            ErrorDomain::Resource,
            RESOURCE_ERROR_OPEN_WRITE + 1,
            "IDirectSoundBuffer_GetStatus The operation completed successfully.",
        );
        assert!(!is_spurious_sink_error(&wrong_code));

        let wrong_domain = error(
            ErrorDomain::Stream,
            RESOURCE_ERROR_OPEN_WRITE,
            "IDirectSoundBuffer_GetStatus The operation completed successfully.",
        );
        assert!(!is_spurious_sink_error(&wrong_domain));

        let real = error(ErrorDomain::Resource, RESOURCE_ERROR_OPEN_WRITE, "Device busy");
        assert!(!is_spurious_sink_error(&real));
    }
}
