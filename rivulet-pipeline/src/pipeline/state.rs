//! Control state shared by the command path and the engine callbacks

use crate::engine::EngineState;
use crate::config::EQ_BAND_COUNT;
use serde::Serialize;
use std::fmt;

/// Lifecycle of a pipeline instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    /// No URL bound yet
    Unconnected,
    /// URL bound and graph linked
    Connected,
    /// Reached paused or playing at least once since the last reset
    Initialized,
    Playing,
    Paused,
    /// Paused by the pipeline itself until the queue refills
    Buffering,
    /// Torn down; no further events
    Finished,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Unconnected => "Unconnected",
            PipelineState::Connected => "Connected",
            PipelineState::Initialized => "Initialized",
            PipelineState::Playing => "Playing",
            PipelineState::Paused => "Paused",
            PipelineState::Buffering => "Buffering",
            PipelineState::Finished => "Finished",
        };
        f.write_str(name)
    }
}

/// Track currently bound to the pipeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackState {
    /// URL handed to the engine
    pub url: String,
    /// URL as the caller knows it (before redirects and fixups)
    pub original_url: String,
    /// Stop position in nanoseconds; 0 or negative plays to the end
    pub end_offset: i64,
}

/// Track staged for gapless pre-buffering
#[derive(Debug, Clone, PartialEq)]
pub struct NextTrack {
    pub url: String,
    pub original_url: String,
    pub begin_offset: i64,
    pub end_offset: i64,
}

#[derive(Debug)]
pub(crate) struct ControlState {
    pub current: TrackState,
    pub next: Option<NextTrack>,
    /// Source device recovered from the URL, applied at source setup
    pub source_device: Option<String>,
    pub connected: bool,
    pub initialized: bool,
    /// The staged URL was handed to the engine at about-to-finish
    pub next_uri_set: bool,
    /// Swallow one seek after a seamless section advance
    pub ignore_next_seek: bool,
    pub ignore_tags: bool,
    pub pending_seek: Option<i64>,
    pub last_known_position: i64,
    pub buffering: bool,
    pub redirect_url: Option<String>,
    /// Last state the whole graph reported
    pub engine_state: EngineState,
    pub torn_down: bool,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            current: TrackState::default(),
            next: None,
            source_device: None,
            connected: false,
            initialized: false,
            next_uri_set: false,
            ignore_next_seek: false,
            ignore_tags: false,
            pending_seek: None,
            last_known_position: 0,
            buffering: false,
            redirect_url: None,
            engine_state: EngineState::Null,
            torn_down: false,
        }
    }
}

impl ControlState {
    pub fn has_next_valid_url(&self) -> bool {
        self.next.as_ref().is_some_and(|next| !next.url.is_empty())
    }

    pub fn lifecycle(&self) -> PipelineState {
        if self.torn_down {
            PipelineState::Finished
        } else if !self.connected {
            PipelineState::Unconnected
        } else if !self.initialized {
            PipelineState::Connected
        } else if self.buffering {
            PipelineState::Buffering
        } else {
            match self.engine_state {
                EngineState::Playing => PipelineState::Playing,
                EngineState::Paused => PipelineState::Paused,
                _ => PipelineState::Initialized,
            }
        }
    }
}

/// User-adjustable gain settings
#[derive(Debug, Clone)]
pub(crate) struct MixerState {
    pub volume_percent: i32,
    pub volume_modifier: f64,
    pub balance: f32,
    pub eq_enabled: bool,
    pub eq_preamp: i32,
    pub eq_band_gains: [i32; EQ_BAND_COUNT],
}

impl MixerState {
    /// Value for the volume stage
    pub fn volume(&self) -> f64 {
        self.volume_percent as f64 * 0.01 * self.volume_modifier
    }
}

impl Default for MixerState {
    fn default() -> Self {
        Self {
            volume_percent: 100,
            volume_modifier: 1.0,
            balance: 0.0,
            eq_enabled: false,
            eq_preamp: 0,
            eq_band_gains: [0; EQ_BAND_COUNT],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_progression() {
        let mut state = ControlState::default();
        assert_eq!(state.lifecycle(), PipelineState::Unconnected);

        state.connected = true;
        assert_eq!(state.lifecycle(), PipelineState::Connected);

        state.initialized = true;
        state.engine_state = EngineState::Paused;
        assert_eq!(state.lifecycle(), PipelineState::Paused);

        state.engine_state = EngineState::Playing;
        assert_eq!(state.lifecycle(), PipelineState::Playing);

        state.buffering = true;
        assert_eq!(state.lifecycle(), PipelineState::Buffering);

        state.torn_down = true;
        assert_eq!(state.lifecycle(), PipelineState::Finished);
    }

    #[test]
    fn test_next_url_validity() {
        let mut state = ControlState::default();
        assert!(!state.has_next_valid_url());

        state.next = Some(NextTrack {
            url: String::new(),
            original_url: String::new(),
            begin_offset: 0,
            end_offset: 0,
        });
        assert!(!state.has_next_valid_url());

        state.next = Some(NextTrack {
            url: "file:///b.flac".into(),
            original_url: "file:///b.flac".into(),
            begin_offset: 0,
            end_offset: 0,
        });
        assert!(state.has_next_valid_url());
    }

    #[test]
    fn test_volume_combines_percent_and_modifier() {
        let mixer = MixerState {
            volume_percent: 50,
            volume_modifier: 0.5,
            ..MixerState::default()
        };
        assert!((mixer.volume() - 0.25).abs() < 1e-12);
        assert_eq!(MixerState::default().volume(), 1.0);
    }
}
