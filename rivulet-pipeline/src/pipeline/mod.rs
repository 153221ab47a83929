//! Playback pipeline instance
//!
//! A `Pipeline` binds one player and one processing graph to a URL and
//! drives them through their lifecycle: connecting the decoded stream,
//! deferred seeks, gapless hand-over of a staged next URL, buffering,
//! volume ramps and teardown.
//!
//! Three kinds of threads touch a pipeline concurrently: the caller, the
//! engine's streaming and bus threads (see `handlers`), and the pipeline's own
//! workers (state changes on a dedicated thread, queued commands and the fader
//! on a tokio task). Shared state sits behind small, separate locks so the
//! buffer path never waits on a state change.

mod handlers;
mod state;
mod state_worker;
mod worker;

pub use handlers::{is_spurious_sink_error, DIRECTSOUND_STATUS_OK, REDIRECT_NOT_HANDLED};
pub use state::{NextTrack, PipelineState, TrackState};
pub use state_worker::StateChangeHandle;

use crate::bus::BusDispatcher;
use crate::config::{PipelineConfig, EQ_BAND_COUNT};
use crate::consumers::{BufferConsumer, ConsumerRegistry};
use crate::engine::{
    AboutToFinishFn, BusMessageFn, EngineBackend, EngineState, PadAddedFn, Player, PlayerCallbacks,
    SourceSetupFn, StateChangeReturn, SubscriptionId,
};
use crate::error::{Error, Result};
use crate::events::{EventBus, PipelineEvent, PipelineId};
use crate::fader::FadeDirection;
use crate::format::FormatConverter;
use crate::graph::{EngineReleaser, GraphBuilder, GraphHandle};
use crate::timeline::Timeline;
use rivulet_common::FadeCurve;
use state::{ControlState, MixerState};
use state_worker::StateWorker;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use worker::Command;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the caller, engine callbacks and the workers
///
/// Callbacks and the command worker hold it weakly; only `Pipeline` owns it.
pub(crate) struct Shared {
    pub(crate) id: PipelineId,
    config: PipelineConfig,
    engine: Arc<dyn EngineBackend>,
    player: Arc<dyn Player>,
    graph: Mutex<Option<GraphHandle>>,
    dispatcher: OnceLock<BusDispatcher>,
    control: Mutex<ControlState>,
    timeline: Mutex<Timeline>,
    mixer: Mutex<MixerState>,
    converter: FormatConverter,
    consumers: ConsumerRegistry,
    events: EventBus,
    states: StateWorker,
    commands: mpsc::UnboundedSender<Command>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl Shared {
    /// Publish an event unless the pipeline was torn down
    pub(crate) fn emit(&self, event: PipelineEvent) {
        if lock(&self.control).torn_down {
            return;
        }
        self.events.emit_lossy(event);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Pipeline {}: command worker gone", self.id);
        }
    }

    pub(crate) fn seek(&self, position: i64) -> bool {
        let force_ready = {
            let mut control = lock(&self.control);
            if control.ignore_next_seek {
                control.ignore_next_seek = false;
                return true;
            }

            if !control.connected || !control.initialized {
                debug!("Pipeline {}: deferring seek to {}", self.id, position);
                control.pending_seek = Some(position);
                return true;
            }

            if control.next_uri_set {
                // The player already moved on to the next URL; go back through
                // Ready, which reverts the URL and retries the seek
                control.pending_seek = Some(position);
                true
            } else {
                control.pending_seek = None;
                control.last_known_position = position;
                false
            }
        };

        if force_ready {
            let _ = self.states.request(EngineState::Ready);
            return true;
        }
        self.player.seek(position)
    }

    pub(crate) fn set_volume_modifier(&self, modifier: f64) {
        let graph = lock(&self.graph);
        let Some(graph) = graph.as_ref().filter(|graph| graph.has_volume()) else {
            return;
        };
        let volume = {
            let mut mixer = lock(&self.mixer);
            mixer.volume_modifier = modifier;
            mixer.volume()
        };
        graph.set_volume(volume);
    }

    fn apply_balance(&self) {
        let balance = lock(&self.mixer).balance;
        if let Some(graph) = lock(&self.graph).as_ref() {
            graph.set_balance(balance);
        }
    }

    fn apply_equalizer(&self) {
        let mixer = lock(&self.mixer).clone();
        if let Some(graph) = lock(&self.graph).as_ref() {
            graph.set_equalizer(mixer.eq_enabled, mixer.eq_preamp, &mixer.eq_band_gains);
        }
    }
}

/// One playback graph bound to a track
///
/// Dropping the pipeline tears it down.
pub struct Pipeline {
    shared: Arc<Shared>,
}

impl Pipeline {
    /// Create an unbound pipeline
    ///
    /// Must be called within a tokio runtime; the command worker runs on it.
    /// Fails with `GraphBuildFailed` when the engine cannot create a player.
    pub fn new(engine: Arc<dyn EngineBackend>, config: PipelineConfig, events: EventBus) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::InvalidState("a pipeline needs a tokio runtime".to_string()))?;

        let player = engine
            .create_player()
            .ok_or_else(|| Error::GraphBuildFailed("cannot create player".to_string()))?;

        let id = PipelineId::next();
        let states = StateWorker::spawn(player.clone(), &id.0.to_string())?;
        let (commands, rx) = mpsc::unbounded_channel();

        let mixer = MixerState {
            balance: if config.stereo_balancer_enabled {
                config.stereo_balance
            } else {
                0.0
            },
            eq_enabled: config.equalizer.enabled,
            eq_preamp: config.equalizer.preamp,
            eq_band_gains: config.equalizer.band_gains,
            ..MixerState::default()
        };

        let shared = Arc::new(Shared {
            id,
            config,
            engine,
            player,
            graph: Mutex::new(None),
            dispatcher: OnceLock::new(),
            control: Mutex::new(ControlState::default()),
            timeline: Mutex::new(Timeline::new()),
            mixer: Mutex::new(mixer),
            converter: FormatConverter::new(),
            consumers: ConsumerRegistry::new(),
            events,
            states,
            commands,
            subscription: Mutex::new(None),
        });

        runtime.spawn(worker::run(Arc::downgrade(&shared), rx));
        debug!("Pipeline {} created", id);

        Ok(Self { shared })
    }

    /// Bind the pipeline to `url` and build its graph
    ///
    /// `end_offset` is the stop position in nanoseconds; 0 plays to the end.
    /// A build failure leaves the pipeline unusable; discard it.
    pub fn init_from_url(&self, url: &str, original_url: &str, end_offset: i64) -> Result<()> {
        let shared = &self.shared;
        {
            let control = lock(&shared.control);
            if control.torn_down {
                return Err(Error::InvalidState("pipeline was torn down".to_string()));
            }
        }
        if lock(&shared.graph).is_some() {
            return Err(Error::InvalidState("pipeline is already bound to a URL".to_string()));
        }

        let mut graph = GraphBuilder::new(shared.engine.as_ref(), Arc::new(EngineReleaser))
            .build(&shared.config)
            .inspect_err(|e| error!("Pipeline {}: {}", shared.id, e))?;

        let weak = Arc::downgrade(shared);
        graph.add_buffer_probe(Box::new(move |buffer| {
            if let Some(shared) = weak.upgrade() {
                shared.on_buffer(buffer);
            }
        }));
        let weak = Arc::downgrade(shared);
        graph.add_event_probe(Box::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_stream_event(event);
            }
        }));

        let mixer = lock(&shared.mixer).clone();
        graph.set_volume(mixer.volume());
        graph.set_balance(mixer.balance);
        graph.set_equalizer(mixer.eq_enabled, mixer.eq_preamp, &mixer.eq_band_gains);

        let _ = shared
            .dispatcher
            .set(BusDispatcher::new(shared.player.name(), graph.queue().name()));

        {
            let mut control = lock(&shared.control);
            control.current.url = url.to_string();
            control.current.original_url = original_url.to_string();
            control.current.end_offset = end_offset;
        }

        shared.player.set_uri(url);
        shared.player.set_soft_volume(shared.config.volume_enabled);
        shared.player.set_audio_sink(graph.input());
        *lock(&shared.graph) = Some(graph);

        let subscription = shared.player.connect(callbacks(shared));
        *lock(&shared.subscription) = Some(subscription);
        lock(&shared.control).connected = true;

        info!("Pipeline {}: bound to {}", shared.id, url);
        Ok(())
    }

    /// Stage the track to pre-buffer for gapless playback
    ///
    /// Replaces any previously staged track. An empty URL clears it.
    pub fn set_next_url(&self, url: &str, original_url: &str, begin_offset: i64, end_offset: i64) {
        let mut control = lock(&self.shared.control);
        control.next = (!url.is_empty()).then(|| NextTrack {
            url: url.to_string(),
            original_url: original_url.to_string(),
            begin_offset,
            end_offset,
        });
    }

    /// Flushing seek to `position` nanoseconds
    ///
    /// Seeks issued before the pipeline is ready, or while the player already
    /// moved on to the staged URL, are kept and performed later; those return
    /// true immediately.
    pub fn seek(&self, position: i64) -> bool {
        self.shared.seek(position)
    }

    /// Request an engine state; completes once the change was executed
    pub fn set_state(&self, state: EngineState) -> StateChangeHandle {
        self.shared.states.request(state)
    }

    /// Engine state of the player, `Null` when unknown
    pub fn state(&self) -> EngineState {
        self.shared.player.current_state().unwrap_or(EngineState::Null)
    }

    pub fn lifecycle(&self) -> PipelineState {
        lock(&self.shared.control).lifecycle()
    }

    /// Playback position in nanoseconds
    ///
    /// Queried from the engine once initialized, otherwise the last known
    /// position (the target of the last seek).
    pub fn position(&self) -> i64 {
        let shared = &self.shared;
        let initialized = lock(&shared.control).initialized;
        let queried = if initialized {
            shared.player.query_position()
        } else {
            None
        };

        let mut control = lock(&shared.control);
        if let Some(position) = queried {
            control.last_known_position = position;
        }
        control.last_known_position
    }

    /// Stream duration in nanoseconds, 0 when unknown
    pub fn length(&self) -> i64 {
        self.shared.player.query_duration().unwrap_or(0)
    }

    /// Set the volume in percent; no-op without a volume stage
    pub fn set_volume(&self, percent: i32) {
        let graph = lock(&self.shared.graph);
        let Some(graph) = graph.as_ref().filter(|graph| graph.has_volume()) else {
            return;
        };
        let volume = {
            let mut mixer = lock(&self.shared.mixer);
            mixer.volume_percent = percent;
            mixer.volume()
        };
        graph.set_volume(volume);
    }

    /// Scale the volume by `modifier` (driven by faders)
    pub fn set_volume_modifier(&self, modifier: f64) {
        self.shared.set_volume_modifier(modifier);
    }

    /// Turn the balancer on or off; turning it off centers the balance
    pub fn set_stereo_balancer_enabled(&self, enabled: bool) {
        if !enabled {
            lock(&self.shared.mixer).balance = 0.0;
        }
        self.shared.apply_balance();
    }

    /// Balance from -1.0 (left) to 1.0 (right)
    pub fn set_stereo_balance(&self, balance: f32) {
        lock(&self.shared.mixer).balance = balance;
        self.shared.apply_balance();
    }

    /// A disabled equalizer stays in the graph with flat gains
    pub fn set_equalizer_enabled(&self, enabled: bool) {
        lock(&self.shared.mixer).eq_enabled = enabled;
        self.shared.apply_equalizer();
    }

    /// Preamp and band gains, each in the range -100..=100
    pub fn set_equalizer_params(&self, preamp: i32, band_gains: &[i32; EQ_BAND_COUNT]) {
        {
            let mut mixer = lock(&self.shared.mixer);
            mixer.eq_preamp = preamp;
            mixer.eq_band_gains = *band_gains;
        }
        self.shared.apply_equalizer();
    }

    /// Start a volume ramp, replacing a running one without a jump
    ///
    /// `PipelineEvent::FaderFinished` follows the end of the ramp after a
    /// settle delay: long with `use_settle_delay`, short otherwise.
    pub fn start_fader(
        &self,
        duration: Duration,
        direction: FadeDirection,
        curve: FadeCurve,
        use_settle_delay: bool,
    ) {
        self.shared.send(Command::StartFader {
            duration,
            direction,
            curve,
            use_settle_delay,
        });
    }

    /// Wait until every command queued so far has been handled
    pub async fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        self.shared.send(Command::Sync(tx));
        let _ = rx.await;
    }

    pub fn add_buffer_consumer(&self, consumer: Arc<dyn BufferConsumer>) {
        self.shared.consumers.add(consumer);
    }

    pub fn remove_buffer_consumer(&self, consumer: &Arc<dyn BufferConsumer>) {
        self.shared.consumers.remove(consumer);
    }

    pub fn remove_all_buffer_consumers(&self) {
        self.shared.consumers.remove_all();
    }

    /// Device the source element reads from (CD drives)
    pub fn set_source_device(&self, device: impl Into<String>) {
        lock(&self.shared.control).source_device = Some(device.into());
    }

    /// Stop reporting stream tags
    pub fn set_ignore_tags(&self, ignore: bool) {
        lock(&self.shared.control).ignore_tags = ignore;
    }

    /// Location announced by the last redirect, if any
    pub fn redirect_url(&self) -> Option<String> {
        lock(&self.shared.control).redirect_url.clone()
    }

    pub fn id(&self) -> PipelineId {
        self.shared.id
    }

    pub fn url(&self) -> String {
        lock(&self.shared.control).current.url.clone()
    }

    pub fn original_url(&self) -> String {
        lock(&self.shared.control).current.original_url.clone()
    }

    /// Current stop position in nanoseconds
    pub fn end_offset(&self) -> i64 {
        lock(&self.shared.control).current.end_offset
    }

    pub fn next_track(&self) -> Option<NextTrack> {
        lock(&self.shared.control).next.clone()
    }

    pub fn has_next_valid_url(&self) -> bool {
        lock(&self.shared.control).has_next_valid_url()
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.shared.control).initialized
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Tear the pipeline down
    ///
    /// Callbacks are disconnected before the engine is stopped, and the engine
    /// is stopped before the graph is released. Idempotent.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        {
            let mut control = lock(&shared.control);
            if control.torn_down {
                return;
            }
            control.torn_down = true;
        }
        debug!("Pipeline {}: tearing down", shared.id);

        if let Some(subscription) = lock(&shared.subscription).take() {
            shared.player.disconnect(subscription);
        }
        if let Some(graph) = lock(&shared.graph).as_mut() {
            graph.remove_probes();
        }

        shared.states.shutdown();
        if shared.player.set_state(EngineState::Null) == StateChangeReturn::Failure {
            warn!("Pipeline {}: engine refused to stop", shared.id);
        }

        let graph = lock(&shared.graph).take();
        drop(graph);

        shared.send(Command::Shutdown);
        debug!("Pipeline {}: torn down", shared.id);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Player callbacks, each holding the pipeline weakly
fn callbacks(shared: &Arc<Shared>) -> PlayerCallbacks {
    let weak = Arc::downgrade(shared);
    let on_pad_added: PadAddedFn = Box::new(move |pad| {
        if let Some(shared) = weak.upgrade() {
            shared.on_pad_added(pad);
        }
    });

    let weak = Arc::downgrade(shared);
    let on_source_setup: SourceSetupFn = Box::new(move |source| {
        if let Some(shared) = weak.upgrade() {
            shared.on_source_setup(source);
        }
    });

    let weak = Arc::downgrade(shared);
    let on_about_to_finish: AboutToFinishFn = Box::new(move || {
        if let Some(shared) = weak.upgrade() {
            shared.on_about_to_finish();
        }
    });

    let weak = Arc::downgrade(shared);
    let on_bus_message: BusMessageFn = Box::new(move |message| {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let signal = shared
            .dispatcher
            .get()
            .and_then(|dispatcher| dispatcher.route(message));
        if let Some(signal) = signal {
            shared.on_bus_message(signal);
        }
    });

    PlayerCallbacks {
        on_pad_added,
        on_source_setup,
        on_about_to_finish,
        on_bus_message,
    }
}
