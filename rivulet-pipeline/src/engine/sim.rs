//! In-process simulated engine
//!
//! Deterministic stand-in for a real streaming engine. Nothing is decoded;
//! tests and the demo binary drive the simulation by hand: pushing buffers
//! through pads, posting bus messages, announcing new pads and firing
//! about-to-finish. Every element and player keeps a record of what the
//! controller did to it so behavior can be asserted afterwards.
//!
//! Callbacks are always invoked with no simulator lock held.

use super::{
    BufferProbe, Caps, Element, ElementOps, EngineBackend, EngineState, EventProbe, Pad,
    PadProbe, PadProbeFn, Player, PlayerCallbacks, ProbeId, PropValue, StateChangeReturn,
    StreamEvent, StreamTask, SubscriptionId, TaskEnterHook, ThreadControl,
};
use crate::bus::{BusMessage, BusMessageKind};
use crate::format::AudioBuffer;
use crate::timeline::Segment;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, trace};

type SharedBufferProbe = Arc<dyn Fn(&AudioBuffer) + Send + Sync>;
type SharedEventProbe = Arc<dyn Fn(&StreamEvent) + Send + Sync>;
type SharedPadProbe = Arc<dyn Fn(&dyn Pad, &PadProbe) + Send + Sync>;

/// Poison-tolerant lock; a panicking test thread must not cascade
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Bookkeeping shared by the engine and everything it creates
#[derive(Default)]
struct SimRegistry {
    next_id: AtomicU64,
    failing_factories: Mutex<HashSet<String>>,
    missing_properties: Mutex<HashMap<String, HashSet<String>>>,
    player_unavailable: AtomicBool,
    elements: Mutex<Vec<Arc<SimElement>>>,
    players: Mutex<Vec<Arc<SimPlayer>>>,
}

impl SimRegistry {
    fn next_name(&self, factory: &str) -> String {
        format!("{}-{}", factory, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn find(&self, name: &str) -> Option<Arc<SimElement>> {
        lock(&self.elements).iter().find(|e| e.name == name).cloned()
    }
}

/// Simulated engine
#[derive(Clone, Default)]
pub struct SimEngine {
    registry: Arc<SimRegistry>,
}

impl SimEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `create_element(factory)` fail
    pub fn fail_factory(&self, factory: &str) {
        lock(&self.registry.failing_factories).insert(factory.to_string());
    }

    /// Make `create_player` fail
    pub fn fail_player(&self) {
        self.registry.player_unavailable.store(true, Ordering::Relaxed);
    }

    /// Elements of `factory` created from now on lack `property`
    pub fn without_property(&self, factory: &str, property: &str) {
        lock(&self.registry.missing_properties)
            .entry(factory.to_string())
            .or_default()
            .insert(property.to_string());
    }

    /// All elements created so far, in creation order
    pub fn elements(&self) -> Vec<Arc<SimElement>> {
        lock(&self.registry.elements).clone()
    }

    /// Elements created from `factory`, in creation order
    pub fn elements_of(&self, factory: &str) -> Vec<Arc<SimElement>> {
        lock(&self.registry.elements)
            .iter()
            .filter(|e| e.factory == factory)
            .cloned()
            .collect()
    }

    pub fn element(&self, name: &str) -> Option<Arc<SimElement>> {
        self.registry.find(name)
    }

    /// Most recently created player
    pub fn last_player(&self) -> Option<Arc<SimPlayer>> {
        lock(&self.registry.players).last().cloned()
    }
}

impl EngineBackend for SimEngine {
    fn create_element(&self, factory: &str) -> Option<Element> {
        if lock(&self.registry.failing_factories).contains(factory) {
            debug!("Simulated failure creating {}", factory);
            return None;
        }
        let missing = lock(&self.registry.missing_properties)
            .get(factory)
            .cloned()
            .unwrap_or_default();
        let element = Arc::new(SimElement::new(
            self.registry.next_name(factory),
            factory,
            missing,
            None,
            Arc::downgrade(&self.registry),
        ));
        lock(&self.registry.elements).push(element.clone());
        Some(element)
    }

    fn create_player(&self) -> Option<Arc<dyn Player>> {
        if self.registry.player_unavailable.load(Ordering::Relaxed) {
            return None;
        }
        let player = Arc::new(SimPlayer::new(
            self.registry.next_name("playbin"),
            self.registry.clone(),
        ));
        lock(&self.registry.players).push(player.clone());
        Some(player)
    }
}

/// Simulated processing stage
pub struct SimElement {
    name: String,
    factory: String,
    missing: HashSet<String>,
    /// When set, the only properties the element has
    only: Option<HashSet<String>>,
    properties: Mutex<HashMap<String, PropValue>>,
    child_properties: Mutex<HashMap<(usize, String), PropValue>>,
    links: Mutex<Vec<(String, Option<Caps>)>>,
    /// Pad feeding the input
    upstream: Mutex<Option<String>>,
    buffer_probes: Mutex<Vec<(ProbeId, SharedBufferProbe)>>,
    event_probes: Mutex<Vec<(ProbeId, SharedEventProbe)>>,
    next_probe: AtomicU64,
    eos_count: AtomicUsize,
    released: AtomicBool,
    registry: Weak<SimRegistry>,
}

impl SimElement {
    fn new(
        name: String,
        factory: &str,
        missing: HashSet<String>,
        only: Option<HashSet<String>>,
        registry: Weak<SimRegistry>,
    ) -> Self {
        Self {
            name,
            factory: factory.to_string(),
            missing,
            only,
            properties: Mutex::new(HashMap::new()),
            child_properties: Mutex::new(HashMap::new()),
            links: Mutex::new(Vec::new()),
            upstream: Mutex::new(None),
            buffer_probes: Mutex::new(Vec::new()),
            event_probes: Mutex::new(Vec::new()),
            next_probe: AtomicU64::new(1),
            eos_count: AtomicUsize::new(0),
            released: AtomicBool::new(false),
            registry,
        }
    }

    /// Name of the pad feeding the input
    pub fn upstream(&self) -> Option<String> {
        lock(&self.upstream).clone()
    }

    /// Take `pad` as the input; refused while another pad is linked
    fn accept_upstream(&self, pad: &str) -> bool {
        let mut upstream = lock(&self.upstream);
        if upstream.as_deref().is_some_and(|current| current != pad) {
            return false;
        }
        *upstream = Some(pad.to_string());
        true
    }

    fn release_upstream(&self, pad: &str) {
        let mut upstream = lock(&self.upstream);
        if upstream.as_deref() == Some(pad) {
            *upstream = None;
        }
    }

    /// Elements linked after this one
    fn downstream(&self) -> Vec<Arc<SimElement>> {
        let Some(registry) = self.registry.upgrade() else {
            return Vec::new();
        };
        let names: Vec<String> = lock(&self.links).iter().map(|(name, _)| name.clone()).collect();
        names.iter().filter_map(|name| registry.find(name)).collect()
    }

    pub fn property(&self, name: &str) -> Option<PropValue> {
        lock(&self.properties).get(name).cloned()
    }

    pub fn child_property(&self, index: usize, name: &str) -> Option<PropValue> {
        lock(&self.child_properties)
            .get(&(index, name.to_string()))
            .cloned()
    }

    /// Downstream element names and caps, in link order
    pub fn links(&self) -> Vec<(String, Option<Caps>)> {
        lock(&self.links).clone()
    }

    pub fn buffer_probe_count(&self) -> usize {
        lock(&self.buffer_probes).len()
    }

    pub fn event_probe_count(&self) -> usize {
        lock(&self.event_probes).len()
    }

    pub fn eos_count(&self) -> usize {
        self.eos_count.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Run a buffer through the output-side probes and on down the links
    pub fn push_buffer(&self, buffer: &AudioBuffer) {
        let probes: Vec<SharedBufferProbe> =
            lock(&self.buffer_probes).iter().map(|(_, p)| p.clone()).collect();
        for probe in probes {
            probe(buffer);
        }
        for element in self.downstream() {
            element.push_buffer(buffer);
        }
    }

    /// Run a stream event through the output-side probes and on down the links
    pub fn push_event(&self, event: &StreamEvent) {
        let probes: Vec<SharedEventProbe> =
            lock(&self.event_probes).iter().map(|(_, p)| p.clone()).collect();
        for probe in probes {
            probe(event);
        }
        for element in self.downstream() {
            element.push_event(event);
        }
    }
}

impl ElementOps for SimElement {
    fn name(&self) -> &str {
        &self.name
    }

    fn factory(&self) -> &str {
        &self.factory
    }

    fn has_property(&self, name: &str) -> bool {
        if self.missing.contains(name) {
            return false;
        }
        self.only.as_ref().map_or(true, |only| only.contains(name))
    }

    fn set_property(&self, name: &str, value: PropValue) -> bool {
        if !self.has_property(name) {
            return false;
        }
        trace!("{}: {} = {:?}", self.name, name, value);
        lock(&self.properties).insert(name.to_string(), value);
        true
    }

    fn set_child_property(&self, index: usize, name: &str, value: PropValue) -> bool {
        let children = match self.property("num-bands") {
            Some(PropValue::Int(n)) => n.max(0) as usize,
            Some(PropValue::UInt(n)) => n as usize,
            _ => 0,
        };
        if index >= children {
            return false;
        }
        lock(&self.child_properties).insert((index, name.to_string()), value);
        true
    }

    fn link(&self, downstream: &dyn ElementOps, caps: Option<&Caps>) -> bool {
        lock(&self.links).push((downstream.name().to_string(), caps.cloned()));
        true
    }

    fn add_buffer_probe(&self, probe: BufferProbe) -> ProbeId {
        let id = self.next_probe.fetch_add(1, Ordering::Relaxed);
        lock(&self.buffer_probes).push((id, Arc::from(probe)));
        id
    }

    fn add_event_probe(&self, probe: EventProbe) -> ProbeId {
        let id = self.next_probe.fetch_add(1, Ordering::Relaxed);
        lock(&self.event_probes).push((id, Arc::from(probe)));
        id
    }

    fn remove_probe(&self, id: ProbeId) {
        lock(&self.buffer_probes).retain(|(probe_id, _)| *probe_id != id);
        lock(&self.event_probes).retain(|(probe_id, _)| *probe_id != id);
    }

    fn is_input_linked(&self) -> bool {
        lock(&self.upstream).is_some()
    }

    fn unlink_input(&self) -> bool {
        lock(&self.upstream).take().is_some()
    }

    fn send_eos(&self) -> bool {
        self.eos_count.fetch_add(1, Ordering::SeqCst);
        self.push_event(&StreamEvent::Eos);
        true
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Simulated player output pad
pub struct SimPad {
    name: String,
    offset: AtomicI64,
    linked: Mutex<Option<String>>,
    probes: Mutex<Vec<(ProbeId, SharedPadProbe)>>,
    next_probe: AtomicU64,
    registry: Arc<SimRegistry>,
}

impl SimPad {
    fn new(name: String, registry: Arc<SimRegistry>) -> Self {
        Self {
            name,
            offset: AtomicI64::new(0),
            linked: Mutex::new(None),
            probes: Mutex::new(Vec::new()),
            next_probe: AtomicU64::new(1),
            registry,
        }
    }

    /// Name of the element this pad feeds
    pub fn linked_to(&self) -> Option<String> {
        lock(&self.linked).clone()
    }

    fn run_probes(&self, info: &PadProbe) {
        let probes: Vec<SharedPadProbe> =
            lock(&self.probes).iter().map(|(_, p)| p.clone()).collect();
        for probe in probes {
            probe(self, info);
        }
    }

    /// Linked element, unless it was unlinked from its side since
    fn downstream(&self) -> Option<Arc<SimElement>> {
        let name = self.linked_to()?;
        self.registry
            .find(&name)
            .filter(|element| element.upstream().as_deref() == Some(self.name.as_str()))
    }

    /// Produce a buffer: pad probes first, then the linked element's output
    pub fn push_buffer(&self, buffer: &AudioBuffer) {
        self.run_probes(&PadProbe::Buffer {
            timestamp: buffer.timestamp,
            duration: buffer.duration,
        });
        if let Some(element) = self.downstream() {
            element.push_buffer(buffer);
        }
    }

    /// Announce a new segment downstream
    pub fn push_segment(&self, segment: Segment) {
        self.run_probes(&PadProbe::Segment(segment));
        if let Some(element) = self.downstream() {
            element.push_event(&StreamEvent::Segment(segment));
        }
    }

    /// Start of a flushing seek
    pub fn flush(&self) {
        self.run_probes(&PadProbe::FlushStart);
        if let Some(element) = self.downstream() {
            element.push_event(&StreamEvent::FlushStart);
        }
    }
}

impl Pad for SimPad {
    fn name(&self) -> &str {
        &self.name
    }

    fn offset(&self) -> i64 {
        self.offset.load(Ordering::SeqCst)
    }

    fn set_offset(&self, offset: i64) {
        self.offset.store(offset, Ordering::SeqCst);
    }

    fn link_to(&self, element: &dyn ElementOps) -> bool {
        let Some(target) = self.registry.find(element.name()) else {
            return false;
        };
        if !target.accept_upstream(&self.name) {
            debug!("{}: input of {} is already linked", self.name, element.name());
            return false;
        }

        let old = lock(&self.linked).replace(element.name().to_string());
        if let Some(old) = old.filter(|old| old != element.name()) {
            debug!("{} relinked from {}", self.name, old);
            if let Some(old) = self.registry.find(&old) {
                old.release_upstream(&self.name);
            }
        }
        true
    }

    fn add_probe(&self, probe: PadProbeFn) -> ProbeId {
        let id = self.next_probe.fetch_add(1, Ordering::Relaxed);
        lock(&self.probes).push((id, Arc::from(probe)));
        id
    }
}

/// Thread handle handed to task enter hooks
#[derive(Default)]
pub struct SimThread {
    requested: Mutex<Vec<i32>>,
}

impl ThreadControl for SimThread {
    fn request_realtime_priority(&self, priority: i32) -> bool {
        lock(&self.requested).push(priority);
        true
    }
}

/// Simulated streaming task
#[derive(Default)]
pub struct SimTask {
    hook: Mutex<Option<Arc<dyn Fn(&dyn ThreadControl) + Send + Sync>>>,
}

impl SimTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_hook(&self) -> bool {
        lock(&self.hook).is_some()
    }

    /// Run the enter hook on a fresh thread handle; returns requested priorities
    pub fn enter(&self) -> Vec<i32> {
        let hook = lock(&self.hook).clone();
        let thread = SimThread::default();
        if let Some(hook) = hook {
            hook(&thread);
        }
        let requested = lock(&thread.requested).clone();
        requested
    }
}

impl StreamTask for SimTask {
    fn set_enter_hook(&self, hook: TaskEnterHook) {
        *lock(&self.hook) = Some(Arc::from(hook));
    }
}

/// Simulated player
pub struct SimPlayer {
    name: String,
    registry: Arc<SimRegistry>,
    uri: Mutex<String>,
    uri_history: Mutex<Vec<String>>,
    soft_volume: AtomicBool,
    audio_sink: Mutex<Option<String>>,
    state: Mutex<EngineState>,
    state_requests: Mutex<Vec<EngineState>>,
    fail_state_changes: AtomicBool,
    seeks: Mutex<Vec<i64>>,
    position: Mutex<Option<i64>>,
    duration: Mutex<Option<i64>>,
    callbacks: Mutex<Option<(SubscriptionId, Arc<PlayerCallbacks>)>>,
    next_subscription: AtomicU64,
    pads: Mutex<Vec<Arc<SimPad>>>,
    next_pad: AtomicU64,
}

impl SimPlayer {
    fn new(name: String, registry: Arc<SimRegistry>) -> Self {
        Self {
            name,
            registry,
            uri: Mutex::new(String::new()),
            uri_history: Mutex::new(Vec::new()),
            soft_volume: AtomicBool::new(false),
            audio_sink: Mutex::new(None),
            state: Mutex::new(EngineState::Null),
            state_requests: Mutex::new(Vec::new()),
            fail_state_changes: AtomicBool::new(false),
            seeks: Mutex::new(Vec::new()),
            position: Mutex::new(None),
            duration: Mutex::new(None),
            callbacks: Mutex::new(None),
            next_subscription: AtomicU64::new(1),
            pads: Mutex::new(Vec::new()),
            next_pad: AtomicU64::new(0),
        }
    }

    fn callbacks(&self) -> Option<Arc<PlayerCallbacks>> {
        lock(&self.callbacks).as_ref().map(|(_, cb)| cb.clone())
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.callbacks).is_some()
    }

    /// Every URI ever set, in order
    pub fn uri_history(&self) -> Vec<String> {
        lock(&self.uri_history).clone()
    }

    pub fn soft_volume(&self) -> bool {
        self.soft_volume.load(Ordering::SeqCst)
    }

    pub fn audio_sink(&self) -> Option<String> {
        lock(&self.audio_sink).clone()
    }

    /// Every `set_state` target, in request order
    pub fn state_requests(&self) -> Vec<EngineState> {
        lock(&self.state_requests).clone()
    }

    pub fn fail_state_changes(&self, fail: bool) {
        self.fail_state_changes.store(fail, Ordering::SeqCst);
    }

    pub fn seeks(&self) -> Vec<i64> {
        lock(&self.seeks).clone()
    }

    pub fn set_position(&self, position: Option<i64>) {
        *lock(&self.position) = position;
    }

    pub fn set_duration(&self, duration: Option<i64>) {
        *lock(&self.duration) = duration;
    }

    pub fn pads(&self) -> Vec<Arc<SimPad>> {
        lock(&self.pads).clone()
    }

    /// Post a message on the bus as if the engine did
    pub fn post(&self, message: BusMessage) {
        if let Some(callbacks) = self.callbacks() {
            (callbacks.on_bus_message)(&message);
        }
    }

    /// Post a message originating from the player itself
    pub fn post_own(&self, kind: BusMessageKind) {
        self.post(BusMessage::new(self.name.clone(), kind));
    }

    /// Create a new decoded-stream pad and announce it
    pub fn emit_pad_added(&self) -> Arc<SimPad> {
        let index = self.next_pad.fetch_add(1, Ordering::Relaxed);
        let pad = Arc::new(SimPad::new(
            format!("{}:src_{}", self.name, index),
            self.registry.clone(),
        ));
        lock(&self.pads).push(pad.clone());
        if let Some(callbacks) = self.callbacks() {
            (callbacks.on_pad_added)(pad.clone());
        }
        pad
    }

    /// The current stream is about to run out
    pub fn about_to_finish(&self) {
        if let Some(callbacks) = self.callbacks() {
            (callbacks.on_about_to_finish)();
        }
    }

    /// Create the source element with exactly `properties` and announce it
    pub fn setup_source(&self, properties: &[&str]) -> Arc<SimElement> {
        let only = properties.iter().map(|p| p.to_string()).collect();
        let source = Arc::new(SimElement::new(
            self.registry.next_name("source"),
            "source",
            HashSet::new(),
            Some(only),
            Arc::downgrade(&self.registry),
        ));
        lock(&self.registry.elements).push(source.clone());
        if let Some(callbacks) = self.callbacks() {
            (callbacks.on_source_setup)(source.as_ref());
        }
        source
    }
}

impl Player for SimPlayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_uri(&self, uri: &str) {
        *lock(&self.uri) = uri.to_string();
        lock(&self.uri_history).push(uri.to_string());
    }

    fn uri(&self) -> String {
        lock(&self.uri).clone()
    }

    fn set_soft_volume(&self, enabled: bool) {
        self.soft_volume.store(enabled, Ordering::SeqCst);
    }

    fn set_audio_sink(&self, sink: &Element) {
        *lock(&self.audio_sink) = Some(sink.name().to_string());
    }

    fn set_state(&self, target: EngineState) -> StateChangeReturn {
        lock(&self.state_requests).push(target);
        if self.fail_state_changes.load(Ordering::SeqCst) {
            return StateChangeReturn::Failure;
        }

        let current = *lock(&self.state);
        for step in current.path_to(target) {
            let old = std::mem::replace(&mut *lock(&self.state), step);
            let pending = (step != target).then_some(target);
            self.post_own(BusMessageKind::StateChanged {
                old,
                new: step,
                pending,
            });
        }
        StateChangeReturn::Success
    }

    fn current_state(&self) -> Option<EngineState> {
        Some(*lock(&self.state))
    }

    fn seek(&self, position: i64) -> bool {
        lock(&self.seeks).push(position);
        for pad in self.pads() {
            pad.flush();
        }
        *lock(&self.position) = Some(position);
        true
    }

    fn query_position(&self) -> Option<i64> {
        *lock(&self.position)
    }

    fn query_duration(&self) -> Option<i64> {
        *lock(&self.duration)
    }

    fn connect(&self, callbacks: PlayerCallbacks) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        *lock(&self.callbacks) = Some((id, Arc::new(callbacks)));
        id
    }

    fn disconnect(&self, id: SubscriptionId) {
        let mut callbacks = lock(&self.callbacks);
        if callbacks.as_ref().map(|(current, _)| *current) == Some(id) {
            *callbacks = None;
        }
    }
}
