//! Processing graph construction
//!
//! Builds the audio chain that sits between the player's decoded output and
//! the sink:
//!
//! ```text
//! queue2 -> [rgvolume -> rglimiter -> audioconvert]   replaygain
//!        -> [volume (preamp) -> equalizer-nbands]    equalizer
//!        -> [audiopanorama]                           stereo balance
//!        -> [volume]                                  volume control
//!        -> audioconvert -> (caps: audio/x-raw[, channels]) -> sink
//! ```
//!
//! The queue, the final converter and the sink are mandatory; any of them
//! failing aborts the build and releases everything created so far. Optional
//! stages are linked only when enabled and successfully created.

use crate::config::{OutputDevice, PipelineConfig, EQ_BAND_COUNT};
use crate::engine::{BufferProbe, Caps, Element, EngineBackend, EventProbe, ProbeId, PropValue};
use crate::error::{Error, Result};
use tracing::{debug, warn};
use std::sync::Arc;

/// Center frequencies of the adjustable equalizer bands, in Hz
pub const EQ_BAND_FREQUENCIES: [u32; EQ_BAND_COUNT] =
    [60, 170, 310, 600, 1000, 3000, 6000, 12000, 14000, 16000];

/// Bands allocated in the equalizer element: the adjustable ones plus two
/// dummies at the edges
pub const EQ_TOTAL_BANDS: usize = EQ_BAND_COUNT + 2;

/// Frequency of the dummy band below the audible range
pub const EQ_LOW_DUMMY_FREQ: f64 = 20.0;

/// Frequency of the dummy band above the audible range
pub const EQ_HIGH_DUMMY_FREQ: f64 = 20000.0;

pub const QUEUE_FACTORY: &str = "queue2";
pub const CONVERT_FACTORY: &str = "audioconvert";
pub const VOLUME_FACTORY: &str = "volume";
pub const PANORAMA_FACTORY: &str = "audiopanorama";
pub const EQUALIZER_FACTORY: &str = "equalizer-nbands";
pub const RG_VOLUME_FACTORY: &str = "rgvolume";
pub const RG_LIMITER_FACTORY: &str = "rglimiter";

/// Band gain as applied to the filter bank
///
/// Cuts are scaled by 0.24 and boosts by 0.12 to match the perceived response
/// of the filters.
pub fn scale_band_gain(gain: i32) -> f64 {
    let gain = gain as f64;
    if gain < 0.0 {
        gain * 0.24
    } else {
        gain * 0.12
    }
}

/// Preamp setting (-100..=100) as a volume multiplier (0.0..=2.0)
pub fn preamp_multiplier(preamp: i32) -> f64 {
    (preamp + 100) as f64 / 100.0
}

/// Returns elements to the engine at teardown
pub trait ElementReleaser: Send + Sync {
    fn release(&self, element: &Element);
}

/// Releases elements directly through the engine handle
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineReleaser;

impl ElementReleaser for EngineReleaser {
    fn release(&self, element: &Element) {
        debug!("Releasing {}", element.name());
        element.release();
    }
}

/// Builds graphs for one engine
pub struct GraphBuilder<'a> {
    engine: &'a dyn EngineBackend,
    releaser: Arc<dyn ElementReleaser>,
}

/// Elements created so far; released in reverse order unless handed over
struct Created {
    stages: Vec<Element>,
    releaser: Arc<dyn ElementReleaser>,
}

impl Created {
    fn push(&mut self, element: &Element) {
        self.stages.push(element.clone());
    }

    fn into_stages(mut self) -> Vec<Element> {
        std::mem::take(&mut self.stages)
    }
}

impl Drop for Created {
    fn drop(&mut self) {
        for element in self.stages.iter().rev() {
            self.releaser.release(element);
        }
    }
}

impl<'a> GraphBuilder<'a> {
    pub fn new(engine: &'a dyn EngineBackend, releaser: Arc<dyn ElementReleaser>) -> Self {
        Self { engine, releaser }
    }

    fn create(&self, factory: &str, created: &mut Created) -> Option<Element> {
        let element = self.engine.create_element(factory)?;
        created.push(&element);
        Some(element)
    }

    fn create_optional(&self, factory: &str, created: &mut Created) -> Option<Element> {
        let element = self.create(factory, created);
        if element.is_none() {
            warn!("Optional element {} is unavailable, skipping it", factory);
        }
        element
    }

    fn link(from: &Element, to: &Element, caps: Option<&Caps>) -> Result<()> {
        if from.link(to.as_ref(), caps) {
            Ok(())
        } else {
            Err(Error::Link {
                from: from.name().to_string(),
                to: to.name().to_string(),
            })
        }
    }

    /// Build and link the processing graph for `config`
    pub fn build(&self, config: &PipelineConfig) -> Result<GraphHandle> {
        let mut created = Created {
            stages: Vec::new(),
            releaser: self.releaser.clone(),
        };

        let sink = self
            .create(&config.output.sink, &mut created)
            .ok_or_else(|| {
                Error::GraphBuildFailed(format!("cannot create output sink {}", config.output.sink))
            })?;
        apply_device(&sink, &config.output.device);

        let queue = self.create(QUEUE_FACTORY, &mut created);
        let converter = self.create(CONVERT_FACTORY, &mut created);
        let (queue, converter) = match (queue, converter) {
            (Some(queue), Some(converter)) => (queue, converter),
            (queue, _) => {
                let missing = if queue.is_none() {
                    QUEUE_FACTORY
                } else {
                    CONVERT_FACTORY
                };
                return Err(Error::GraphBuildFailed(format!("cannot create {}", missing)));
            }
        };

        let volume = if config.volume_enabled {
            self.create_optional(VOLUME_FACTORY, &mut created)
        } else {
            None
        };

        let panorama = if config.stereo_balancer_enabled {
            let panorama = self.create_optional(PANORAMA_FACTORY, &mut created);
            if let Some(panorama) = &panorama {
                panorama.set_property("panorama", PropValue::Float(config.stereo_balance));
            }
            panorama
        } else {
            None
        };

        let equalizer = if config.equalizer.enabled {
            let preamp = self.create_optional(VOLUME_FACTORY, &mut created);
            let bands = self.create_optional(EQUALIZER_FACTORY, &mut created);
            match (preamp, bands) {
                (Some(preamp), Some(bands)) => {
                    setup_equalizer_bands(&bands);
                    Some(EqualizerStage { preamp, bands })
                }
                _ => None,
            }
        } else {
            None
        };

        let replaygain = if config.replaygain.enabled {
            let rg_volume = self.create_optional(RG_VOLUME_FACTORY, &mut created);
            let rg_limiter = self.create_optional(RG_LIMITER_FACTORY, &mut created);
            let rg_converter = self.create_optional(CONVERT_FACTORY, &mut created);
            match (rg_volume, rg_limiter, rg_converter) {
                (Some(volume), Some(limiter), Some(converter)) => {
                    let rg = &config.replaygain;
                    volume.set_property("album-mode", PropValue::Int(rg.mode as i64));
                    volume.set_property("pre-amp", PropValue::Double(rg.preamp));
                    volume.set_property("fallback-gain", PropValue::Double(rg.fallback_gain));
                    limiter.set_property("enabled", PropValue::Bool(rg.compression));
                    Some([volume, limiter, converter])
                }
                _ => None,
            }
        } else {
            None
        };

        // Only time-based buffering: disable the default buffer and byte limits
        queue.set_property("max-size-buffers", PropValue::UInt(0));
        queue.set_property("max-size-bytes", PropValue::UInt(0));
        let buffer_ns = config.buffer.duration_ns();
        if buffer_ns > 0 {
            debug!(
                "Setting buffer duration: {} low watermark: {} high watermark: {}",
                buffer_ns, config.buffer.low_watermark, config.buffer.high_watermark
            );
            queue.set_property("use-buffering", PropValue::Bool(true));
            queue.set_property("max-size-time", PropValue::UInt(buffer_ns as u64));
            queue.set_property("low-watermark", PropValue::Double(config.buffer.low_watermark));
            queue.set_property("high-watermark", PropValue::Double(config.buffer.high_watermark));
        }

        let mut next = queue.clone();
        let mut event_probe_element = queue.clone();

        if let Some(stages) = &replaygain {
            for stage in stages {
                Self::link(&next, stage, None).map_err(build_failed)?;
                next = stage.clone();
            }
            event_probe_element = next.clone();
        }

        if let Some(eq) = &equalizer {
            Self::link(&next, &eq.preamp, None).map_err(build_failed)?;
            Self::link(&eq.preamp, &eq.bands, None).map_err(build_failed)?;
            next = eq.bands.clone();
        }

        if let Some(panorama) = &panorama {
            Self::link(&next, panorama, None).map_err(build_failed)?;
            next = panorama.clone();
        }

        if let Some(volume) = &volume {
            Self::link(&next, volume, None).map_err(build_failed)?;
            next = volume.clone();
        }

        Self::link(&next, &converter, None).map_err(build_failed)?;

        let channels = config.forced_channels();
        if let Some(channels) = channels {
            debug!("Setting channels to {}", channels);
        }
        Self::link(&converter, &sink, Some(&Caps::raw_audio(channels))).map_err(build_failed)?;

        Ok(GraphHandle {
            queue,
            sink,
            volume,
            panorama,
            equalizer,
            event_probe_element,
            probes: Vec::new(),
            stages: created.into_stages(),
            releaser: self.releaser.clone(),
        })
    }
}

fn build_failed(err: Error) -> Error {
    Error::GraphBuildFailed(err.to_string())
}

fn apply_device(sink: &Element, device: &OutputDevice) {
    if !device.is_set() || !sink.has_property("device") {
        return;
    }
    let value = match device {
        OutputDevice::None => return,
        OutputDevice::Name(name) => PropValue::Str(name.clone()),
        OutputDevice::Bytes(bytes) => PropValue::Bytes(bytes.clone()),
        OutputDevice::Index(index) => PropValue::Int(*index),
        OutputDevice::Uuid(uuid) => PropValue::Uuid(*uuid),
    };
    debug!("Setting {} device to {:?}", sink.name(), value);
    sink.set_property("device", value);
}

/// Lay out the bands of the filter bank
///
/// The filter bank turns its first and last bands into shelf filters, which
/// inverts the behavior of the outermost sliders. Two zero-width dummy bands
/// at 20 Hz and 20 kHz take those positions so every adjustable band is a
/// band-pass filter.
fn setup_equalizer_bands(bands: &Element) {
    bands.set_property("num-bands", PropValue::UInt(EQ_TOTAL_BANDS as u64));

    let dummies = [(0, EQ_LOW_DUMMY_FREQ), (EQ_TOTAL_BANDS - 1, EQ_HIGH_DUMMY_FREQ)];
    for (index, freq) in dummies {
        bands.set_child_property(index, "freq", PropValue::Double(freq));
        bands.set_child_property(index, "bandwidth", PropValue::Double(0.0));
        bands.set_child_property(index, "gain", PropValue::Double(0.0));
    }

    let mut last_frequency = 0u32;
    for (i, frequency) in EQ_BAND_FREQUENCIES.iter().enumerate() {
        let index = i + 1;
        let bandwidth = (frequency - last_frequency) as f64;
        last_frequency = *frequency;
        bands.set_child_property(index, "freq", PropValue::Double(*frequency as f64));
        bands.set_child_property(index, "bandwidth", PropValue::Double(bandwidth));
        bands.set_child_property(index, "gain", PropValue::Double(0.0));
    }
}

/// Preamp volume and filter bank of the equalizer
struct EqualizerStage {
    preamp: Element,
    bands: Element,
}

/// A built graph
///
/// Owns every element it created and releases them in reverse creation order
/// when dropped.
pub struct GraphHandle {
    queue: Element,
    sink: Element,
    volume: Option<Element>,
    panorama: Option<Element>,
    equalizer: Option<EqualizerStage>,
    event_probe_element: Element,
    probes: Vec<(Element, ProbeId)>,
    stages: Vec<Element>,
    releaser: Arc<dyn ElementReleaser>,
}

impl GraphHandle {
    /// First stage; decoded audio enters here
    pub fn input(&self) -> &Element {
        &self.queue
    }

    /// Buffering stage
    pub fn queue(&self) -> &Element {
        &self.queue
    }

    pub fn sink(&self) -> &Element {
        &self.sink
    }

    pub fn has_volume(&self) -> bool {
        self.volume.is_some()
    }

    pub fn has_panorama(&self) -> bool {
        self.panorama.is_some()
    }

    pub fn has_equalizer(&self) -> bool {
        self.equalizer.is_some()
    }

    /// Observe unprocessed buffers right after the queue, before any gain stage
    pub fn add_buffer_probe(&mut self, probe: BufferProbe) {
        let id = self.queue.add_buffer_probe(probe);
        self.probes.push((self.queue.clone(), id));
    }

    /// Observe stream events on the last stage before user processing
    ///
    /// That is the replaygain converter when replaygain is active, the queue
    /// otherwise.
    pub fn add_event_probe(&mut self, probe: EventProbe) {
        let id = self.event_probe_element.add_event_probe(probe);
        self.probes.push((self.event_probe_element.clone(), id));
    }

    pub fn remove_probes(&mut self) {
        for (element, id) in self.probes.drain(..) {
            element.remove_probe(id);
        }
    }

    /// Set the volume stage; false when there is none
    pub fn set_volume(&self, volume: f64) -> bool {
        match &self.volume {
            Some(element) => element.set_property("volume", PropValue::Double(volume)),
            None => false,
        }
    }

    /// Set the stereo panner; false when there is none
    pub fn set_balance(&self, balance: f32) -> bool {
        match &self.panorama {
            Some(element) => element.set_property("panorama", PropValue::Float(balance)),
            None => false,
        }
    }

    /// Push band gains and preamp to the equalizer
    ///
    /// A disabled equalizer is flattened: all gains 0 and preamp 1.0.
    pub fn set_equalizer(&self, enabled: bool, preamp: i32, band_gains: &[i32; EQ_BAND_COUNT]) -> bool {
        let Some(eq) = &self.equalizer else {
            return false;
        };

        for (i, gain) in band_gains.iter().enumerate() {
            let gain = if enabled { scale_band_gain(*gain) } else { 0.0 };
            // Index 0 is the low dummy band
            eq.bands.set_child_property(i + 1, "gain", PropValue::Double(gain));
        }

        let multiplier = if enabled { preamp_multiplier(preamp) } else { 1.0 };
        eq.preamp.set_property("volume", PropValue::Double(multiplier));
        true
    }

    /// Release all elements now
    pub fn release(&mut self) {
        self.remove_probes();
        for element in self.stages.drain(..).rev() {
            self.releaser.release(&element);
        }
    }
}

impl Drop for GraphHandle {
    fn drop(&mut self) {
        self.release();
    }
}
