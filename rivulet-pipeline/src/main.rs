//! Pipeline simulator (rivulet-sim) - Main entry point
//!
//! Builds one pipeline from the configured settings on the in-process
//! simulated engine, plays synthetic audio through it, fades it out and logs
//! every event the pipeline reports.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rivulet_common::time::{frames_to_ns, ms_to_ns, ns_to_duration, ns_to_ms};
use rivulet_common::FadeCurve;
use rivulet_pipeline::bus::BusMessageKind;
use rivulet_pipeline::config::TomlSettings;
use rivulet_pipeline::consumers::BufferConsumer;
use rivulet_pipeline::engine::sim::SimEngine;
use rivulet_pipeline::engine::EngineState;
use rivulet_pipeline::fader::FadeDirection;
use rivulet_pipeline::format::AudioBuffer;
use rivulet_pipeline::timeline::Segment;
use rivulet_pipeline::{PipelineEvent, PipelineFactory, PipelineId};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SAMPLE_RATE: u32 = 44100;
const CHANNELS: u32 = 2;
const FRAMES_PER_BUFFER: u64 = 882;

/// Command-line arguments for rivulet-sim
#[derive(Parser, Debug)]
#[command(name = "rivulet-sim")]
#[command(about = "Drive a playback pipeline against the simulated engine")]
#[command(version)]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long, env = "RIVULET_CONFIG")]
    config: Option<PathBuf>,

    /// Location to play
    #[arg(short, long, default_value = "file:///tmp/rivulet-demo.flac")]
    url: String,

    /// Number of 20 ms buffers to push
    #[arg(short, long, default_value = "50")]
    buffers: u64,

    /// Stop position in milliseconds; 0 plays every buffer
    #[arg(short, long, default_value = "0")]
    end_ms: i64,

    /// Fade-out length in milliseconds
    #[arg(long, default_value = "400")]
    fade_ms: u64,

    /// Fade-out curve
    #[arg(long, default_value = "linear")]
    curve: String,
}

fn parse_curve(name: &str) -> Result<FadeCurve> {
    FadeCurve::from_str(name).with_context(|| {
        let known: Vec<String> = FadeCurve::all_variants()
            .iter()
            .map(|curve| format!("{:?}", curve).to_lowercase())
            .collect();
        format!("Unknown fade curve '{}' (expected one of {})", name, known.join(", "))
    })
}

/// Peak level of everything played
#[derive(Default)]
struct PeakMeter {
    buffers: AtomicUsize,
    peak: AtomicI32,
}

impl BufferConsumer for PeakMeter {
    fn consume_buffer(&self, buffer: &AudioBuffer, _pipeline: PipelineId, _format: &str) {
        let peak = buffer
            .samples_s16()
            .iter()
            .map(|s| (*s as i32).abs())
            .max()
            .unwrap_or(0);
        self.peak.fetch_max(peak, Ordering::Relaxed);
        self.buffers.fetch_add(1, Ordering::Relaxed);
    }
}

/// One buffer of a 440 Hz sine in 32-bit integer samples
fn sine_buffer(index: u64) -> AudioBuffer {
    let first_frame = index * FRAMES_PER_BUFFER;
    let mut data = Vec::with_capacity((FRAMES_PER_BUFFER * CHANNELS as u64 * 4) as usize);
    for frame in first_frame..first_frame + FRAMES_PER_BUFFER {
        let t = frame as f64 / SAMPLE_RATE as f64;
        let sample = ((t * 440.0 * std::f64::consts::TAU).sin() * 0.5 * i32::MAX as f64) as i32;
        for _ in 0..CHANNELS {
            data.extend_from_slice(&sample.to_le_bytes());
        }
    }

    AudioBuffer {
        data,
        format: "S32LE".to_string(),
        channels: CHANNELS,
        rate: SAMPLE_RATE,
        timestamp: Some(frames_to_ns(first_frame, SAMPLE_RATE)),
        duration: Some(frames_to_ns(FRAMES_PER_BUFFER, SAMPLE_RATE)),
    }
}

fn log_event(event: &PipelineEvent) {
    match serde_json::to_string(event) {
        Ok(json) => info!("Event: {}", json),
        Err(e) => warn!("Cannot serialize event {:?}: {}", event, e),
    }
}

/// Log events until the fader finished or nothing arrives for a while
async fn drain_events(events: &mut broadcast::Receiver<PipelineEvent>) {
    loop {
        match tokio::time::timeout(Duration::from_secs(3), events.recv()).await {
            Ok(Ok(event)) => {
                log_event(&event);
                if matches!(event, PipelineEvent::FaderFinished { .. }) {
                    return;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                warn!("Skipped {} events", skipped);
            }
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rivulet_pipeline=debug,rivulet_sim=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let curve = parse_curve(&args.curve)?;

    let settings = TomlSettings::discover(args.config.as_deref());
    match settings.path() {
        Some(path) => info!("Settings file: {}", path.display()),
        None => info!("No settings file, using defaults"),
    }

    let engine = SimEngine::new();
    let factory = PipelineFactory::new(Arc::new(engine.clone()), Arc::new(settings))
        .context("Failed to load pipeline settings")?;

    let meter = Arc::new(PeakMeter::default());
    factory.add_buffer_consumer(meter.clone());
    let mut events = factory.subscribe();

    let pipeline = factory
        .load(&args.url, &args.url, ms_to_ns(args.end_ms))
        .context("Failed to build pipeline")?;
    info!("Pipeline {} bound to {}", pipeline.id(), pipeline.url());

    let result = pipeline.set_state(EngineState::Playing).await;
    info!("Playing: {:?} ({})", result, pipeline.lifecycle());

    let player = engine
        .last_player()
        .context("Simulated engine has no player")?;
    let pad = player.emit_pad_added();
    pad.push_segment(Segment::starting_at(0));

    for index in 0..args.buffers {
        pad.push_buffer(&sine_buffer(index));
    }
    if args.end_ms <= 0 {
        player.post_own(BusMessageKind::Eos);
    }

    pipeline.start_fader(
        Duration::from_millis(args.fade_ms),
        FadeDirection::Backward,
        curve,
        false,
    );
    drain_events(&mut events).await;

    info!(
        "Stopped at {:?} of {} ms",
        ns_to_duration(pipeline.position()),
        ns_to_ms(pipeline.length())
    );
    info!(
        "Consumers saw {} buffers, peak {}",
        meter.buffers.load(Ordering::Relaxed),
        meter.peak.load(Ordering::Relaxed)
    );

    pipeline.shutdown();
    info!("Pipeline {} finished ({})", pipeline.id(), pipeline.lifecycle());
    Ok(())
}
