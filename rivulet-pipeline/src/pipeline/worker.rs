//! Per-pipeline command worker
//!
//! A tokio task consuming an unbounded command queue. Deferred seeks queued
//! by engine callbacks are retried here, and the task owns the active fader:
//! it advances the ramp on a fixed tick, applies the resulting volume
//! modifier and reports completion after the settle delay.

use super::Shared;
use crate::events::PipelineEvent;
use crate::fader::{FadeDirection, Fader, FADER_TICK};
use rivulet_common::FadeCurve;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

#[derive(Debug)]
pub(crate) enum Command {
    /// Retry a seek that was deferred
    Seek(i64),
    StartFader {
        duration: Duration,
        direction: FadeDirection,
        curve: FadeCurve,
        use_settle_delay: bool,
    },
    /// Reply once every earlier command has been handled
    Sync(oneshot::Sender<()>),
    Shutdown,
}

/// Fader bookkeeping owned by the worker
#[derive(Default)]
struct FaderSlot {
    fader: Option<Fader>,
    last_tick: Option<Instant>,
    next_tick: Option<Instant>,
    settle_deadline: Option<Instant>,
}

impl FaderSlot {
    fn start(
        &mut self,
        shared: &Shared,
        duration: Duration,
        direction: FadeDirection,
        curve: FadeCurve,
        use_settle_delay: bool,
    ) {
        let fader = Fader::start(
            duration,
            direction,
            curve,
            use_settle_delay,
            self.fader.as_ref(),
        );
        // A new ramp cancels a pending completion of the previous one
        self.settle_deadline = None;
        shared.set_volume_modifier(fader.value());

        let now = Instant::now();
        if fader.is_running() {
            self.last_tick = Some(now);
            self.next_tick = Some(now + FADER_TICK);
            self.fader = Some(fader);
        } else {
            self.finish(now, &fader);
        }
    }

    fn tick(&mut self, shared: &Shared) {
        let now = Instant::now();
        let elapsed = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or(FADER_TICK);
        self.last_tick = Some(now);

        let Some(fader) = self.fader.as_mut() else {
            self.next_tick = None;
            return;
        };
        let finished = fader.advance(elapsed);
        shared.set_volume_modifier(fader.value());

        if finished {
            if let Some(fader) = self.fader.take() {
                self.finish(now, &fader);
            }
        } else {
            self.next_tick = Some(now + FADER_TICK);
        }
    }

    fn finish(&mut self, now: Instant, fader: &Fader) {
        self.fader = None;
        self.next_tick = None;
        self.last_tick = None;
        self.settle_deadline = Some(now + fader.settle_delay());
    }
}

/// Worker loop; ends on `Shutdown`, when the queue closes or when the
/// pipeline is gone
pub(crate) async fn run(shared: Weak<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut slot = FaderSlot::default();

    loop {
        let tick_at = slot.next_tick;
        let settle_at = slot.settle_deadline;

        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                match command {
                    Command::Seek(position) => {
                        debug!("Pipeline {}: retrying deferred seek to {}", shared.id, position);
                        shared.seek(position);
                    }
                    Command::StartFader {
                        duration,
                        direction,
                        curve,
                        use_settle_delay,
                    } => {
                        debug!(
                            "Pipeline {}: fader {:?} over {:?} ({})",
                            shared.id, direction, duration, curve
                        );
                        slot.start(&shared, duration, direction, curve, use_settle_delay);
                    }
                    Command::Sync(reply) => {
                        let _ = reply.send(());
                    }
                    Command::Shutdown => break,
                }
            }
            _ = sleep_until(tick_at.unwrap_or_else(Instant::now)), if tick_at.is_some() => {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                slot.tick(&shared);
            }
            _ = sleep_until(settle_at.unwrap_or_else(Instant::now)), if settle_at.is_some() => {
                slot.settle_deadline = None;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                debug!("Pipeline {}: fader finished", shared.id);
                shared.emit(PipelineEvent::FaderFinished { id: shared.id });
            }
        }
    }

    debug!("Pipeline command worker stopped");
}
