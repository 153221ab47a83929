//! Serial executor for engine state changes
//!
//! Engine state changes block until the engine accepts them and may deliver
//! bus messages synchronously, so they never run on the caller's thread. Each
//! pipeline owns one worker thread; requests are executed strictly in
//! submission order so two consecutive changes cannot overtake each other.

use crate::engine::{EngineState, Player, StateChangeReturn};
use crate::error::Result;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

struct StateJob {
    target: EngineState,
    reply: oneshot::Sender<StateChangeReturn>,
}

/// Shared state between the handle and the worker thread
struct SharedQueue {
    jobs: Mutex<VecDeque<StateJob>>,
    condvar: Condvar,
    stop_flag: AtomicBool,
}

impl SharedQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<StateJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Completion of a requested state change
///
/// Resolves to the engine's answer once the change has been executed. A
/// request discarded by teardown resolves to `StateChangeReturn::Failure`.
/// Dropping the handle does not cancel the change.
pub struct StateChangeHandle {
    rx: oneshot::Receiver<StateChangeReturn>,
}

impl Future for StateChangeHandle {
    type Output = StateChangeReturn;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(StateChangeReturn::Failure))
    }
}

/// Per-pipeline state change thread
pub struct StateWorker {
    state: Arc<SharedQueue>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl StateWorker {
    /// Start the worker thread for `player`
    pub fn spawn(player: Arc<dyn Player>, label: &str) -> Result<Self> {
        let state = Arc::new(SharedQueue {
            jobs: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            stop_flag: AtomicBool::new(false),
        });

        let state_clone = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name(format!("state-{}", label))
            .spawn(move || Self::worker_loop(state_clone, player))?;

        Ok(Self {
            state,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Queue a state change
    pub fn request(&self, target: EngineState) -> StateChangeHandle {
        let (reply, rx) = oneshot::channel();
        {
            // Checked under the queue lock so shutdown cannot clear the queue
            // between the check and the push
            let mut jobs = self.state.lock();
            if self.state.stop_flag.load(Ordering::Relaxed) {
                warn!("State change to {} after shutdown ignored", target);
                // Dropping `reply` resolves the handle as a failure
                return StateChangeHandle { rx };
            }
            jobs.push_back(StateJob { target, reply });
        }
        self.state.condvar.notify_one();
        StateChangeHandle { rx }
    }

    /// Number of changes not yet started
    pub fn pending(&self) -> usize {
        self.state.lock().len()
    }

    fn worker_loop(state: Arc<SharedQueue>, player: Arc<dyn Player>) {
        debug!("State worker for {} started", player.name());

        loop {
            let job = {
                let mut jobs = state.lock();
                loop {
                    if state.stop_flag.load(Ordering::Relaxed) {
                        break None;
                    }
                    if let Some(job) = jobs.pop_front() {
                        break Some(job);
                    }
                    jobs = state
                        .condvar
                        .wait(jobs)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            };

            let Some(job) = job else {
                break;
            };

            debug!("{}: setting state {}", player.name(), job.target);
            let result = player.set_state(job.target);
            if result == StateChangeReturn::Failure {
                warn!("{}: state change to {} failed", player.name(), job.target);
            }
            let _ = job.reply.send(result);
        }

        debug!("State worker for {} stopped", player.name());
    }

    /// Stop the thread; queued changes that have not started are discarded
    ///
    /// Waits for a change in progress to finish. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut jobs = self.state.lock();
            self.state.stop_flag.store(true, Ordering::Relaxed);
            jobs.clear();
        }
        self.state.condvar.notify_all();

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // Called from a state change callback; the loop exits on its own
                return;
            }
            if let Err(e) = handle.join() {
                error!("State worker join failed: {:?}", e);
            }
        }
    }
}

impl Drop for StateWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
