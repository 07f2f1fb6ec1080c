//! Async driver for the loading animation.
//!
//! Runs a [`PhaseMachine`] on its own task: every progress value from the
//! subscription is observed in order, and the task sleeps until the
//! machine's next deadline in between. Frames are published on a watch
//! channel; phase transitions also go out on a broadcast channel.

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use ts_rs::TS;

use crate::domain::phase::{AnimationPhase, PhaseFrame, PhaseMachine, PhaseSchedule};
use crate::domain::progress::{ProgressSignal, ProgressSubscription};

const PHASE_CHANGE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct PhaseChange {
    pub from: AnimationPhase,
    pub to: AnimationPhase,
    pub progress: f64,
}

#[derive(Debug)]
enum Command {
    SetViewportWidth(u32),
}

/// Handle to a running animator task. Dropping it stops the task.
#[derive(Debug)]
pub struct PhaseAnimator {
    frames: watch::Receiver<PhaseFrame>,
    changes: broadcast::Sender<PhaseChange>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PhaseAnimator {
    /// Start animating `signal`. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(signal: &ProgressSignal, schedule: PhaseSchedule) -> Self {
        let machine = PhaseMachine::new(schedule);
        let (frame_tx, frames) = watch::channel(machine.frame());
        let (changes, _) = broadcast::channel(PHASE_CHANGE_CAPACITY);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let driver = Driver {
            machine,
            subscription: signal.subscribe(),
            frame_tx,
            changes: changes.clone(),
            commands: command_rx,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(driver.run());

        Self {
            frames,
            changes,
            commands,
            shutdown,
            task: Some(task),
        }
    }

    #[must_use]
    pub fn frames(&self) -> watch::Receiver<PhaseFrame> {
        self.frames.clone()
    }

    #[must_use]
    pub fn current(&self) -> PhaseFrame {
        self.frames.borrow().clone()
    }

    #[must_use]
    pub fn phase_changes(&self) -> broadcast::Receiver<PhaseChange> {
        self.changes.subscribe()
    }

    /// Recompute geometry for a new viewport width. Timers are untouched.
    pub fn set_viewport_width(&self, width_px: u32) {
        let _ = self.commands.send(Command::SetViewportWidth(width_px));
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the task and wait for it. Pending timers never fire afterwards.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PhaseAnimator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Driver {
    machine: PhaseMachine,
    subscription: ProgressSubscription,
    frame_tx: watch::Sender<PhaseFrame>,
    changes: broadcast::Sender<PhaseChange>,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
}

impl Driver {
    async fn run(mut self) {
        let mut signal_open = true;
        let mut phase = self.machine.phase();

        loop {
            let deadline = self.machine.next_deadline();
            if !signal_open && deadline.is_none() {
                break;
            }

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                value = self.subscription.next(), if signal_open => match value {
                    Some(value) => {
                        trace!(value, "progress observed");
                        self.machine.observe(value, Instant::now());
                    }
                    None => signal_open = false,
                },
                Some(command) = self.commands.recv() => match command {
                    Command::SetViewportWidth(width_px) => {
                        self.machine.set_viewport_width(width_px);
                    }
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.machine.advance(Instant::now());
                }
                else => break,
            }

            phase = self.publish(phase);
        }

        let cancelled = self.machine.teardown();
        debug!(cancelled, "Phase animator stopped");
    }

    fn publish(&self, previous: AnimationPhase) -> AnimationPhase {
        let frame = self.machine.frame();
        let phase = frame.phase;
        if phase != previous {
            debug!(from = %previous, to = %phase, progress = frame.progress, "Phase change");
            let _ = self.changes.send(PhaseChange {
                from: previous,
                to: phase,
                progress: frame.progress,
            });
        }
        self.frame_tx.send_if_modified(|current| {
            if *current == frame {
                false
            } else {
                *current = frame;
                true
            }
        });
        phase
    }
}
