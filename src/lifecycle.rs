//! Pipeline lifecycle.
//!
//! One controller owns the authoritative run state and is the only component
//! allowed to request transitions. It blocks on a single event channel fed
//! by the media runtime (bus messages), the key provider (fatal escalation),
//! and the operator interrupt handler. Warnings are reported and processing
//! continues; end-of-stream drains cleanly; fatal errors fail the whole
//! graph. On every exit path the runtime is driven to its null resource
//! state before control returns.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{Receiver, Sender};

use crate::runtime::GraphRuntime;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Negotiating,
    Active,
    Draining,
    Stopped,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Stopped | RunState::Failed)
    }

    fn permits(self, to: RunState) -> bool {
        matches!(
            (self, to),
            (RunState::Idle, RunState::Negotiating)
                | (RunState::Negotiating, RunState::Active)
                | (RunState::Negotiating, RunState::Draining)
                | (RunState::Active, RunState::Draining)
                | (RunState::Draining, RunState::Stopped)
        ) || (to == RunState::Failed && !self.is_terminal())
    }
}

/// Messages on the process-wide event channel. Runtime errors surface here,
/// never as return values from data-plane callbacks.
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// The underlying runtime acknowledged that data is flowing.
    StreamStarted,
    EndOfStream,
    /// Recoverable; reported, no state change.
    Warning { source: String, message: String },
    /// Unrecoverable; fails the whole graph.
    Fatal { source: String, message: String },
    /// Operator-requested shutdown.
    Interrupt,
}

pub type EventSender = Sender<PipelineEvent>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Clean stream end or operator stop. Process exit code 0.
    CleanStop,
    /// Any failure path. Process exit code non-zero.
    Failed { reason: String },
}

pub struct LifecycleController {
    state: RunState,
    events: Receiver<PipelineEvent>,
}

impl LifecycleController {
    pub fn new(events: Receiver<PipelineEvent>) -> Self {
        Self {
            state: RunState::Idle,
            events,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, to: RunState) -> Result<()> {
        if !self.state.permits(to) {
            return Err(anyhow!(
                "invalid run state transition {:?} -> {:?}",
                self.state,
                to
            ));
        }
        log::info!("run state: {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Drive the graph from start to a terminal state.
    ///
    /// Blocks on the event channel between lifecycle-relevant messages; all
    /// other work happens inside runtime callbacks.
    pub fn run(&mut self, runtime: &mut dyn GraphRuntime) -> Result<RunOutcome> {
        self.transition(RunState::Negotiating)?;
        if let Err(e) = runtime.start() {
            return Ok(self.fail(runtime, format!("pipeline start failed: {:#}", e)));
        }

        loop {
            let event = match self.events.recv() {
                Ok(event) => event,
                Err(_) => {
                    return Ok(self.fail(
                        runtime,
                        "event channel closed while pipeline was running".to_string(),
                    ));
                }
            };
            match event {
                PipelineEvent::StreamStarted => {
                    if self.state == RunState::Negotiating {
                        self.transition(RunState::Active)?;
                    }
                }
                PipelineEvent::Warning { source, message } => {
                    log::warn!("{}: {}", source, message);
                }
                PipelineEvent::EndOfStream => {
                    log::info!("end of stream");
                    return self.drain(runtime);
                }
                PipelineEvent::Interrupt => {
                    log::info!("operator interrupt, shutting down");
                    return self.drain(runtime);
                }
                PipelineEvent::Fatal { source, message } => {
                    return Ok(self.fail(runtime, format!("{}: {}", source, message)));
                }
            }
        }
    }

    fn drain(&mut self, runtime: &mut dyn GraphRuntime) -> Result<RunOutcome> {
        self.transition(RunState::Draining)?;
        match runtime.shutdown() {
            Ok(()) => {
                self.transition(RunState::Stopped)?;
                Ok(RunOutcome::CleanStop)
            }
            Err(e) => {
                let reason = format!("shutdown during drain failed: {:#}", e);
                log::error!("{}", reason);
                log::info!("run state: {:?} -> Failed", self.state);
                self.state = RunState::Failed;
                Ok(RunOutcome::Failed { reason })
            }
        }
    }

    /// Fail the graph: release runtime resources, then report. Failure always
    /// reaches the null resource state before returning to the caller.
    fn fail(&mut self, runtime: &mut dyn GraphRuntime, reason: String) -> RunOutcome {
        log::error!("{}", reason);
        if !self.state.is_terminal() {
            log::info!("run state: {:?} -> Failed", self.state);
            self.state = RunState::Failed;
        }
        if let Err(e) = runtime.shutdown() {
            log::error!("resource release after failure also failed: {:#}", e);
        }
        RunOutcome::Failed { reason }
    }
}
