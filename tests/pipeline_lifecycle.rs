//! Lifecycle controller behavior over a recording runtime double.

use anyhow::{anyhow, Result};
use std::sync::mpsc;

use streamsight::{
    GraphRuntime, KeyUnavailable, LifecycleController, PipelineEvent, RunOutcome, RunState,
};

#[derive(Default)]
struct FakeRuntime {
    starts: u32,
    shutdowns: u32,
    fail_start: bool,
    fail_shutdown: bool,
}

impl GraphRuntime for FakeRuntime {
    fn start(&mut self) -> Result<()> {
        self.starts += 1;
        if self.fail_start {
            return Err(anyhow!("injected start failure"));
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.shutdowns += 1;
        if self.fail_shutdown {
            return Err(anyhow!("injected shutdown failure"));
        }
        Ok(())
    }
}

#[test]
fn end_of_stream_drains_to_stopped() -> Result<()> {
    let (events, inbox) = mpsc::channel();
    events.send(PipelineEvent::StreamStarted)?;
    events.send(PipelineEvent::EndOfStream)?;

    let mut runtime = FakeRuntime::default();
    let mut controller = LifecycleController::new(inbox);
    let outcome = controller.run(&mut runtime)?;

    assert_eq!(outcome, RunOutcome::CleanStop);
    assert_eq!(controller.state(), RunState::Stopped);
    assert_eq!(runtime.starts, 1);
    assert_eq!(runtime.shutdowns, 1, "resources released exactly once");
    Ok(())
}

#[test]
fn warnings_are_reported_without_state_change() -> Result<()> {
    let (events, inbox) = mpsc::channel();
    events.send(PipelineEvent::StreamStarted)?;
    events.send(PipelineEvent::Warning {
        source: "decoder".to_string(),
        message: "transient decode glitch".to_string(),
    })?;
    events.send(PipelineEvent::EndOfStream)?;

    let mut runtime = FakeRuntime::default();
    let mut controller = LifecycleController::new(inbox);
    assert_eq!(controller.run(&mut runtime)?, RunOutcome::CleanStop);
    Ok(())
}

#[test]
fn missing_key_fails_the_graph() -> Result<()> {
    let (events, inbox) = mpsc::channel();
    events.send(PipelineEvent::StreamStarted)?;
    events.send(PipelineEvent::Fatal {
        source: "decrypt".to_string(),
        message: KeyUnavailable {
            key_id: "3735928559".to_string(),
        }
        .to_string(),
    })?;

    let mut runtime = FakeRuntime::default();
    let mut controller = LifecycleController::new(inbox);
    let outcome = controller.run(&mut runtime)?;

    let RunOutcome::Failed { reason } = outcome else {
        panic!("expected failure outcome");
    };
    assert!(reason.contains("no key material"));
    assert_eq!(controller.state(), RunState::Failed);
    assert_eq!(runtime.shutdowns, 1, "failure still releases resources");
    Ok(())
}

#[test]
fn fatal_during_negotiation_fails_before_active() -> Result<()> {
    let (events, inbox) = mpsc::channel();
    events.send(PipelineEvent::Fatal {
        source: "source".to_string(),
        message: "connection refused".to_string(),
    })?;

    let mut runtime = FakeRuntime::default();
    let mut controller = LifecycleController::new(inbox);
    assert!(matches!(
        controller.run(&mut runtime)?,
        RunOutcome::Failed { .. }
    ));
    assert_eq!(controller.state(), RunState::Failed);
    Ok(())
}

#[test]
fn operator_interrupt_is_a_clean_stop() -> Result<()> {
    let (events, inbox) = mpsc::channel();
    events.send(PipelineEvent::StreamStarted)?;
    events.send(PipelineEvent::Interrupt)?;

    let mut runtime = FakeRuntime::default();
    let mut controller = LifecycleController::new(inbox);
    assert_eq!(controller.run(&mut runtime)?, RunOutcome::CleanStop);
    assert_eq!(controller.state(), RunState::Stopped);
    assert_eq!(runtime.shutdowns, 1);
    Ok(())
}

#[test]
fn eos_before_first_buffer_still_stops_cleanly() -> Result<()> {
    let (events, inbox) = mpsc::channel();
    events.send(PipelineEvent::EndOfStream)?;

    let mut runtime = FakeRuntime::default();
    let mut controller = LifecycleController::new(inbox);
    assert_eq!(controller.run(&mut runtime)?, RunOutcome::CleanStop);
    assert_eq!(controller.state(), RunState::Stopped);
    Ok(())
}

#[test]
fn start_failure_releases_resources_and_fails() -> Result<()> {
    let (_events, inbox) = mpsc::channel();
    let mut runtime = FakeRuntime {
        fail_start: true,
        ..FakeRuntime::default()
    };
    let mut controller = LifecycleController::new(inbox);
    assert!(matches!(
        controller.run(&mut runtime)?,
        RunOutcome::Failed { .. }
    ));
    assert_eq!(controller.state(), RunState::Failed);
    assert_eq!(runtime.shutdowns, 1);
    Ok(())
}

#[test]
fn shutdown_failure_during_drain_is_a_failure() -> Result<()> {
    let (events, inbox) = mpsc::channel();
    events.send(PipelineEvent::StreamStarted)?;
    events.send(PipelineEvent::EndOfStream)?;

    let mut runtime = FakeRuntime {
        fail_shutdown: true,
        ..FakeRuntime::default()
    };
    let mut controller = LifecycleController::new(inbox);
    assert!(matches!(
        controller.run(&mut runtime)?,
        RunOutcome::Failed { .. }
    ));
    assert_eq!(controller.state(), RunState::Failed);
    Ok(())
}

#[test]
fn closed_event_channel_fails_rather_than_hangs() -> Result<()> {
    let (events, inbox) = mpsc::channel();
    drop(events);

    let mut runtime = FakeRuntime::default();
    let mut controller = LifecycleController::new(inbox);
    assert!(matches!(
        controller.run(&mut runtime)?,
        RunOutcome::Failed { .. }
    ));
    assert_eq!(runtime.shutdowns, 1);
    Ok(())
}
