// src/core/debugger/session.rs
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::{ExecFlowError, Result};
use super::process::{DebuggerProcess, ProcessControl};
use super::protocol::{Command, Location, Report, ReportParser};
use super::reader::{spawn_reader, DebuggerEvent, StreamKind};
use super::trace::{CallSite, RawTrace, SessionPlan, StepDecision, TraceRecorder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    AwaitingBreakpointAck,
    Running,
    AtBreakpoint,
    Stepping,
    Continuing,
    Exiting,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The debuggee ran to completion
    Completed,
    /// No debugger output within the idle timeout, or the session ran
    /// past its maximum duration
    Truncated,
    /// The debugger went away without reporting an exit
    Crashed,
    Cancelled,
}

/// Everything a session recorded, however it ended
#[derive(Debug)]
pub struct SessionOutcome {
    pub traces: Vec<RawTrace>,
    pub status: SessionStatus,
    /// Why the session did not complete
    pub failure: Option<ExecFlowError>,
}

impl SessionOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub max_duration: Duration,
    pub kill_grace: Duration,
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            max_duration: Duration::from_millis(config.max_duration_ms),
            kill_grace: Duration::from_millis(config.kill_grace_ms),
        }
    }
}

/// Steps a test through `jdb`, recording the lines executed inside the
/// tracked elements of a [`SessionPlan`].
///
/// Two reader tasks forward the debugger's stdout and stderr into one
/// channel; this driver is the only consumer and the only writer of
/// commands, so every decision sees events in the order they were printed.
pub struct DebuggerSessionDriver {
    plan: SessionPlan,
    settings: SessionSettings,
    parser: ReportParser,
    cancel: CancellationToken,
}

impl DebuggerSessionDriver {
    pub fn new(plan: SessionPlan, settings: SessionSettings) -> Result<Self> {
        if plan.tracked.is_empty() {
            return Err(ExecFlowError::Configuration(
                "debugger session has no elements to track".to_string(),
            ));
        }

        Ok(Self {
            plan,
            settings,
            parser: ReportParser::new()?,
            cancel: CancellationToken::new(),
        })
    }

    /// Abort on `token` instead of a private one
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that aborts [`run`](Self::run) when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self, process: DebuggerProcess) -> Result<SessionOutcome> {
        let DebuggerProcess {
            requests,
            responses,
            errors,
            mut control,
        } = process;

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let readers = [
            spawn_reader(
                responses,
                StreamKind::Responses,
                Some(self.parser.clone()),
                events_tx.clone(),
            ),
            spawn_reader(errors, StreamKind::Errors, None, events_tx),
        ];

        let mut session = Session {
            state: SessionState::Starting,
            parser: self.parser,
            requests: Some(requests),
            recorder: TraceRecorder::new(self.plan),
            pending_acks: 0,
            pending_stop: None,
            frames: 0,
            caller: None,
        };

        // A tracked element stuck in a loop keeps the debugger busy forever,
        // so the idle timeout alone never fires
        let overrun = tokio::time::sleep(self.settings.max_duration);
        tokio::pin!(overrun);

        let (status, failure) = loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Debugger session cancelled");
                    break (SessionStatus::Cancelled, None);
                }
                _ = &mut overrun => {
                    let entries = session.recorder.entry_count();
                    warn!(
                        "Debugger session exceeded {:?} in state {:?}; truncating after {} entries",
                        self.settings.max_duration, session.state, entries
                    );
                    break (
                        SessionStatus::Truncated,
                        Some(ExecFlowError::SessionTimeout {
                            limit_ms: self.settings.max_duration.as_millis() as u64,
                            stalled: false,
                            entries,
                        }),
                    );
                }
                received = tokio::time::timeout(self.settings.idle_timeout, events.recv()) => {
                    match received {
                        Ok(Some(event)) => event,
                        Ok(None) => break (
                            SessionStatus::Crashed,
                            Some(ExecFlowError::ProcessCrash("debugger streams closed".to_string())),
                        ),
                        Err(_) => {
                            let entries = session.recorder.entry_count();
                            warn!(
                                "Debugger idle for {:?} in state {:?}; truncating after {} entries",
                                self.settings.idle_timeout, session.state, entries
                            );
                            break (
                                SessionStatus::Truncated,
                                Some(ExecFlowError::SessionTimeout {
                                    limit_ms: self.settings.idle_timeout.as_millis() as u64,
                                    stalled: true,
                                    entries,
                                }),
                            );
                        }
                    }
                }
            };

            match session.handle(event).await {
                Ok(Some(status)) => break (status, None),
                Ok(None) => {}
                Err(e) => {
                    warn!("Debugger session failed: {}", e);
                    break (SessionStatus::Crashed, Some(e));
                }
            }
        };

        session.state = SessionState::Terminated;
        // Closing stdin lets jdb exit on its own before it is killed
        session.requests.take();
        shutdown(control.as_mut(), self.settings.kill_grace).await;
        for reader in &readers {
            reader.abort();
        }
        events.close();

        let traces = session.recorder.finish(status != SessionStatus::Completed);
        info!(
            "Debugger session {:?}: {} invocation(s) traced",
            status,
            traces.len()
        );
        Ok(SessionOutcome {
            traces,
            status,
            failure,
        })
    }
}

async fn shutdown(control: &mut dyn ProcessControl, grace: Duration) {
    if !control.is_running() || control.wait_for_exit(grace).await {
        return;
    }
    debug!("Debugger still running after {:?}; killing it", grace);
    if let Err(e) = control.stop().await {
        warn!("Failed to kill debugger: {}", e);
    }
}

struct Session {
    state: SessionState,
    parser: ReportParser,
    requests: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    recorder: TraceRecorder,
    pending_acks: usize,
    pending_stop: Option<Location>,
    frames: usize,
    caller: Option<CallSite>,
}

impl Session {
    /// Advance the state machine; `Some(status)` ends the session
    async fn handle(&mut self, event: DebuggerEvent) -> Result<Option<SessionStatus>> {
        match event {
            DebuggerEvent::Line {
                stream: StreamKind::Errors,
                text,
            } => {
                debug!("jdb stderr: {}", text);
                Ok(None)
            }
            DebuggerEvent::Line {
                stream: StreamKind::Responses,
                text,
            } => self.on_report(&text).await,
            DebuggerEvent::Prompt(prompt) => {
                self.on_prompt(&prompt).await?;
                Ok(None)
            }
            DebuggerEvent::Closed(StreamKind::Errors) => Ok(None),
            DebuggerEvent::Closed(StreamKind::Responses) => Err(ExecFlowError::ProcessCrash(
                format!("debugger output closed while {:?}", self.state),
            )),
        }
    }

    async fn on_report(&mut self, line: &str) -> Result<Option<SessionStatus>> {
        match self.parser.parse(line) {
            Report::Exited => {
                info!("Debuggee exited");
                self.state = SessionState::Exiting;
                return Ok(Some(SessionStatus::Completed));
            }
            Report::BreakpointAck {
                class_name,
                line,
                accepted,
            } if self.state == SessionState::AwaitingBreakpointAck => {
                if !accepted {
                    warn!("jdb refused breakpoint {}:{}", class_name, line);
                }
                self.pending_acks = self.pending_acks.saturating_sub(1);
                if self.pending_acks == 0 {
                    self.send(Command::Run).await?;
                    self.state = SessionState::Running;
                }
            }
            Report::Stopped(location) => {
                trace!("Stopped at {}:{}", location.signature(), location.line);
                self.pending_stop = Some(location);
                self.frames = 0;
            }
            Report::Frame { index, frame, line } if self.state == SessionState::AtBreakpoint => {
                trace!("Frame [{}] {}", index, frame);
                self.frames = self.frames.max(index);
                if index == 2 {
                    self.caller = line.map(|line| CallSite { frame, line });
                }
            }
            other => trace!("jdb: {:?}", other),
        }
        Ok(None)
    }

    async fn on_prompt(&mut self, prompt: &str) -> Result<()> {
        match self.state {
            SessionState::Starting => {
                let breakpoints: Vec<Command> = self
                    .recorder
                    .plan()
                    .tracked
                    .iter()
                    .map(|t| Command::StopAt {
                        class_name: t.key.class_name.clone(),
                        line: t.entry_line,
                    })
                    .collect();
                self.pending_acks = breakpoints.len();
                self.state = SessionState::AwaitingBreakpointAck;
                for command in breakpoints {
                    self.send(command).await?;
                }
            }
            SessionState::Running | SessionState::Stepping | SessionState::Continuing
                if self.pending_stop.is_some() && self.parser.is_thread_prompt(prompt) =>
            {
                self.frames = 0;
                self.caller = None;
                self.send(Command::Where).await?;
                self.state = SessionState::AtBreakpoint;
            }
            SessionState::AtBreakpoint if self.parser.is_thread_prompt(prompt) => {
                let Some(location) = self.pending_stop.take() else {
                    return Err(ExecFlowError::Protocol(
                        "stack reported without a stop".to_string(),
                    ));
                };
                if self.frames == 0 {
                    return Err(ExecFlowError::Protocol(format!(
                        "no stack frames reported at {}:{}",
                        location.signature(),
                        location.line
                    )));
                }

                let decision = self
                    .recorder
                    .on_stop(&location, self.frames, self.caller.take());
                let (command, next) = match decision {
                    StepDecision::StepInto => (Command::Step, SessionState::Stepping),
                    StepDecision::StepOut => (Command::StepUp, SessionState::Stepping),
                    StepDecision::Continue => (Command::Cont, SessionState::Continuing),
                };
                self.send(command).await?;
                self.state = next;
            }
            _ => {}
        }
        Ok(())
    }

    async fn send(&mut self, command: Command) -> Result<()> {
        let Some(requests) = self.requests.as_mut() else {
            return Err(ExecFlowError::ProcessCrash("request channel closed".to_string()));
        };
        debug!("jdb <- {}", command);
        requests
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .map_err(|e| ExecFlowError::ProcessCrash(format!("failed to send '{}': {}", command, e)))?;
        requests
            .flush()
            .await
            .map_err(|e| ExecFlowError::ProcessCrash(format!("failed to send '{}': {}", command, e)))?;
        Ok(())
    }
}
