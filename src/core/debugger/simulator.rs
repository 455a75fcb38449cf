// src/core/debugger/simulator.rs
//! In-process stand-in for `jdb` that replays a scripted execution.
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::Result;
use super::process::{DebuggerProcess, ProcessControl};

/// One line the debuggee executes, with the stack depth at that point
#[derive(Debug, Clone)]
pub struct ExecutionPoint {
    pub class_name: String,
    pub method_name: String,
    pub line: usize,
    pub depth: usize,
}

pub fn at(class_name: &str, method_name: &str, line: usize, depth: usize) -> ExecutionPoint {
    ExecutionPoint {
        class_name: class_name.to_string(),
        method_name: method_name.to_string(),
        line,
        depth,
    }
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Keep reading commands but stop answering
    Stall(usize),
    /// Close stdout as if the process died
    Crash(usize),
    /// Stop reading entirely and never exit on its own
    Hang(usize),
}

pub struct ScriptedDebugger {
    points: Vec<ExecutionPoint>,
    fault: Option<Fault>,
}

/// What the test can inspect after the session
pub struct SimulatorHandle {
    commands: Arc<Mutex<Vec<String>>>,
    killed: Arc<AtomicBool>,
}

impl SimulatorHandle {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

impl ScriptedDebugger {
    pub fn new(points: Vec<ExecutionPoint>) -> Self {
        Self { points, fault: None }
    }

    /// Answer the first `n` commands only
    pub fn stall_after(mut self, n: usize) -> Self {
        self.fault = Some(Fault::Stall(n));
        self
    }

    pub fn crash_after(mut self, n: usize) -> Self {
        self.fault = Some(Fault::Crash(n));
        self
    }

    pub fn hang_after(mut self, n: usize) -> Self {
        self.fault = Some(Fault::Hang(n));
        self
    }

    pub fn spawn(self) -> (DebuggerProcess, SimulatorHandle) {
        let (requests, jdb_stdin) = tokio::io::duplex(4096);
        let (jdb_stdout, responses) = tokio::io::duplex(4096);
        let (jdb_stderr, errors) = tokio::io::duplex(1024);
        let (exit_tx, exit_rx) = oneshot::channel();

        let commands = Arc::new(Mutex::new(Vec::new()));
        let killed = Arc::new(AtomicBool::new(false));

        let script = Script {
            points: self.points,
            breakpoints: HashSet::new(),
            position: None,
        };
        let task = tokio::spawn(serve(
            script,
            self.fault,
            commands.clone(),
            jdb_stdin,
            jdb_stdout,
            jdb_stderr,
            exit_tx,
        ));

        let process = DebuggerProcess {
            requests: Box::new(requests),
            responses: Box::new(responses),
            errors: Box::new(errors),
            control: Box::new(SimulatedControl {
                task,
                exited: exit_rx,
                done: false,
                killed: killed.clone(),
            }),
        };
        (process, SimulatorHandle { commands, killed })
    }
}

async fn serve(
    mut script: Script,
    fault: Option<Fault>,
    commands: Arc<Mutex<Vec<String>>>,
    stdin: DuplexStream,
    mut stdout: DuplexStream,
    _stderr: DuplexStream,
    exit: oneshot::Sender<()>,
) {
    if stdout.write_all(b"Initializing jdb ...\n> ").await.is_ok() {
        let mut lines = BufReader::new(stdin).lines();
        let mut received = 0;

        while let Ok(Some(command)) = lines.next_line().await {
            received += 1;
            commands.lock().unwrap().push(command.clone());

            match fault {
                Some(Fault::Stall(n)) if received > n => continue,
                Some(Fault::Crash(n)) if received > n => break,
                Some(Fault::Hang(n)) if received > n => std::future::pending::<()>().await,
                _ => {}
            }

            let (reply, finished) = script.respond(command.trim());
            if stdout.write_all(reply.as_bytes()).await.is_err() || finished {
                break;
            }
        }
    }

    drop(stdout);
    let _ = exit.send(());
}

struct Script {
    points: Vec<ExecutionPoint>,
    breakpoints: HashSet<(String, usize)>,
    position: Option<usize>,
}

impl Script {
    fn respond(&mut self, command: &str) -> (String, bool) {
        if let Some(target) = command.strip_prefix("stop at ") {
            let parsed = target
                .rsplit_once(':')
                .and_then(|(class, line)| Some((class.to_string(), line.parse().ok()?)));
            return match parsed {
                Some(breakpoint) => {
                    self.breakpoints.insert(breakpoint);
                    (
                        format!(
                            "Deferring breakpoint {}.\nIt will be set after the class is loaded.\n> ",
                            target
                        ),
                        false,
                    )
                }
                None => ("Usage: stop at <class>:<line>\n> ".to_string(), false),
            };
        }

        let next = self.position.map_or(0, |p| p + 1);
        match command {
            "run" => {
                let (report, finished) = self.suspend(self.next_breakpoint(0));
                (format!("> \nVM Started: \n{}", report), finished)
            }
            "cont" => self.suspend(self.next_breakpoint(next)),
            "step" => self.suspend((next < self.points.len()).then_some(next)),
            "step up" => {
                let depth = self.position.map_or(0, |p| self.points[p].depth);
                let caller = (next..self.points.len()).find(|&i| self.points[i].depth < depth);
                self.suspend(caller)
            }
            "where" => (self.frames(), false),
            "exit" => (String::new(), true),
            other => (
                format!("Unrecognized command: '{}'.  Try help...\n> ", other),
                false,
            ),
        }
    }

    fn next_breakpoint(&self, from: usize) -> Option<usize> {
        (from..self.points.len()).find(|&i| {
            let point = &self.points[i];
            self.breakpoints
                .contains(&(point.class_name.clone(), point.line))
        })
    }

    fn suspend(&mut self, index: Option<usize>) -> (String, bool) {
        let Some(index) = index else {
            self.position = None;
            return ("\nThe application exited\n".to_string(), true);
        };

        self.position = Some(index);
        let point = &self.points[index];
        let kind = if self
            .breakpoints
            .contains(&(point.class_name.clone(), point.line))
        {
            "Breakpoint hit"
        } else {
            "Step completed"
        };
        (
            format!(
                "\n{}: \"thread=main\", {}.{}(), line={} bci=0\n{}        statement();\n\nmain[1] ",
                kind, point.class_name, point.method_name, point.line, point.line
            ),
            false,
        )
    }

    fn frames(&self) -> String {
        let Some(point) = self.position.map(|p| &self.points[p]) else {
            return "No thread specified.\n> ".to_string();
        };

        let mut out = frame_line(1, point);
        for index in 2..=point.depth {
            // The most recent line executed one level further out is the call site
            let depth = point.depth + 1 - index;
            let caller = self.points[..self.position.unwrap_or(0)]
                .iter()
                .rev()
                .find(|p| p.depth == depth);
            match caller {
                Some(caller) => out.push_str(&frame_line(index, caller)),
                None => out.push_str(&format!(
                    "  [{}] org.junit.runners.Frame{}.invoke (Frame.java:1)\n",
                    index, index
                )),
            }
        }
        out.push_str("main[1] ");
        out
    }
}

fn frame_line(index: usize, point: &ExecutionPoint) -> String {
    let file = point
        .class_name
        .rsplit('.')
        .next()
        .unwrap_or(&point.class_name);
    format!(
        "  [{}] {}.{} ({}.java:{})\n",
        index, point.class_name, point.method_name, file, point.line
    )
}

struct SimulatedControl {
    task: JoinHandle<()>,
    exited: oneshot::Receiver<()>,
    done: bool,
    killed: Arc<AtomicBool>,
}

#[async_trait]
impl ProcessControl for SimulatedControl {
    fn is_running(&mut self) -> bool {
        if !self.done {
            self.done = !matches!(
                self.exited.try_recv(),
                Err(oneshot::error::TryRecvError::Empty)
            );
        }
        !self.done
    }

    async fn wait_for_exit(&mut self, grace: Duration) -> bool {
        if !self.is_running() {
            return true;
        }
        if tokio::time::timeout(grace, &mut self.exited).await.is_ok() {
            self.done = true;
        }
        self.done
    }

    async fn stop(&mut self) -> Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        self.task.abort();
        self.done = true;
        Ok(())
    }
}
