// src/core/debugger/protocol.rs
//! Commands sent to `jdb` and parsing of the lines it prints back.
use regex::Regex;
use std::fmt;

use crate::core::invoked::ElementKey;
use crate::error::Result;

/// A request written to the debugger, one per line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StopAt { class_name: String, line: usize },
    Run,
    Cont,
    Step,
    StepUp,
    Where,
    Exit,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopAt { class_name, line } => write!(f, "stop at {}:{}", class_name, line),
            Self::Run => write!(f, "run"),
            Self::Cont => write!(f, "cont"),
            Self::Step => write!(f, "step"),
            Self::StepUp => write!(f, "step up"),
            Self::Where => write!(f, "where"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    Breakpoint,
    Step,
}

/// Where the debuggee thread is suspended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub kind: StopKind,
    pub thread: Option<String>,
    pub class_name: String,
    pub method_name: String,
    pub line: usize,
}

impl Location {
    pub fn key(&self) -> ElementKey {
        ElementKey::new(self.class_name.clone(), self.method_name.clone())
    }

    pub fn signature(&self) -> String {
        format!("{}.{}()", self.class_name, self.method_name)
    }
}

/// One parsed line of debugger output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    BreakpointAck {
        class_name: String,
        line: usize,
        accepted: bool,
    },
    Stopped(Location),
    Frame {
        index: usize,
        /// `class.method` of the frame
        frame: String,
        /// Source line, when jdb knows it
        line: Option<usize>,
    },
    Exited,
    Other(String),
}

/// Prompt-aware parser for `jdb` output lines
#[derive(Debug, Clone)]
pub struct ReportParser {
    prompt_prefix: Regex,
    prompt_only: Regex,
    thread_prompt: Regex,
    stop: Regex,
    ack: Regex,
    frame: Regex,
}

impl ReportParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            prompt_prefix: Regex::new(r"^(?:> |[\w$.\-]+\[\d+\] )+")?,
            prompt_only: Regex::new(r"^(?:>|[\w$.\-]+\[\d+\])(?: (?:>|[\w$.\-]+\[\d+\]))* ?$")?,
            thread_prompt: Regex::new(r"[\w$.\-]+\[\d+\] ?$")?,
            stop: Regex::new(
                r#"^(Breakpoint hit|Step completed):\s*(?:"thread=([^"]*)",\s*)?([\w$.]+)\.([\w$<>]+)\(\),\s*line=([\d,.\u{a0}]+)"#,
            )?,
            ack: Regex::new(r"^(Set|Deferring|Unable to set) breakpoint ([\w$.]+):(\d+)")?,
            frame: Regex::new(r"^\s*\[(\d+)\]\s+(\S+)(?:\s+\([^():]*:([\d,.\u{a0}]+)\))?")?,
        })
    }

    /// Whether `text` consists of prompts only
    pub fn is_prompt(&self, text: &str) -> bool {
        !text.is_empty() && self.prompt_only.is_match(text)
    }

    /// Whether the last prompt in `text` names a suspended thread (`main[1]`)
    pub fn is_thread_prompt(&self, text: &str) -> bool {
        self.is_prompt(text) && self.thread_prompt.is_match(text)
    }

    /// Drop prompts jdb prints in front of asynchronous output
    pub fn strip_prompts<'a>(&self, line: &'a str) -> &'a str {
        match self.prompt_prefix.find(line) {
            Some(m) => &line[m.end()..],
            None => line,
        }
    }

    pub fn parse(&self, line: &str) -> Report {
        let text = self.strip_prompts(line.trim_end());

        if text.contains("The application exited")
            || text.contains("The application has been disconnected")
        {
            return Report::Exited;
        }

        if let Some(caps) = self.stop.captures(text) {
            if let Some(line) = parse_line_number(&caps[5]) {
                return Report::Stopped(Location {
                    kind: if &caps[1] == "Breakpoint hit" {
                        StopKind::Breakpoint
                    } else {
                        StopKind::Step
                    },
                    thread: caps.get(2).map(|m| m.as_str().to_string()),
                    class_name: caps[3].to_string(),
                    method_name: caps[4].to_string(),
                    line,
                });
            }
        }

        if let Some(caps) = self.ack.captures(text) {
            if let Ok(line) = caps[3].parse() {
                return Report::BreakpointAck {
                    class_name: caps[2].to_string(),
                    line,
                    accepted: &caps[1] != "Unable to set",
                };
            }
        }

        if let Some(caps) = self.frame.captures(text) {
            if let Ok(index) = caps[1].parse() {
                return Report::Frame {
                    index,
                    frame: caps[2].to_string(),
                    line: caps.get(3).and_then(|m| parse_line_number(m.as_str())),
                };
            }
        }

        Report::Other(text.to_string())
    }
}

/// jdb formats line numbers with the locale's grouping separator
fn parse_line_number(text: &str) -> Option<usize> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}
