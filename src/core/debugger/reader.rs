// src/core/debugger/reader.rs
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::trace;

use super::protocol::ReportParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Responses,
    Errors,
}

/// Something a reader observed on one of the debugger's output streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggerEvent {
    Line { stream: StreamKind, text: String },
    /// A prompt waiting for input; prompts are not newline-terminated
    Prompt(String),
    Closed(StreamKind),
}

/// Splits a byte stream into lines, surfacing a trailing prompt as soon as
/// it arrives instead of waiting for a newline that never comes.
pub struct LineSplitter {
    buffer: Vec<u8>,
    parser: Option<ReportParser>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Line(String),
    Prompt(String),
}

impl LineSplitter {
    /// `parser` enables prompt detection; `None` yields complete lines only
    pub fn new(parser: Option<ReportParser>) -> Self {
        Self {
            buffer: Vec::new(),
            parser,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Fragment> {
        self.buffer.extend_from_slice(chunk);
        let mut fragments = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..pos]).trim_end_matches('\r').to_string();
            fragments.push(self.classify(line));
        }

        if let Some(parser) = &self.parser {
            let rest = String::from_utf8_lossy(&self.buffer);
            if parser.is_prompt(&rest) {
                fragments.push(Fragment::Prompt(rest.to_string()));
                self.buffer.clear();
            }
        }

        fragments
    }

    /// Whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<Fragment> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.buffer).to_string();
        self.buffer.clear();
        Some(self.classify(rest))
    }

    fn classify(&self, line: String) -> Fragment {
        match &self.parser {
            Some(parser) if parser.is_prompt(&line) => Fragment::Prompt(line),
            _ => Fragment::Line(line),
        }
    }
}

/// Forward everything read from `stream` to `events` until the stream ends,
/// fails, or nobody is listening anymore.
pub fn spawn_reader<R>(
    mut stream: R,
    kind: StreamKind,
    parser: Option<ReportParser>,
    events: UnboundedSender<DebuggerEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut splitter = LineSplitter::new(parser);
        let mut chunk = [0u8; 4096];

        loop {
            let read = match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(read) => read,
            };

            for fragment in splitter.push(&chunk[..read]) {
                if events.send(to_event(kind, fragment)).is_err() {
                    return;
                }
            }
        }

        if let Some(fragment) = splitter.finish() {
            let _ = events.send(to_event(kind, fragment));
        }
        trace!("{:?} stream closed", kind);
        let _ = events.send(DebuggerEvent::Closed(kind));
    })
}

fn to_event(stream: StreamKind, fragment: Fragment) -> DebuggerEvent {
    match fragment {
        Fragment::Line(text) => DebuggerEvent::Line { stream, text },
        Fragment::Prompt(text) => DebuggerEvent::Prompt(text),
    }
}
