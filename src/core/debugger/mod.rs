//! Driving `jdb` through a test run and recording what executes.

mod process;
mod protocol;
mod reader;
mod session;
#[cfg(test)]
pub(crate) mod simulator;
mod trace;

pub use process::{ChildControl, DebuggerProcess, ProcessControl};
pub use protocol::{Command, Location, Report, ReportParser, StopKind};
pub use reader::{DebuggerEvent, StreamKind};
pub use session::{DebuggerSessionDriver, SessionOutcome, SessionSettings, SessionState, SessionStatus};
pub use trace::{CallSite, RawTrace, SessionPlan, TraceEntry, TrackedElement};
