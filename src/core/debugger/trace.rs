// src/core/debugger/trace.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::invoked::ElementKey;
use super::protocol::Location;

/// A method or constructor the session records lines for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedElement {
    pub key: ElementKey,
    /// Breakpoint line (transformed coordinates)
    pub entry_line: usize,
    /// Line of the closing bracket (transformed coordinates)
    pub close_line: usize,
    /// Nothing but the bracket sits on `close_line`
    pub close_is_bare: bool,
    /// Step into other project classes this element calls
    pub collect_calls: bool,
}

/// What to track during one debugger session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPlan {
    pub tracked: Vec<TrackedElement>,
    /// Class-name prefixes of project code
    pub project_packages: Vec<String>,
}

impl SessionPlan {
    pub fn is_tracked(&self, key: &ElementKey) -> bool {
        self.tracked.iter().any(|t| &t.key == key)
    }

    pub fn collects_calls(&self, key: &ElementKey) -> bool {
        self.tracked.iter().any(|t| &t.key == key && t.collect_calls)
    }

    /// The implicit return on a line holding only `}` is not a statement
    pub fn is_closing_line(&self, key: &ElementKey, line: usize) -> bool {
        self.tracked.iter().any(|t| {
            &t.key == key && t.close_is_bare && t.close_line == line && t.close_line != t.entry_line
        })
    }

    pub fn is_project_class(&self, class_name: &str) -> bool {
        if self.tracked.iter().any(|t| t.key.class_name == class_name) {
            return true;
        }
        self.project_packages.iter().any(|package| {
            if package.is_empty() {
                !class_name.contains('.')
            } else {
                class_name
                    .strip_prefix(package.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
            }
        })
    }
}

/// One executed line inside a traced invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub class_name: String,
    /// Frame as reported by the debugger, e.g. `demo.Calc.add()`
    pub signature: String,
    /// Line in transformed coordinates
    pub line: usize,
    /// Stack depth reported by the debugger
    pub depth: usize,
}

/// Frame that made an invocation, as listed by `where`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    /// `class.method` of the calling frame
    pub frame: String,
    /// Line in the caller's transformed source
    pub line: usize,
}

/// Executed lines of one invocation of a tracked element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTrace {
    pub key: ElementKey,
    /// Depth of the tracked frame itself
    pub base_depth: usize,
    pub collect_calls: bool,
    pub call_site: Option<CallSite>,
    pub entries: Vec<TraceEntry>,
    /// The session ended before this invocation returned
    pub truncated: bool,
}

impl RawTrace {
    pub fn lines(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.line).collect()
    }
}

/// Command the driver issues after a stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    StepInto,
    StepOut,
    Continue,
}

struct ActiveInvocation {
    trace: usize,
    key: ElementKey,
    base_depth: usize,
    /// Last recorded line per stack depth, for spotting returns to a call site
    last_line_at_depth: BTreeMap<usize, usize>,
}

/// Turns the stream of debugger stops into per-invocation [`RawTrace`]s
pub struct TraceRecorder {
    plan: SessionPlan,
    traces: Vec<RawTrace>,
    active: Vec<ActiveInvocation>,
    last_stop_depth: usize,
}

impl TraceRecorder {
    pub fn new(plan: SessionPlan) -> Self {
        Self {
            plan,
            traces: Vec::new(),
            active: Vec::new(),
            last_stop_depth: 0,
        }
    }

    pub fn plan(&self) -> &SessionPlan {
        &self.plan
    }

    pub fn entry_count(&self) -> usize {
        self.traces.iter().map(|t| t.entries.len()).sum()
    }

    /// Record a stop at `location` with `depth` frames on the stack and pick
    /// the next command. `caller` is the frame below `location`.
    pub fn on_stop(
        &mut self,
        location: &Location,
        depth: usize,
        caller: Option<CallSite>,
    ) -> StepDecision {
        let key = location.key();

        while let Some(top) = self.active.last() {
            if depth < top.base_depth || (depth == top.base_depth && top.key != key) {
                self.active.pop();
            } else {
                break;
            }
        }

        let returned = depth < self.last_stop_depth;
        self.last_stop_depth = depth;

        if self.plan.is_tracked(&key) {
            if !self.active.iter().any(|a| a.key == key) {
                self.start_invocation(&key, depth, caller);
            }
            if !self.plan.is_closing_line(&key, location.line) {
                self.record(location, depth, returned);
            }
            return StepDecision::StepInto;
        }

        let Some(innermost) = self.active.last() else {
            return StepDecision::Continue;
        };

        let collect = self.traces[innermost.trace].collect_calls;
        if collect && self.plan.is_project_class(&location.class_name) {
            self.record(location, depth, returned);
            StepDecision::StepInto
        } else {
            StepDecision::StepOut
        }
    }

    fn start_invocation(&mut self, key: &ElementKey, depth: usize, caller: Option<CallSite>) {
        self.traces.push(RawTrace {
            key: key.clone(),
            base_depth: depth,
            collect_calls: self.plan.collects_calls(key),
            call_site: caller,
            entries: Vec::new(),
            truncated: false,
        });
        self.active.push(ActiveInvocation {
            trace: self.traces.len() - 1,
            key: key.clone(),
            base_depth: depth,
            last_line_at_depth: BTreeMap::new(),
        });
    }

    fn record(&mut self, location: &Location, depth: usize, returned: bool) {
        for invocation in &mut self.active {
            invocation.last_line_at_depth.retain(|&d, _| d <= depth);
            let back_at_call_site =
                returned && invocation.last_line_at_depth.get(&depth) == Some(&location.line);
            if back_at_call_site {
                continue;
            }

            invocation.last_line_at_depth.insert(depth, location.line);
            self.traces[invocation.trace].entries.push(TraceEntry {
                class_name: location.class_name.clone(),
                signature: location.signature(),
                line: location.line,
                depth,
            });
        }
    }

    /// Close the session; invocations still running are flagged truncated
    /// when `interrupted`.
    pub fn finish(mut self, interrupted: bool) -> Vec<RawTrace> {
        if interrupted {
            for invocation in &self.active {
                self.traces[invocation.trace].truncated = true;
            }
        }
        self.active.clear();
        self.traces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::debugger::protocol::StopKind;

    fn plan() -> SessionPlan {
        SessionPlan {
            tracked: vec![TrackedElement {
                key: ElementKey::new("demo.Calc", "fact"),
                entry_line: 3,
                close_line: 5,
                close_is_bare: true,
                collect_calls: false,
            }],
            project_packages: vec!["demo".to_string()],
        }
    }

    fn at(class: &str, method: &str, line: usize) -> Location {
        Location {
            kind: StopKind::Step,
            thread: Some("main".to_string()),
            class_name: class.to_string(),
            method_name: method.to_string(),
            line,
        }
    }

    #[test]
    fn test_recursion_nests_and_skips_call_site_returns() {
        let mut recorder = TraceRecorder::new(plan());
        let steps = [
            (at("demo.Calc", "fact", 3), 2),
            (at("demo.Calc", "fact", 4), 2),
            (at("demo.Calc", "fact", 3), 3),
            (at("demo.Calc", "fact", 4), 3),
            (at("demo.Calc", "fact", 3), 4),
            (at("demo.Calc", "fact", 4), 3),
            (at("demo.Calc", "fact", 4), 2),
        ];
        for (location, depth) in &steps {
            let caller = CallSite {
                frame: "demo.CalcTest.facts".to_string(),
                line: 11,
            };
            assert_eq!(
                recorder.on_stop(location, *depth, Some(caller)),
                StepDecision::StepInto
            );
        }
        assert_eq!(
            recorder.on_stop(&at("demo.CalcTest", "facts", 12), 1, None),
            StepDecision::Continue
        );

        let traces = recorder.finish(false);
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].call_site.as_ref().map(|c| c.line), Some(11));
        let pairs: Vec<(usize, usize)> = traces[0].entries.iter().map(|e| (e.line, e.depth)).collect();
        assert_eq!(pairs, vec![(3, 2), (4, 2), (3, 3), (4, 3), (3, 4)]);
    }

    #[test]
    fn test_library_frames_are_stepped_out() {
        let mut recorder = TraceRecorder::new(plan());
        recorder.on_stop(&at("demo.Calc", "fact", 3), 2, None);
        assert_eq!(
            recorder.on_stop(&at("java.lang.Math", "max", 80), 3, None),
            StepDecision::StepOut
        );
        assert_eq!(
            recorder.on_stop(&at("demo.Helper", "assist", 7), 3, None),
            StepDecision::StepOut
        );
        assert_eq!(recorder.entry_count(), 1);
    }

    #[test]
    fn test_closing_line_is_not_recorded() {
        let mut recorder = TraceRecorder::new(plan());
        recorder.on_stop(&at("demo.Calc", "fact", 3), 2, None);
        assert_eq!(
            recorder.on_stop(&at("demo.Calc", "fact", 5), 2, None),
            StepDecision::StepInto
        );
        let traces = recorder.finish(true);
        assert_eq!(traces[0].lines(), vec![3]);
        assert!(traces[0].truncated);
    }

    #[test]
    fn test_statement_on_closing_line_is_recorded() {
        // `    b(); }` closes the body and still executes `b()`
        let mut plan = plan();
        plan.tracked[0].close_line = 4;
        plan.tracked[0].close_is_bare = false;

        let mut recorder = TraceRecorder::new(plan);
        recorder.on_stop(&at("demo.Calc", "fact", 3), 2, None);
        recorder.on_stop(&at("demo.Calc", "fact", 4), 2, None);
        assert_eq!(recorder.finish(false)[0].lines(), vec![3, 4]);
    }

    #[test]
    fn test_project_class_matching() {
        let plan = plan();
        assert!(plan.is_project_class("demo.Helper"));
        assert!(plan.is_project_class("demo.Calc"));
        assert!(!plan.is_project_class("demographics.Table"));
        assert!(!plan.is_project_class("java.util.List"));
    }
}
