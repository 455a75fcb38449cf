// src/core/test_path/builder.rs
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::core::debugger::RawTrace;
use crate::core::invoked::{ElementKey, InvocationRecord, InvokedElement};
use crate::core::processing::{BodySpan, LineMapping};
use crate::error::{ExecFlowError, Result};
use super::{TestPath, TestPathCollection};

struct Target {
    element: InvokedElement,
    body: BodySpan,
}

/// Maps raw debugger traces back onto original source lines.
///
/// Debugger reports name methods without parameter types, so overloads of
/// one element share their traces. The overload a key's first invocation
/// ran in wins and later invocations of other overloads are dropped.
pub struct TestPathBuilder {
    test_method: InvokedElement,
    mappings: HashMap<PathBuf, LineMapping>,
    targets: Vec<Target>,
    excluded: Vec<(String, String)>,
}

impl TestPathBuilder {
    pub fn new(test_method: InvokedElement) -> Self {
        Self {
            test_method,
            mappings: HashMap::new(),
            targets: Vec::new(),
            excluded: Vec::new(),
        }
    }

    /// Register the mapping of a transformed source file
    pub fn add_mapping(&mut self, source: PathBuf, mapping: LineMapping) {
        self.mappings.insert(source, mapping);
    }

    /// Track `element`, whose body sits at `body` in its transformed file
    pub fn track(&mut self, element: InvokedElement, body: BodySpan) {
        self.targets.push(Target { element, body });
    }

    /// Record an element that could not be traced at all
    pub fn exclude(&mut self, signature: impl Into<String>, reason: &ExecFlowError) {
        self.excluded.push((signature.into(), reason.to_string()));
    }

    pub fn build(self, traces: &[RawTrace], session_truncated: bool) -> TestPathCollection {
        let mut collection = TestPathCollection::new(self.test_method.signature.clone());
        collection.truncated = session_truncated || traces.iter().any(|t| t.truncated);

        for target in &self.targets {
            collection.paths.entry(target.element.signature.clone()).or_default();
        }

        let mut chosen: HashMap<ElementKey, usize> = HashMap::new();
        let mut failed: BTreeMap<String, ExecFlowError> = BTreeMap::new();

        for trace in traces {
            let Some(first) = trace.entries.iter().find(|e| e.depth == trace.base_depth) else {
                continue;
            };
            let Some(index) = self.resolve(&trace.key, first.line) else {
                debug!("Trace for untracked element {} ignored", trace.key);
                continue;
            };

            let kept = *chosen.entry(trace.key.clone()).or_insert(index);
            let target = &self.targets[index];
            let signature = &target.element.signature;

            if kept != index {
                if !collection.is_excluded(signature) {
                    warn!(
                        "{} shares its debugger frames with {}; keeping only the first exercised overload",
                        signature, self.targets[kept].element.signature
                    );
                    collection.exclude(
                        signature.clone(),
                        format!(
                            "overload of {} exercised first by the same test",
                            self.targets[kept].element.signature
                        ),
                    );
                }
                continue;
            }
            if failed.contains_key(signature) {
                continue;
            }

            match self.map_trace(target, trace) {
                Ok((path, called)) => {
                    collection.paths.entry(signature.clone()).or_default().push(path);
                    collection.invocations.push(InvocationRecord {
                        element: target.element.clone(),
                        test_method: self.test_method.signature.clone(),
                        call_site_line: self.call_site_line(trace),
                        collect_calls: trace.collect_calls,
                    });
                    if !called.is_empty() {
                        let invoked = collection.invoked_by_tested.entry(signature.clone()).or_default();
                        for method in called {
                            if !invoked.contains(&method) {
                                invoked.push(method);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Excluding {}: {}", signature, e);
                    failed.insert(signature.clone(), e);
                }
            }
        }

        for (signature, error) in failed {
            collection.exclude(signature, error);
        }
        for (signature, reason) in self.excluded {
            collection.exclude(signature, reason);
        }

        collection
    }

    /// Original line of the call, when the test method made it directly
    fn call_site_line(&self, trace: &RawTrace) -> Option<usize> {
        let call_site = trace.call_site.as_ref()?;
        let frame = format!("{}.{}", self.test_method.class_name, self.test_method.method_name);
        if call_site.frame != frame {
            return None;
        }
        self.mappings
            .get(&self.test_method.source_path)?
            .original(call_site.line)
    }

    /// Pick the tracked overload whose body holds `line`
    fn resolve(&self, key: &ElementKey, line: usize) -> Option<usize> {
        let candidates: Vec<usize> = self
            .targets
            .iter()
            .enumerate()
            .filter(|(_, t)| &t.element.key() == key)
            .map(|(index, _)| index)
            .collect();

        candidates
            .iter()
            .copied()
            .find(|&i| self.targets[i].body.contains(line))
            .or_else(|| {
                candidates
                    .iter()
                    .copied()
                    .filter(|&i| self.targets[i].body.open_line <= line)
                    .max_by_key(|&i| self.targets[i].body.open_line)
            })
            .or_else(|| candidates.first().copied())
    }

    /// Original-line path of one invocation plus the distinct methods it
    /// called (entries deeper than the element that are not recursion)
    fn map_trace(&self, target: &Target, trace: &RawTrace) -> Result<(TestPath, Vec<String>)> {
        let element = &target.element;
        let mapping = self.mappings.get(&element.source_path).ok_or_else(|| {
            ExecFlowError::MappingGap {
                path: element.source_path.clone(),
                signature: element.signature.clone(),
                line: 0,
            }
        })?;

        let mut lines = Vec::with_capacity(trace.entries.len());
        let mut called = Vec::new();

        for entry in &trace.entries {
            let recursive = entry.class_name == trace.key.class_name
                && entry.signature == trace.key.to_string();
            if entry.depth > trace.base_depth && !recursive {
                if !called.contains(&entry.signature) {
                    called.push(entry.signature.clone());
                }
                continue;
            }

            let original = mapping.original(entry.line).ok_or_else(|| ExecFlowError::MappingGap {
                path: element.source_path.clone(),
                signature: element.signature.clone(),
                line: entry.line,
            })?;
            lines.push(original);
        }

        Ok((
            TestPath {
                lines,
                truncated: trace.truncated,
            },
            called,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::debugger::{CallSite, TraceEntry};
    use crate::core::invoked::ElementDescriptor;

    const CALC: &str = "src/demo/Calc.java";
    const CALC_TEST: &str = "test/demo/CalcTest.java";

    fn element(signature: &str, declaration_line: usize) -> InvokedElement {
        element_in(CALC, signature, declaration_line)
    }

    fn element_in(source: &str, signature: &str, declaration_line: usize) -> InvokedElement {
        InvokedElement::from_descriptor(ElementDescriptor {
            signature: signature.to_string(),
            source_path: PathBuf::from(source),
            binary_path: PathBuf::from("classes/demo/Calc.class"),
            is_constructor: false,
            declaration_line,
        })
        .unwrap()
    }

    fn span(open_line: usize, close_line: usize) -> BodySpan {
        BodySpan {
            open_line,
            entry_line: open_line + 1,
            close_line,
            close_is_bare: true,
        }
    }

    fn entry(signature: &str, line: usize, depth: usize) -> TraceEntry {
        let class_name = signature.rsplit_once('.').map(|(c, _)| c).unwrap_or_default();
        TraceEntry {
            class_name: class_name.to_string(),
            signature: signature.to_string(),
            line,
            depth,
        }
    }

    fn trace(method: &str, entries: Vec<TraceEntry>) -> RawTrace {
        RawTrace {
            key: ElementKey::new("demo.Calc", method),
            base_depth: 2,
            collect_calls: false,
            call_site: None,
            entries,
            truncated: false,
        }
    }

    /// Transformed line 5 merges original lines 5 and 6; transformed line 6
    /// has no original line behind it.
    fn shifted_mapping() -> LineMapping {
        let mut sources: Vec<Vec<usize>> = (1..=4).map(|l| vec![l]).collect();
        sources.push(vec![5, 6]);
        sources.push(vec![]);
        sources.extend((7..=20).map(|l| vec![l]));
        LineMapping::from_sources(sources)
    }

    fn builder() -> TestPathBuilder {
        let mut builder = TestPathBuilder::new(element_in(CALC_TEST, "demo.CalcTest.adds()", 10));
        builder.add_mapping(PathBuf::from(CALC), shifted_mapping());
        builder.add_mapping(PathBuf::from(CALC_TEST), shifted_mapping());
        builder
    }

    #[test]
    fn test_repeated_lines_are_kept_per_invocation() {
        let mut builder = builder();
        builder.track(element("demo.Calc.add(int)", 5), span(5, 10));

        let first = trace(
            "add",
            [7, 8, 7, 8, 7, 8].iter().map(|&l| entry("demo.Calc.add()", l, 2)).collect(),
        );
        let second = trace("add", vec![entry("demo.Calc.add()", 7, 2)]);

        let collection = builder.build(&[first, second], false);
        let paths = collection.paths_of("demo.Calc.add(int)");
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].lines, vec![7, 8, 7, 8, 7, 8]);
        assert_eq!(paths[1].lines, vec![7]);
        assert!(!collection.truncated);
    }

    #[test]
    fn test_nested_calls_are_listed_separately() {
        let mut builder = builder();
        builder.track(element("demo.Calc.add(int)", 5), span(5, 10));

        let nested = trace(
            "add",
            vec![
                entry("demo.Calc.add()", 7, 2),
                entry("demo.Helper.assist()", 3, 3),
                entry("demo.Helper.assist()", 4, 3),
                entry("demo.Calc.add()", 8, 2),
            ],
        );

        let collection = builder.build(&[nested], false);
        assert_eq!(collection.paths_of("demo.Calc.add(int)")[0].lines, vec![7, 8]);
        assert_eq!(
            collection.invoked_by_tested["demo.Calc.add(int)"],
            vec!["demo.Helper.assist()".to_string()]
        );
    }

    #[test]
    fn test_recursion_stays_in_primary_path() {
        let mut builder = builder();
        builder.track(element("demo.Calc.fact(int)", 5), span(5, 10));

        let recursive = trace(
            "fact",
            vec![
                entry("demo.Calc.fact()", 7, 2),
                entry("demo.Calc.fact()", 7, 3),
                entry("demo.Calc.fact()", 8, 3),
            ],
        );

        let collection = builder.build(&[recursive], false);
        assert_eq!(collection.paths_of("demo.Calc.fact(int)")[0].lines, vec![7, 7, 8]);
        assert!(collection.invoked_by_tested.is_empty());
    }

    #[test]
    fn test_only_first_exercised_overload_is_kept() {
        let mut builder = builder();
        builder.track(element("demo.Calc.add(int)", 5), span(5, 10));
        builder.track(element("demo.Calc.add(int, int)", 12), span(12, 15));

        let traces = [
            trace("add", vec![entry("demo.Calc.add()", 13, 2)]),
            trace("add", vec![entry("demo.Calc.add()", 7, 2)]),
        ];

        let collection = builder.build(&traces, false);
        assert_eq!(collection.paths_of("demo.Calc.add(int, int)")[0].lines, vec![13]);
        assert!(collection.paths_of("demo.Calc.add(int)").is_empty());
        assert!(collection.is_excluded("demo.Calc.add(int)"));
    }

    #[test]
    fn test_mapping_gap_excludes_only_that_element() {
        let mut builder = builder();
        builder.track(element("demo.Calc.add(int)", 5), span(5, 10));
        builder.track(element("demo.Calc.sub(int)", 12), span(12, 15));

        let traces = [
            trace("add", vec![entry("demo.Calc.add()", 6, 2)]),
            trace("sub", vec![entry("demo.Calc.sub()", 13, 2)]),
        ];

        let collection = builder.build(&traces, true);
        assert!(collection.is_excluded("demo.Calc.add(int)"));
        assert!(collection.excluded[0].reason.contains("line 6"));
        assert_eq!(collection.paths_of("demo.Calc.sub(int)")[0].lines, vec![13]);
        assert!(collection.truncated);
    }

    #[test]
    fn test_uninvoked_element_has_no_paths() {
        let mut builder = builder();
        builder.track(element("demo.Calc.add(int)", 5), span(5, 10));
        builder.exclude(
            "demo.Calc.weird()",
            &ExecFlowError::Transformation {
                path: PathBuf::from(CALC),
                line: 30,
                reason: "no opening bracket".to_string(),
            },
        );

        let collection = builder.build(&[], false);
        assert!(collection.paths["demo.Calc.add(int)"].is_empty());
        assert!(collection.is_excluded("demo.Calc.weird()"));
    }

    #[test]
    fn test_invocations_carry_original_call_sites() {
        let mut builder = builder();
        builder.track(element("demo.Calc.add(int)", 5), span(5, 10));

        let mut direct = trace("add", vec![entry("demo.Calc.add()", 7, 2)]);
        direct.call_site = Some(CallSite {
            frame: "demo.CalcTest.adds".to_string(),
            line: 12,
        });
        let mut indirect = trace("add", vec![entry("demo.Calc.add()", 8, 3)]);
        indirect.base_depth = 3;
        indirect.call_site = Some(CallSite {
            frame: "demo.Helper.assist".to_string(),
            line: 4,
        });

        let collection = builder.build(&[direct, indirect], false);
        assert_eq!(collection.invocations.len(), 2);
        assert_eq!(collection.invocations[0].element.signature, "demo.Calc.add(int)");
        assert_eq!(collection.invocations[0].test_method, "demo.CalcTest.adds()");
        assert_eq!(collection.invocations[0].call_site_line, Some(12));
        assert_eq!(collection.invocations[1].call_site_line, None);
    }
}
