// src/core/processing/stages.rs
use regex::Regex;

use super::balance::BracketBalanceTracker;
use super::literals::{blank_literals, find_inline_comment};

/// Placeholder left on a line whose lone `{` was moved to the previous line.
/// Removed by the cleanup stage before the file is written.
pub const MOVED_BRACKET: &str = "%moved-bracket%";

/// Pattern of internal placeholder tokens
pub const PLACEHOLDER_PATTERN: &str = r"%[A-Za-z][A-Za-z0-9_.:-]*%";

/// Problem a stage could not resolve on one line; the line is left unchanged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageIssue {
    pub line: usize,
    pub reason: String,
}

/// Rewritten lines plus, for each of them, the input lines it came from
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub lines: Vec<String>,
    pub sources: Vec<Vec<usize>>,
    pub issues: Vec<StageIssue>,
}

impl StageOutput {
    fn unchanged(lines: Vec<String>) -> Self {
        let sources = (1..=lines.len()).map(|l| vec![l]).collect();
        Self {
            lines,
            sources,
            issues: Vec::new(),
        }
    }
}

/// One line-rewriting step of the source processing pipeline
#[derive(Debug, Clone)]
pub enum Stage {
    /// Blank `/* ... */` comments, keeping `preserve` (our own marker) intact
    BlockCommentBlanking { preserve: Option<String> },
    /// Cut trailing `// ...` comments
    InlineCommentRemoval,
    /// Move a lone `{` onto the previous non-blank line
    CurlyBracketNormalization,
    /// Append `marker` to recognized test annotations.
    ///
    /// A marker already present in the original source opts that test
    /// into call collection, see [`carries_marker`].
    AnnotationInjection {
        annotations: Vec<String>,
        marker: String,
    },
    /// Strip `%...%` placeholder tokens
    PlaceholderCleanup { pattern: Regex },
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BlockCommentBlanking { .. } => "block-comment-blanking",
            Self::InlineCommentRemoval => "inline-comment-removal",
            Self::CurlyBracketNormalization => "curly-bracket-normalization",
            Self::AnnotationInjection { .. } => "annotation-injection",
            Self::PlaceholderCleanup { .. } => "placeholder-cleanup",
        }
    }

    pub fn process(&self, lines: &[String]) -> StageOutput {
        match self {
            Self::BlockCommentBlanking { preserve } => {
                StageOutput::unchanged(blank_block_comments(lines, preserve.as_deref()))
            }
            Self::InlineCommentRemoval => {
                StageOutput::unchanged(lines.iter().map(|l| remove_inline_comment(l)).collect())
            }
            Self::CurlyBracketNormalization => normalize_curly_brackets(lines),
            Self::AnnotationInjection {
                annotations,
                marker,
            } => StageOutput::unchanged(
                lines
                    .iter()
                    .map(|l| inject_marker(l, annotations, marker))
                    .collect(),
            ),
            Self::PlaceholderCleanup { pattern } => StageOutput::unchanged(
                lines.iter().map(|l| strip_placeholders(l, pattern)).collect(),
            ),
        }
    }
}

fn blank_block_comments(lines: &[String], preserve: Option<&str>) -> Vec<String> {
    let mut in_comment = false;
    let mut out = Vec::with_capacity(lines.len());

    for line in lines {
        let mut result = String::with_capacity(line.len());
        let mut quote: Option<char> = None;
        let mut escaped = false;
        let mut i = 0;

        while i < line.len() {
            let rest = &line[i..];
            let ch = match rest.chars().next() {
                Some(c) => c,
                None => break,
            };

            if in_comment {
                if rest.starts_with("*/") {
                    result.push_str("  ");
                    in_comment = false;
                    i += 2;
                } else {
                    for _ in 0..ch.len_utf8() {
                        result.push(' ');
                    }
                    i += ch.len_utf8();
                }
                continue;
            }

            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
                result.push(ch);
                i += ch.len_utf8();
                continue;
            }

            if let Some(marker) = preserve.filter(|m| !m.is_empty() && rest.starts_with(*m)) {
                result.push_str(marker);
                i += marker.len();
            } else if rest.starts_with("//") {
                result.push_str(rest);
                break;
            } else if rest.starts_with("/*") {
                result.push_str("  ");
                in_comment = true;
                i += 2;
            } else {
                if ch == '"' || ch == '\'' {
                    quote = Some(ch);
                }
                result.push(ch);
                i += ch.len_utf8();
            }
        }

        out.push(result);
    }

    out
}

fn remove_inline_comment(line: &str) -> String {
    match find_inline_comment(line) {
        Some(pos) => line[..pos].trim_end().to_string(),
        None => line.to_string(),
    }
}

fn is_lone_opening_bracket(line: &str) -> bool {
    let code = match find_inline_comment(line) {
        Some(pos) => &line[..pos],
        None => line,
    };
    code.trim() == "{"
}

fn normalize_curly_brackets(lines: &[String]) -> StageOutput {
    let mut out: Vec<String> = lines.to_vec();
    let mut sources: Vec<Vec<usize>> = (1..=lines.len()).map(|l| vec![l]).collect();
    let mut issues = Vec::new();

    for index in 0..out.len() {
        if !is_lone_opening_bracket(&out[index]) {
            continue;
        }

        let target = (0..index)
            .rev()
            .find(|&i| !out[i].trim().is_empty() && out[i].trim() != MOVED_BRACKET);

        let Some(target) = target else {
            issues.push(StageIssue {
                line: index + 1,
                reason: "opening bracket has no preceding line to attach to".to_string(),
            });
            continue;
        };

        let previous = &out[target];
        let merged = match find_inline_comment(previous) {
            Some(pos) => format!("{} {{ {}", previous[..pos].trim_end(), &previous[pos..]),
            None => format!("{} {{", previous.trim_end()),
        };
        out[target] = merged;
        out[index] = MOVED_BRACKET.to_string();
        sources[target].push(index + 1);
    }

    StageOutput {
        lines: out,
        sources,
        issues,
    }
}

fn is_identifier_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '.' || ch == '$'
}

fn inject_marker(line: &str, annotations: &[String], marker: &str) -> String {
    if marker.is_empty() || line.contains(marker) {
        return line.to_string();
    }

    let blanked = blank_literals(line);
    let indent = blanked.len() - blanked.trim_start().len();
    let code = &blanked[indent..];

    let Some(annotation) = annotations.iter().find(|a| {
        code.starts_with(a.as_str())
            && !code[a.len()..]
                .chars()
                .next()
                .is_some_and(is_identifier_char)
    }) else {
        return line.to_string();
    };

    let name_end = indent + annotation.len();
    let after_name = &blanked[name_end..];
    let args_start = name_end + (after_name.len() - after_name.trim_start().len());

    if !blanked[args_start..].starts_with('(') {
        return format!("{} {}{}", &line[..name_end], marker, &line[name_end..]);
    }

    let mut tracker = BracketBalanceTracker::round();
    for (offset, ch) in blanked[args_start..].char_indices() {
        match ch {
            '(' => tracker.increase_balance(),
            ')' => tracker.decrease_balance(),
            _ => continue,
        }
        if tracker.is_balance_empty() {
            let end = args_start + offset + 1;
            return format!("{} {}{}", &line[..end], marker, &line[end..]);
        }
    }

    // Arguments continue on the next line
    format!("{}{} {}", &line[..indent], marker, &line[indent..])
}

/// Whether the declaration at `declaration_line` (1-based) or one of the
/// annotations right above it carries `marker`
pub fn carries_marker(lines: &[String], declaration_line: usize, marker: &str) -> bool {
    if marker.is_empty() || declaration_line == 0 || declaration_line > lines.len() {
        return false;
    }

    let declaration = &lines[declaration_line - 1];
    if declaration.contains(marker) {
        return true;
    }
    lines[..declaration_line - 1]
        .iter()
        .rev()
        .map(|line| line.trim())
        .take_while(|line| line.is_empty() || line.starts_with('@') || line.starts_with(marker))
        .any(|line| line.contains(marker))
}

fn strip_placeholders(line: &str, pattern: &Regex) -> String {
    let blanked = blank_literals(line);
    let mut result = String::with_capacity(line.len());
    let mut last = 0;

    for found in pattern.find_iter(&blanked) {
        result.push_str(&line[last..found.start()]);
        last = found.end();
    }
    result.push_str(&line[last..]);

    if result.trim().is_empty() {
        String::new()
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_block_comments_are_blanked_across_lines() {
        let stage = Stage::BlockCommentBlanking { preserve: None };
        let input = lines("int a; /* {\n still } comment */ int b;\nString s = \"/* no */\";");
        let out = stage.process(&input);

        assert_eq!(out.lines.len(), 3);
        assert_eq!(out.lines[0].trim_end(), "int a;");
        assert_eq!(out.lines[1].trim(), "int b;");
        assert_eq!(out.lines[1].len(), input[1].len());
        assert_eq!(out.lines[2], input[2]);
    }

    #[test]
    fn test_block_comment_blanking_keeps_marker() {
        let stage = Stage::BlockCommentBlanking {
            preserve: Some("/*@CollectCalls*/".to_string()),
        };
        let out = stage.process(&lines("@Test /*@CollectCalls*/ /* gone */"));
        assert_eq!(out.lines[0].trim_end(), "@Test /*@CollectCalls*/");
    }

    #[test]
    fn test_inline_comment_removal() {
        let out = Stage::InlineCommentRemoval.process(&lines(
            "x = 1; // set x\nurl = \"http://a\"; // keep string\n// whole line",
        ));
        assert_eq!(out.lines, vec!["x = 1;", "url = \"http://a\";", ""]);
    }

    #[test]
    fn test_lone_bracket_moves_to_previous_line() {
        let out = Stage::CurlyBracketNormalization
            .process(&lines("public Calc(int x)\n\n   {\n    this.x = x;\n}"));

        assert_eq!(out.lines[0], "public Calc(int x) {");
        assert_eq!(out.lines[2], MOVED_BRACKET);
        assert_eq!(out.sources[0], vec![1, 3]);
        assert_eq!(out.sources[2], vec![3]);
        assert!(out.issues.is_empty());
    }

    #[test]
    fn test_consecutive_lone_brackets_skip_placeholders() {
        let out = Stage::CurlyBracketNormalization.process(&lines("static\n{\n{"));
        assert_eq!(out.lines[0], "static { {");
        assert_eq!(out.sources[0], vec![1, 2, 3]);
    }

    #[test]
    fn test_dangling_bracket_is_reported_and_left_alone() {
        let out = Stage::CurlyBracketNormalization.process(&lines("\n{\n}"));
        assert_eq!(out.lines[1], "{");
        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.issues[0].line, 2);
    }

    #[test]
    fn test_curly_normalization_is_idempotent() {
        let input = lines("class A\n{\n  void f()\n  {\n    g();\n  }\n}");
        let first = Stage::CurlyBracketNormalization.process(&input);
        let second = Stage::CurlyBracketNormalization.process(&first.lines);
        assert_eq!(first.lines, second.lines);
        assert!(second.sources.iter().enumerate().all(|(i, s)| s == &vec![i + 1]));
    }

    #[test]
    fn test_annotation_injection() {
        let stage = Stage::AnnotationInjection {
            annotations: vec!["@Test".to_string()],
            marker: "/*@CollectCalls*/".to_string(),
        };
        let out = stage.process(&lines(
            "  @Test\n  @Test(timeout = 10) public void t() {\n  @TestFactory\n  @Test(\n    expected = E.class)",
        ));

        assert_eq!(out.lines[0], "  @Test /*@CollectCalls*/");
        assert_eq!(out.lines[1], "  @Test(timeout = 10) /*@CollectCalls*/ public void t() {");
        assert_eq!(out.lines[2], "  @TestFactory");
        assert_eq!(out.lines[3], "  /*@CollectCalls*/ @Test(");

        let again = stage.process(&out.lines);
        assert_eq!(again.lines, out.lines);
    }

    #[test]
    fn test_placeholder_cleanup_spares_strings() {
        let stage = Stage::PlaceholderCleanup {
            pattern: Regex::new(PLACEHOLDER_PATTERN).unwrap(),
        };
        let out = stage.process(&lines(&format!(
            "{}\nString f = \"%d%\";\nx(); %moved-bracket%",
            MOVED_BRACKET
        )));
        assert_eq!(out.lines[0], "");
        assert_eq!(out.lines[1], "String f = \"%d%\";");
        assert_eq!(out.lines[2], "x(); ");
    }

    #[test]
    fn test_marker_in_source_is_found_above_declaration() {
        let marker = "/*@CollectCalls*/";
        let source = lines(
            "class T {\n  @Test /*@CollectCalls*/\n  @Timeout(5)\n\n  void traced() {\n  }\n  @Test\n  void plain() {\n  }\n}",
        );
        assert!(carries_marker(&source, 5, marker));
        assert!(!carries_marker(&source, 8, marker));
        assert!(!carries_marker(&source, 8, ""));
        assert!(!carries_marker(&source, 42, marker));

        let inline = lines("  @Test /*@CollectCalls*/ void t() {");
        assert!(carries_marker(&inline, 1, marker));
    }
}
