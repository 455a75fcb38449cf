use std::path::Path;

use crate::error::{ExecFlowError, Result};
use super::balance::BracketBalanceTracker;
use super::literals::blank_literals;

/// Location of a method or constructor body, in transformed coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodySpan {
    /// Line holding the opening `{`
    pub open_line: usize,
    /// First line the debugger can stop at inside the body
    pub entry_line: usize,
    /// Line holding the closing `}`
    pub close_line: usize,
    /// The closing line holds nothing but the `}`
    pub close_is_bare: bool,
}

impl BodySpan {
    pub fn contains(&self, line: usize) -> bool {
        (self.open_line..=self.close_line).contains(&line)
    }
}

/// Find the body of the element declared at `declaration_line` (1-based).
pub fn locate_body(lines: &[String], declaration_line: usize, path: &Path) -> Result<BodySpan> {
    let start = declaration_line
        .checked_sub(1)
        .filter(|&index| index < lines.len())
        .ok_or_else(|| ExecFlowError::Transformation {
            path: path.to_path_buf(),
            line: declaration_line,
            reason: "declaration line is outside the file".to_string(),
        })?;

    let mut tracker = BracketBalanceTracker::curly();
    let mut open_line = None;

    for (index, line) in lines.iter().enumerate().skip(start) {
        // Signatures never contain `;` before their body starts
        if open_line.is_none() && blank_literals(line).contains(';') && !line.contains('{') {
            break;
        }

        tracker.parse(line);
        if open_line.is_none() && tracker.already_increased() {
            open_line = Some(index);
        }

        if let Some(open) = open_line {
            if tracker.is_balance_empty() {
                return Ok(BodySpan {
                    open_line: open + 1,
                    entry_line: entry_line(lines, open, index),
                    close_line: index + 1,
                    close_is_bare: blank_literals(line).trim() == "}",
                });
            }
        }
    }

    Err(ExecFlowError::Transformation {
        path: path.to_path_buf(),
        line: declaration_line,
        reason: match open_line {
            Some(_) => "body is never closed".to_string(),
            None => "no opening bracket after declaration".to_string(),
        },
    })
}

fn entry_line(lines: &[String], open: usize, close: usize) -> usize {
    let opening = blank_literals(&lines[open]);
    if let Some(pos) = opening.find('{') {
        let after = opening[pos + 1..].trim();
        if !after.is_empty() && after != "}" {
            return open + 1;
        }
    }

    (open + 1..close)
        .find(|&index| {
            let text = lines[index].trim();
            !text.is_empty() && text != "}"
        })
        .map(|index| index + 1)
        .unwrap_or(close + 1)
}
