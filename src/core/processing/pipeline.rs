// src/core/processing/pipeline.rs
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::ProcessingConfig;
use crate::error::{ExecFlowError, Result};
use super::mapping::LineMapping;
use super::stages::{Stage, PLACEHOLDER_PATTERN};

/// Result of running the pipeline over one source file
#[derive(Debug)]
pub struct ProcessedSource {
    /// File the text came from
    pub path: PathBuf,

    /// Transformed lines, without line terminators
    pub lines: Vec<String>,

    /// Original <-> transformed line correspondence
    pub mapping: LineMapping,

    /// Anchors some stage could not resolve
    pub issues: Vec<ExecFlowError>,

    line_ending: &'static str,
    trailing_newline: bool,
}

impl ProcessedSource {
    /// Whether test paths can be computed for elements of this file
    pub fn is_supported(&self) -> bool {
        self.issues.is_empty()
    }

    /// Transformed text with the original line terminators
    pub fn text(&self) -> String {
        let mut text = self.lines.join(self.line_ending);
        if self.trailing_newline {
            text.push_str(self.line_ending);
        }
        text
    }
}

/// Runs the source normalization stages in order and composes their line
/// maps into one end-to-end [`LineMapping`].
pub struct SourceCodeProcessor {
    stages: Vec<Stage>,
}

impl SourceCodeProcessor {
    pub fn new(config: &ProcessingConfig) -> Result<Self> {
        let marker = config.collect_calls_marker.trim().to_string();
        let mut stages = Vec::new();

        if config.strip_block_comments {
            stages.push(Stage::BlockCommentBlanking {
                preserve: (!marker.is_empty()).then(|| marker.clone()),
            });
        }
        stages.push(Stage::InlineCommentRemoval);
        stages.push(Stage::CurlyBracketNormalization);
        if !marker.is_empty() && !config.test_annotations.is_empty() {
            stages.push(Stage::AnnotationInjection {
                annotations: config.test_annotations.clone(),
                marker,
            });
        }
        stages.push(Stage::PlaceholderCleanup {
            pattern: Regex::new(PLACEHOLDER_PATTERN)?,
        });

        Ok(Self { stages })
    }

    /// Pipeline made of explicit stages, in order
    pub fn with_stages(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Transform source text. Never fails: unresolved anchors are collected in
    /// [`ProcessedSource::issues`] and the affected lines stay unchanged.
    pub fn process(&self, text: &str, path: &Path) -> ProcessedSource {
        let line_ending = if text.contains("\r\n") { "\r\n" } else { "\n" };
        let trailing_newline = text.ends_with('\n');

        let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
        let mut mapping = LineMapping::identity(lines.len());
        let mut issues = Vec::new();

        for stage in &self.stages {
            let output = stage.process(&lines);

            for issue in output.issues {
                let original = mapping.original(issue.line).unwrap_or(issue.line);
                warn!(
                    "{} could not transform {}:{}: {}",
                    stage.name(),
                    path.display(),
                    original,
                    issue.reason
                );
                issues.push(ExecFlowError::Transformation {
                    path: path.to_path_buf(),
                    line: original,
                    reason: issue.reason,
                });
            }

            let stage_mapping = LineMapping::from_sources(output.sources);
            if !stage_mapping.is_identity() {
                debug!("{} merged lines in {}", stage.name(), path.display());
                mapping = mapping.compose(&stage_mapping);
            }
            lines = output.lines;
        }

        ProcessedSource {
            path: path.to_path_buf(),
            lines,
            mapping,
            issues,
            line_ending,
            trailing_newline,
        }
    }
}
