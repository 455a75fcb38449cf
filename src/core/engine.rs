// src/core/engine.rs
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ExecFlowError;
use super::debugger::{DebuggerSessionDriver, SessionPlan, SessionSettings, TrackedElement};
use super::invoked::{ElementDescriptor, InvokedElement, InvokedFileManager};
use super::processing::{carries_marker, locate_body, BodySpan, LineMapping, ProcessedSource, SourceCodeProcessor};
use super::test_path::{TestPathBuilder, TestPathCollection};
use super::toolchain::{project_classpath, Compiler, JavacCompiler, JdbRunner, LibraryResolver, TestRunner};

/// One test method and the methods/constructors it exercises
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub test_method: ElementDescriptor,
    #[serde(default)]
    pub elements: Vec<ElementDescriptor>,
    /// Overrides the marker in the test source and `session.collect_calls`
    #[serde(default)]
    pub collect_calls: Option<bool>,
}

impl AnalysisRequest {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read analysis request {}", path.display()))?;
        let request = toml::from_str(&content).map_err(ExecFlowError::from)?;
        Ok(request)
    }
}

/// Source file touched by an analysis and the elements declared in it
struct FileGroup {
    source: PathBuf,
    binary: PathBuf,
    elements: Vec<InvokedElement>,
    holds_test: bool,
}

/// Result of instrumenting one file
struct Instrumented {
    mapping: LineMapping,
    bodies: Vec<(InvokedElement, BodySpan)>,
    failures: Vec<(String, ExecFlowError)>,
}

type Toolchain = (Arc<dyn Compiler>, Arc<dyn TestRunner>);

/// Main orchestration engine: instrument, compile, trace, revert, rebuild
pub struct Engine {
    config: Config,
    processor: SourceCodeProcessor,
    toolchain: Option<Toolchain>,
    cancel: CancellationToken,
}

impl Engine {
    /// Create an engine using `javac`/`jdb` as configured
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        debug!("Loaded configuration: {:?}", config);
        Self::from_config(config, None)
    }

    /// Create an engine around an explicit compiler and test runner
    pub fn with_toolchain(
        config: Config,
        compiler: Arc<dyn Compiler>,
        runner: Arc<dyn TestRunner>,
    ) -> Result<Self> {
        Self::from_config(config, Some((compiler, runner)))
    }

    fn from_config(config: Config, toolchain: Option<Toolchain>) -> Result<Self> {
        config.validate()?;
        let processor = SourceCodeProcessor::new(&config.processing)?;
        debug!("Processing stages: {}", processor.stage_names().join(", "));

        Ok(Self {
            config,
            processor,
            toolchain,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cancelling the token aborts a running debugger session
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Write a default configuration file into `path`
    pub fn init(&self, path: Option<PathBuf>, force: bool) -> Result<PathBuf> {
        let target_dir = match path {
            Some(path) => path,
            None => std::env::current_dir()?,
        };
        let config_path = target_dir.join("execflow.toml");
        if config_path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", config_path.display());
        }

        std::fs::create_dir_all(&target_dir)?;
        Config::default().save(&config_path)?;
        info!("Wrote default configuration to {}", config_path.display());
        Ok(config_path)
    }

    /// Run the processing pipeline on `source` without touching the file
    pub fn transform(&self, source: &Path) -> Result<ProcessedSource> {
        let bytes = std::fs::read(source)
            .with_context(|| format!("Failed to read {}", source.display()))?;
        let text = self.config.project.encoding.decode(&bytes)?;
        let processed = self.processor.process(&text, source);

        for issue in &processed.issues {
            warn!("{}", issue);
        }
        Ok(processed)
    }

    /// Compute the test paths of every element `request` names
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<TestPathCollection> {
        let test_method = InvokedElement::from_descriptor(request.test_method)?;
        let elements = request
            .elements
            .into_iter()
            .map(InvokedElement::from_descriptor)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if elements.is_empty() {
            return Err(ExecFlowError::Configuration(format!(
                "no invoked elements given for {}",
                test_method
            ))
            .into());
        }

        let collect_calls = match request.collect_calls {
            Some(collect) => collect,
            None => {
                self.marked_for_call_collection(&test_method)? || self.config.session.collect_calls
            }
        };
        info!(
            "Analyzing {} ({} element(s), collect calls: {})",
            test_method,
            elements.len(),
            collect_calls
        );

        let groups = group_by_file(&test_method, elements, &self.config.project.binary_dir);
        let mut managers = Vec::with_capacity(groups.len());

        let result = self
            .trace(&test_method, &groups, collect_calls, &mut managers)
            .await;

        // Every file goes back to its original state, whatever happened above
        let mut revert_failure = None;
        for manager in &mut managers {
            if let Err(e) = manager.revert_compilation() {
                warn!("Failed to revert {}: {}", manager.source_path().display(), e);
                revert_failure.get_or_insert(e);
            }
        }

        let collection = result?;
        if let Some(e) = revert_failure {
            return Err(anyhow::Error::from(e).context("Failed to restore instrumented files"));
        }

        info!(
            "Computed test paths for {} element(s), {} excluded",
            collection.paths.len(),
            collection.excluded.len()
        );
        Ok(collection)
    }

    async fn trace(
        &self,
        test_method: &InvokedElement,
        groups: &[FileGroup],
        collect_calls: bool,
        managers: &mut Vec<InvokedFileManager>,
    ) -> Result<TestPathCollection> {
        let (compiler, runner) = self.toolchain()?;
        let mut builder = TestPathBuilder::new(test_method.clone());
        let mut plan = SessionPlan {
            tracked: Vec::new(),
            project_packages: self.project_packages(test_method, groups),
        };

        for group in groups {
            if group.holds_test && plan.tracked.is_empty() && group.elements.is_empty() {
                break;
            }

            managers.push(InvokedFileManager::new(
                &group.source,
                &group.binary,
                self.config.project.encoding,
            ));
            let manager = managers
                .last_mut()
                .context("file manager missing right after creation")?;

            match self.instrument(manager, group, compiler.as_ref()).await {
                Ok(instrumented) => {
                    builder.add_mapping(group.source.clone(), instrumented.mapping);
                    for (element, body) in instrumented.bodies {
                        plan.tracked.push(TrackedElement {
                            key: element.key(),
                            entry_line: body.entry_line,
                            close_line: body.close_line,
                            close_is_bare: body.close_is_bare,
                            collect_calls,
                        });
                        builder.track(element, body);
                    }
                    for (signature, error) in instrumented.failures {
                        warn!("Skipping {}: {}", signature, error);
                        builder.exclude(signature, &error);
                    }
                }
                Err(e) if e.is_fatal() || group.holds_test => {
                    return Err(anyhow::Error::from(e)
                        .context(format!("Failed to prepare {}", group.source.display())));
                }
                Err(e) => {
                    warn!("Skipping {}: {}", group.source.display(), e);
                    for element in &group.elements {
                        builder.exclude(element.signature.clone(), &e);
                    }
                }
            }
        }

        if plan.tracked.is_empty() {
            warn!("Nothing left to trace for {}", test_method);
            return Ok(builder.build(&[], false));
        }

        let driver = DebuggerSessionDriver::new(plan, SessionSettings::from(&self.config.session))?
            .with_cancellation(self.cancel.child_token());
        let process = runner.run(test_method).await?;
        let outcome = driver.run(process).await?;

        if let Some(failure) = &outcome.failure {
            warn!("Debugger session for {} ended early: {}", test_method, failure);
        }

        Ok(builder.build(&outcome.traces, !outcome.is_complete()))
    }

    /// Transform, locate element bodies and compile one file
    async fn instrument(
        &self,
        manager: &mut InvokedFileManager,
        group: &FileGroup,
        compiler: &dyn Compiler,
    ) -> crate::error::Result<Instrumented> {
        let processed = manager.apply(&self.processor)?;
        if !processed.is_supported() {
            return Err(processed
                .issues
                .first()
                .map(|issue| ExecFlowError::Transformation {
                    path: group.source.clone(),
                    line: match issue {
                        ExecFlowError::Transformation { line, .. } => *line,
                        _ => 0,
                    },
                    reason: format!("unsupported for path computation: {}", issue),
                })
                .unwrap_or_else(|| ExecFlowError::Transformation {
                    path: group.source.clone(),
                    line: 0,
                    reason: "unsupported for path computation".to_string(),
                }));
        }

        let mut bodies = Vec::new();
        let mut failures = Vec::new();
        for element in &group.elements {
            let located = processed
                .mapping
                .transformed(element.declaration_line)
                .first()
                .copied()
                .ok_or_else(|| ExecFlowError::Transformation {
                    path: group.source.clone(),
                    line: element.declaration_line,
                    reason: "declaration line was removed by transformation".to_string(),
                })
                .and_then(|line| locate_body(&processed.lines, line, &group.source));

            match located {
                Ok(body) => {
                    debug!(
                        "{}: entry line {}, closing line {}",
                        element, body.entry_line, body.close_line
                    );
                    bodies.push((element.clone(), body));
                }
                Err(e) => failures.push((element.signature.clone(), e)),
            }
        }
        let mapping = processed.mapping.clone();

        manager.compile(compiler, &self.config.project.binary_dir).await?;

        Ok(Instrumented {
            mapping,
            bodies,
            failures,
        })
    }

    fn toolchain(&self) -> crate::error::Result<Toolchain> {
        if let Some(toolchain) = &self.toolchain {
            return Ok(toolchain.clone());
        }

        let resolver = LibraryResolver::new(&self.config.toolchain);
        let classpath = project_classpath(&self.config, &resolver)?;
        Ok((
            Arc::new(JavacCompiler::new(&self.config, classpath.clone())),
            Arc::new(JdbRunner::new(&self.config, classpath)),
        ))
    }

    /// Whether the test method's annotations already carry the collect-calls
    /// marker in the original source
    fn marked_for_call_collection(&self, test_method: &InvokedElement) -> Result<bool> {
        let path = &test_method.source_path;
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let lines: Vec<String> = self
            .config
            .project
            .encoding
            .decode(&bytes)?
            .lines()
            .map(str::to_string)
            .collect();

        let marked = carries_marker(
            &lines,
            test_method.declaration_line,
            self.config.processing.collect_calls_marker.trim(),
        );
        if marked {
            debug!("{} is marked for call collection", test_method);
        }
        Ok(marked)
    }

    /// Configured project packages, or the packages of everything analyzed
    fn project_packages(&self, test_method: &InvokedElement, groups: &[FileGroup]) -> Vec<String> {
        if !self.config.project.project_packages.is_empty() {
            return self.config.project.project_packages.clone();
        }

        let mut packages: Vec<String> = std::iter::once(test_method)
            .chain(groups.iter().flat_map(|g| g.elements.iter()))
            .map(|element| element.package().unwrap_or_default().to_string())
            .collect();
        packages.sort();
        packages.dedup();
        packages
    }
}

/// Group elements by declaring file; the test method's file comes last.
///
/// Class files are looked up where compilation into `output_dir` puts them.
fn group_by_file(
    test_method: &InvokedElement,
    elements: Vec<InvokedElement>,
    output_dir: &Path,
) -> Vec<FileGroup> {
    let mut by_source: BTreeMap<PathBuf, FileGroup> = BTreeMap::new();

    for element in elements {
        by_source
            .entry(element.source_path.clone())
            .or_insert_with(|| FileGroup {
                source: element.source_path.clone(),
                binary: class_file(&element, output_dir),
                elements: Vec::new(),
                holds_test: false,
            })
            .elements
            .push(element);
    }

    let mut test_group = by_source
        .remove(&test_method.source_path)
        .unwrap_or_else(|| FileGroup {
            source: test_method.source_path.clone(),
            binary: class_file(test_method, output_dir),
            elements: Vec::new(),
            holds_test: true,
        });
    test_group.holds_test = true;

    let mut groups: Vec<FileGroup> = by_source.into_values().collect();
    groups.push(test_group);
    groups
}

fn class_file(element: &InvokedElement, output_dir: &Path) -> PathBuf {
    let compiled = element.class_file_in(output_dir);
    if compiled != element.binary_path {
        warn!(
            "{} names {} but compiles to {}; tracking the latter",
            element,
            element.binary_path.display(),
            compiled.display()
        );
    }
    compiled
}
