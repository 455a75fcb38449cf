// src/core/toolchain.rs
//! Adapters for the external compiler, test runner and library lookup.
use async_trait::async_trait;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{Config, SourceEncoding, ToolchainConfig};
use crate::error::{ExecFlowError, Result};
use super::debugger::DebuggerProcess;
use super::invoked::InvokedElement;

/// Compiles one source file into an output directory
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, source: &Path, output_dir: &Path, encoding: SourceEncoding) -> Result<()>;
}

/// Launches a test method under the debugger
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, test_method: &InvokedElement) -> Result<DebuggerProcess>;
}

/// Resolves named libraries to jar paths
#[derive(Debug, Clone)]
pub struct LibraryResolver {
    libraries: HashMap<String, PathBuf>,
    library_dirs: Vec<PathBuf>,
}

impl LibraryResolver {
    pub fn new(config: &ToolchainConfig) -> Self {
        Self {
            libraries: config.libraries.clone(),
            library_dirs: config.library_dirs.clone(),
        }
    }

    /// Explicit entries win; otherwise the first `<name>*.jar` found under
    /// the library directories.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        if let Some(path) = self.libraries.get(name) {
            return Ok(path.clone());
        }

        for dir in self.library_dirs.iter().filter(|d| d.is_dir()) {
            let found = WalkDir::new(dir)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .find(|entry| {
                    let file_name = entry.file_name().to_string_lossy();
                    entry.file_type().is_file()
                        && file_name.starts_with(name)
                        && file_name.ends_with(".jar")
                });

            if let Some(entry) = found {
                debug!("Resolved library {} to {}", name, entry.path().display());
                return Ok(entry.into_path());
            }
        }

        Err(ExecFlowError::Configuration(format!(
            "library '{}' not found in {:?}",
            name, self.library_dirs
        )))
    }

    pub fn resolve_all(&self, names: &[String]) -> Result<Vec<PathBuf>> {
        names.iter().map(|name| self.resolve(name)).collect()
    }
}

/// Classpath shared by compilation and the debugger run
pub fn project_classpath(config: &Config, resolver: &LibraryResolver) -> Result<Vec<PathBuf>> {
    let mut classpath = vec![config.project.binary_dir.clone()];
    classpath.extend(config.toolchain.classpath.iter().cloned());
    classpath.extend(resolver.resolve_all(&config.toolchain.required_libraries)?);
    Ok(classpath)
}

fn join_paths(paths: &[PathBuf]) -> Result<OsString> {
    std::env::join_paths(paths).map_err(|e| ExecFlowError::Configuration(e.to_string()))
}

/// `javac` invoked once per file
pub struct JavacCompiler {
    javac: PathBuf,
    classpath: Vec<PathBuf>,
    source_roots: Vec<PathBuf>,
    timeout: Duration,
}

impl JavacCompiler {
    pub fn new(config: &Config, classpath: Vec<PathBuf>) -> Self {
        Self {
            javac: config.toolchain.javac.clone(),
            classpath,
            source_roots: vec![config.project.source_root.clone(), config.project.test_root.clone()],
            timeout: Duration::from_secs(config.toolchain.compile_timeout_secs),
        }
    }
}

#[async_trait]
impl Compiler for JavacCompiler {
    async fn compile(&self, source: &Path, output_dir: &Path, encoding: SourceEncoding) -> Result<()> {
        std::fs::create_dir_all(output_dir)?;

        let mut command = Command::new(&self.javac);
        command
            .arg("-g")
            .arg("-encoding")
            .arg(encoding.javac_name())
            .arg("-d")
            .arg(output_dir)
            .arg("-cp")
            .arg(join_paths(&self.classpath)?)
            .arg("-sourcepath")
            .arg(join_paths(&self.source_roots)?)
            .arg(source)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!("Compiling {}", source.display());
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(ExecFlowError::Compile {
                    path: source.to_path_buf(),
                    output: format!("javac timed out after {:?}", self.timeout),
                })
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(ExecFlowError::Compile {
                path: source.to_path_buf(),
                output: [
                    String::from_utf8_lossy(&output.stderr),
                    String::from_utf8_lossy(&output.stdout),
                ]
                .concat(),
            })
        }
    }
}

/// Runs the test class under `jdb`
pub struct JdbRunner {
    jdb: PathBuf,
    classpath: Vec<PathBuf>,
    source_roots: Vec<PathBuf>,
    runner_class: String,
    runner_args: Vec<String>,
}

impl JdbRunner {
    pub fn new(config: &Config, classpath: Vec<PathBuf>) -> Self {
        Self {
            jdb: config.toolchain.jdb.clone(),
            classpath,
            source_roots: vec![config.project.source_root.clone(), config.project.test_root.clone()],
            runner_class: config.toolchain.runner_class.clone(),
            runner_args: config.toolchain.runner_args.clone(),
        }
    }

    /// Runner arguments with `{class}` and `{method}` substituted
    pub fn arguments(&self, test_method: &InvokedElement) -> Vec<String> {
        self.runner_args
            .iter()
            .map(|arg| {
                arg.replace("{class}", &test_method.class_name)
                    .replace("{method}", &test_method.method_name)
            })
            .collect()
    }
}

#[async_trait]
impl TestRunner for JdbRunner {
    async fn run(&self, test_method: &InvokedElement) -> Result<DebuggerProcess> {
        let mut command = Command::new(&self.jdb);
        command
            .arg("-classpath")
            .arg(join_paths(&self.classpath)?)
            .arg("-sourcepath")
            .arg(join_paths(&self.source_roots)?)
            .arg(&self.runner_class)
            .args(self.arguments(test_method))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("Launching debugger for {}", test_method.signature);
        let child = command.spawn()?;
        DebuggerProcess::from_child(child)
    }
}
