use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ExecFlowError, Result};

/// Character encoding of the analyzed source files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceEncoding {
    #[serde(rename = "utf-8", alias = "UTF-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "iso-8859-1", alias = "ISO-8859-1", alias = "latin1")]
    Iso8859_1,
}

impl SourceEncoding {
    /// Decode raw file bytes into text
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            Self::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| {
                ExecFlowError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            }),
            // Every ISO-8859-1 byte is the code point of the same value
            Self::Iso8859_1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    /// Encode text back into file bytes
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Iso8859_1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        ExecFlowError::Io(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("character {:?} is not representable in ISO-8859-1", c),
                        ))
                    })
                })
                .collect(),
        }
    }

    /// Name understood by `javac -encoding`
    pub fn javac_name(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Iso8859_1 => "ISO-8859-1",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project layout
    pub project: ProjectConfig,

    /// External compiler and debugger settings
    pub toolchain: ToolchainConfig,

    /// Debugger session limits
    pub session: SessionConfig,

    /// Source transformation settings
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Root of the application sources
    pub source_root: PathBuf,

    /// Root of the test sources
    pub test_root: PathBuf,

    /// Directory receiving compiled classes
    pub binary_dir: PathBuf,

    /// Encoding of every source file in the project
    pub encoding: SourceEncoding,

    /// Class-name prefixes considered project code when stepping
    pub project_packages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Path to the `javac` executable
    pub javac: PathBuf,

    /// Path to the `jdb` executable
    pub jdb: PathBuf,

    /// Extra classpath entries, passed through untouched
    pub classpath: Vec<PathBuf>,

    /// Directories searched for named libraries
    pub library_dirs: Vec<PathBuf>,

    /// Named libraries resolved explicitly (name -> path)
    pub libraries: HashMap<String, PathBuf>,

    /// Libraries every compilation and debugger run needs
    pub required_libraries: Vec<String>,

    /// Main class launched under the debugger
    pub runner_class: String,

    /// Arguments for the runner; `{class}` and `{method}` are substituted
    pub runner_args: Vec<String>,

    /// Upper bound for one compiler invocation
    pub compile_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// A session with no debugger output for this long is truncated
    pub idle_timeout_ms: u64,

    /// Upper bound for a whole session, however busy the debugger is
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,

    /// Time a cancelled debugger gets to exit before it is killed
    pub kill_grace_ms: u64,

    /// Step into project classes called by tracked elements
    pub collect_calls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Annotations marking a test method
    pub test_annotations: Vec<String>,

    /// Marker appended to test annotations when calls are collected
    pub collect_calls_marker: String,

    /// Blank `/* ... */` comments before scanning
    pub strip_block_comments: bool,
}

fn default_max_duration_ms() -> u64 {
    300_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig {
                source_root: PathBuf::from("src/main/java"),
                test_root: PathBuf::from("src/test/java"),
                binary_dir: PathBuf::from("target/classes"),
                encoding: SourceEncoding::Utf8,
                project_packages: vec![],
            },
            toolchain: ToolchainConfig {
                javac: PathBuf::from("javac"),
                jdb: PathBuf::from("jdb"),
                classpath: vec![],
                library_dirs: vec![PathBuf::from("lib")],
                libraries: HashMap::new(),
                required_libraries: vec!["junit".to_string(), "hamcrest".to_string()],
                runner_class: "org.junit.runner.JUnitCore".to_string(),
                runner_args: vec!["{class}".to_string()],
                compile_timeout_secs: 120,
            },
            session: SessionConfig {
                idle_timeout_ms: 15_000,
                max_duration_ms: default_max_duration_ms(),
                kill_grace_ms: 2_000,
                collect_calls: false,
            },
            processing: ProcessingConfig {
                test_annotations: vec![
                    "@Test".to_string(),
                    "@org.junit.Test".to_string(),
                    "@ParameterizedTest".to_string(),
                    "@RepeatedTest".to_string(),
                ],
                collect_calls_marker: "/*@CollectCalls*/".to_string(),
                strip_block_comments: true,
            },
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ExecFlowError::Configuration(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Ok(Self::default())
                }
            }
            None => {
                let candidates = ["ExecFlow.toml", "execflow.toml", ".execflow.toml"];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    /// Reject settings the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.session.idle_timeout_ms == 0 {
            return Err(ExecFlowError::Configuration(
                "session.idle_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.session.max_duration_ms < self.session.idle_timeout_ms {
            return Err(ExecFlowError::Configuration(
                "session.max_duration_ms must not be shorter than session.idle_timeout_ms".to_string(),
            ));
        }
        if self.toolchain.compile_timeout_secs == 0 {
            return Err(ExecFlowError::Configuration(
                "toolchain.compile_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.toolchain.runner_class.trim().is_empty() {
            return Err(ExecFlowError::Configuration(
                "toolchain.runner_class must not be empty".to_string(),
            ));
        }
        if self.processing.collect_calls_marker.contains('\n') {
            return Err(ExecFlowError::Configuration(
                "processing.collect_calls_marker must fit on one line".to_string(),
            ));
        }
        Ok(())
    }
}
