// src/core/invoked/file_manager.rs
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::config::SourceEncoding;
use crate::core::processing::{ProcessedSource, SourceCodeProcessor};
use crate::core::toolchain::Compiler;
use crate::error::{ExecFlowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Pristine,
    BackedUp,
    Transformed,
    Compiled,
    Reverted,
}

struct BinaryBackup {
    original: PathBuf,
    copy: PathBuf,
}

struct Backup {
    _dir: TempDir,
    source_copy: PathBuf,
    digest: String,
    binaries: Vec<BinaryBackup>,
}

/// Owns the on-disk state of one source file (and its class files) while it
/// is transformed, compiled and run, and puts everything back afterwards.
///
/// Dropping a manager that was backed up but never reverted reverts it.
pub struct InvokedFileManager {
    source_path: PathBuf,
    binary_dir: PathBuf,
    class_stem: String,
    encoding: SourceEncoding,
    backup: Option<Backup>,
    processed: Option<ProcessedSource>,
    state: FileState,
}

impl InvokedFileManager {
    /// `binary_path` is the class file of the top-level class in `source_path`
    pub fn new(source_path: &Path, binary_path: &Path, encoding: SourceEncoding) -> Self {
        let class_stem = source_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let binary_dir = binary_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Self {
            source_path: source_path.to_path_buf(),
            binary_dir,
            class_stem,
            encoding,
            backup: None,
            processed: None,
            state: FileState::Pristine,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn processed(&self) -> Option<&ProcessedSource> {
        self.processed.as_ref()
    }

    /// Hand the processed source (and its mapping) over once the file is reverted
    pub fn take_processed(&mut self) -> Option<ProcessedSource> {
        self.processed.take()
    }

    /// Copy the source and any existing class files aside. Idempotent.
    pub fn backup(&mut self) -> Result<()> {
        if self.backup.is_some() {
            return Ok(());
        }

        let dir = tempfile::Builder::new().prefix("execflow-").tempdir()?;
        let bytes = std::fs::read(&self.source_path)?;
        let source_copy = dir.path().join("source.bak");
        std::fs::write(&source_copy, &bytes)?;

        let mut binaries = Vec::new();
        for (index, original) in self.class_files()?.into_iter().enumerate() {
            let copy = dir.path().join(format!("binary-{}.bak", index));
            std::fs::copy(&original, &copy)?;
            binaries.push(BinaryBackup { original, copy });
        }

        debug!(
            "Backed up {} and {} class file(s)",
            self.source_path.display(),
            binaries.len()
        );

        self.backup = Some(Backup {
            _dir: dir,
            source_copy,
            digest: digest(&bytes),
            binaries,
        });
        self.state = FileState::BackedUp;
        Ok(())
    }

    /// Transform the original source and write it in place.
    ///
    /// Files with unresolved anchors are not written; callers check
    /// [`ProcessedSource::is_supported`].
    pub fn apply(&mut self, processor: &SourceCodeProcessor) -> Result<&ProcessedSource> {
        self.backup()?;
        let original = match &self.backup {
            Some(backup) => std::fs::read(&backup.source_copy)?,
            None => std::fs::read(&self.source_path)?,
        };

        let text = self.encoding.decode(&original)?;
        let processed = processor.process(&text, &self.source_path);

        if processed.is_supported() {
            std::fs::write(&self.source_path, self.encoding.encode(&processed.text())?)?;
            self.state = FileState::Transformed;
        }

        Ok(self.processed.insert(processed))
    }

    /// Compile the transformed source into `output_dir`
    pub async fn compile(&mut self, compiler: &dyn Compiler, output_dir: &Path) -> Result<()> {
        if self.state != FileState::Transformed {
            return Err(ExecFlowError::Compile {
                path: self.source_path.clone(),
                output: "source was not transformed".to_string(),
            });
        }

        compiler.compile(&self.source_path, output_dir, self.encoding).await?;
        self.state = FileState::Compiled;
        Ok(())
    }

    /// Restore the original source text
    pub fn revert_parse(&mut self) -> Result<()> {
        let Some(backup) = &self.backup else {
            return Ok(());
        };

        let bytes = std::fs::read(&backup.source_copy)?;
        std::fs::write(&self.source_path, &bytes)?;

        let restored = std::fs::read(&self.source_path)?;
        if digest(&restored) != backup.digest {
            warn!("Restored {} differs from its backup", self.source_path.display());
        }

        if self.state != FileState::Compiled {
            self.state = FileState::Reverted;
        }
        Ok(())
    }

    /// Restore the original source and the class files present before
    /// compilation; class files produced since are removed.
    pub fn revert_compilation(&mut self) -> Result<()> {
        self.revert_parse()?;

        let Some(backup) = &self.backup else {
            return Ok(());
        };

        for produced in self.class_files()? {
            std::fs::remove_file(&produced)?;
        }
        for binary in &backup.binaries {
            std::fs::copy(&binary.copy, &binary.original)?;
        }

        debug!("Reverted {}", self.source_path.display());
        self.state = FileState::Reverted;
        Ok(())
    }

    /// `Name.class` and `Name$*.class` next to the binary path
    fn class_files(&self) -> Result<Vec<PathBuf>> {
        if !self.binary_dir.is_dir() {
            return Ok(Vec::new());
        }

        let inner_prefix = format!("{}$", self.class_stem);
        let exact = format!("{}.class", self.class_stem);
        let mut files = Vec::new();

        for entry in std::fs::read_dir(&self.binary_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name == exact || (name.starts_with(&inner_prefix) && name.ends_with(".class")) {
                files.push(entry.path());
            }
        }

        files.sort();
        Ok(files)
    }
}

impl Drop for InvokedFileManager {
    fn drop(&mut self) {
        if self.backup.is_some() && self.state != FileState::Reverted {
            if let Err(e) = self.revert_compilation() {
                warn!("Failed to revert {}: {}", self.source_path.display(), e);
            }
        }
    }
}

fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
