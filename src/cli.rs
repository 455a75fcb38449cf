use clap::{Parser, Subcommand};
use std::path::PathBuf;
use anyhow::{Context, Result};
use tracing::info;

use crate::core::{AnalysisRequest, Engine};

#[derive(Parser)]
#[command(name = "execflow")]
#[command(about = "Computes the source lines a test executes in the code it tests")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default configuration file
    Init {
        /// Target directory (defaults to current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Trace one test method and compute its test paths
    Analyze {
        /// TOML file naming the test method and the elements it invokes
        #[arg(short, long)]
        request: PathBuf,

        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Step into project methods called by the tested elements
        #[arg(long)]
        collect_calls: bool,
    },

    /// Print a source file as the pipeline rewrites it
    Transform {
        /// Source file to process (left untouched)
        source: PathBuf,

        /// Print the line mapping instead of the transformed text
        #[arg(long)]
        mapping: bool,
    },
}

impl Cli {
    pub async fn execute(self, engine: Engine) -> Result<()> {
        match self.command {
            Commands::Init { path, force } => {
                let written = engine.init(path, force)?;
                println!("{}", written.display());
                Ok(())
            }
            Commands::Analyze { request, output, collect_calls } => {
                let mut request = AnalysisRequest::load(&request)?;
                if collect_calls {
                    request.collect_calls = Some(true);
                }

                let collection = engine.analyze(request).await?;
                let json = collection.to_json()?;
                match output {
                    Some(path) => {
                        std::fs::write(&path, json)
                            .with_context(|| format!("Failed to write {}", path.display()))?;
                        info!("Report written to {}", path.display());
                    }
                    None => println!("{}", json),
                }
                Ok(())
            }
            Commands::Transform { source, mapping } => {
                let processed = engine.transform(&source)?;
                if mapping {
                    for line in 1..=processed.mapping.transformed_len() {
                        let originals: Vec<String> = processed
                            .mapping
                            .originals(line)
                            .iter()
                            .map(ToString::to_string)
                            .collect();
                        println!("{}\t{}", line, originals.join(","));
                    }
                } else {
                    print!("{}", processed.text());
                }
                Ok(())
            }
        }
    }
}
