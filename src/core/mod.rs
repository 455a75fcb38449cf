// Pipeline components
pub mod debugger;
pub mod invoked;
pub mod processing;
pub mod test_path;
pub mod toolchain;

mod engine;

pub use engine::{AnalysisRequest, Engine};
