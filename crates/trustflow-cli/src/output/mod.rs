//! Output formatters for relation maps, diffs and cross-package results

pub mod json;
pub mod pretty;

use clap::ValueEnum;

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Colored, human-readable text
    #[default]
    Pretty,
    /// Structured JSON for programmatic consumers
    Json,
}
