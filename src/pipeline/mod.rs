//! Email classification pipeline.
//!
//! Every email flows through:
//! 1. Classify: spam flag, category, reasoning
//! 2. Evaluate: a second model judges the classification
//! 3. Refine: only when the verdict is `Incorrect` or `Partially correct`
//!
//! Test generation runs on its own: the evaluator model writes labeled
//! emails, classifies them, and the batch is scored by [`crate::metrics`].

pub mod decode;
pub mod orchestrator;
pub mod stages;
pub mod types;

pub use orchestrator::{ClassificationPipeline, TestSuiteReport};
