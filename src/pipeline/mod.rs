//! Render pipeline: `pdflatex` then `convert`, each as a bounded child process.
//!
//! 1. `Stage::Compile`: `pdflatex -interaction=nonstopmode main.tex`
//! 2. `Stage::Convert`: `convert -density 300 main.pdf -quality 90 main.png`
//!
//! Every failure is folded into a [`PipelineOutcome`]; nothing propagates out
//! of [`PipelineRunner::run`].

pub mod runner;
pub mod types;

pub use runner::{COMPILE_ARGS, CONVERT_ARGS, PipelineRunner};
pub use types::{PipelineOutcome, Stage};
