//! Shared types for the render pipeline.

use std::fmt;
use std::path::PathBuf;

use crate::error::PipelineError;

/// One external-process step of a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Markup to PDF.
    Compile,
    /// PDF to PNG.
    Convert,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Compile => write!(f, "compile"),
            Stage::Convert => write!(f, "convert"),
        }
    }
}

/// Result of running the compile and convert stages for one job.
#[derive(Debug)]
pub struct PipelineOutcome {
    /// Compiler exit code; `None` if it never exited normally.
    pub exit_status: Option<i32>,
    /// Rendered image; present iff the render succeeded.
    pub output_image: Option<PathBuf>,
    /// Why the render failed, if it did.
    pub failure: Option<PipelineError>,
    /// Combined compiler stdout/stderr.
    pub compiler_log: Vec<u8>,
}

impl PipelineOutcome {
    pub fn success(exit_status: Option<i32>, output_image: PathBuf, compiler_log: Vec<u8>) -> Self {
        Self {
            exit_status,
            output_image: Some(output_image),
            failure: None,
            compiler_log,
        }
    }

    pub fn failed(exit_status: Option<i32>, failure: PipelineError, compiler_log: Vec<u8>) -> Self {
        Self {
            exit_status,
            output_image: None,
            failure: Some(failure),
            compiler_log,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.output_image.is_some()
    }
}
