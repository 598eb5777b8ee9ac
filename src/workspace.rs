//! Per-worker scratch directory for one compile/convert cycle at a time.
//!
//! Each worker creates exactly one workspace when it starts and reuses it
//! for every job it runs. The directory contains:
//! - `main.tex`: the assembled source, overwritten per job
//! - `main.pdf`: compiler output (named by pdflatex convention)
//! - `main.png`: converter output, cleared before each convert

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::fs;

use crate::error::WorkspaceError;

/// Well-known workspace file names.
pub mod paths {
    pub const SOURCE: &str = "main.tex";
    pub const PDF: &str = "main.pdf";
    pub const IMAGE: &str = "main.png";
}

/// Isolated directory owned by a single worker.
///
/// The backing temp directory is removed when the workspace is dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    source_path: PathBuf,
    pdf_path: PathBuf,
    output_image_path: PathBuf,
}

impl Workspace {
    /// Create a fresh workspace under `root` (system temp dir if None).
    pub fn create(root: Option<&Path>, label: &str) -> Result<Self, WorkspaceError> {
        let prefix = format!("texbot-{label}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        let base = dir.path().to_path_buf();
        Ok(Self {
            source_path: base.join(paths::SOURCE),
            pdf_path: base.join(paths::PDF),
            output_image_path: base.join(paths::IMAGE),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn pdf_path(&self) -> &Path {
        &self.pdf_path
    }

    pub fn output_image_path(&self) -> &Path {
        &self.output_image_path
    }

    /// Overwrite the source document.
    pub async fn write_source(&self, content: &str) -> Result<(), WorkspaceError> {
        fs::write(&self.source_path, content).await?;
        Ok(())
    }

    /// Remove artifacts left by the previous job so a failed run can never
    /// deliver someone else's image.
    pub async fn clear_outputs(&self) -> Result<(), WorkspaceError> {
        for path in [&self.pdf_path, &self.output_image_path] {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
