//! Document assembly: preamble template + caller body + closing marker.

use std::sync::Arc;

use crate::error::WorkspaceError;
use crate::workspace::Workspace;

/// Appended after the body of every document.
pub const CLOSING_MARKER: &str = "\n\\end{document}";

/// Builds complete LaTeX sources from job bodies.
///
/// Bodies are inserted verbatim. Malformed markup fails in the compiler,
/// it is never escaped here.
#[derive(Debug, Clone)]
pub struct DocumentAssembler {
    template: Arc<str>,
}

impl DocumentAssembler {
    pub fn new(template: impl Into<Arc<str>>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Full document text for `body`.
    pub fn assemble(&self, body: &str) -> String {
        let mut doc = String::with_capacity(self.template.len() + body.len() + CLOSING_MARKER.len());
        doc.push_str(&self.template);
        doc.push_str(body);
        doc.push_str(CLOSING_MARKER);
        doc
    }

    /// Write the document for `body` to the workspace source path,
    /// replacing whatever was there.
    pub async fn write_source(&self, workspace: &Workspace, body: &str) -> Result<(), WorkspaceError> {
        workspace.write_source(&self.assemble(body)).await
    }
}
