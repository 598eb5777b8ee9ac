//! Render worker: owns one workspace and runs jobs on it one at a time.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};

use crate::channels::{ChatAction, Transport};
use crate::document::DocumentAssembler;
use crate::pipeline::{PipelineOutcome, PipelineRunner};
use crate::worker::RenderJob;
use crate::workspace::Workspace;

/// File name used when delivering the compiler log.
pub const REPORT_FILE_NAME: &str = "main.log";

/// Shared dependencies for every worker in a pool.
pub struct WorkerDeps {
    pub transport: Arc<dyn Transport>,
    pub assembler: DocumentAssembler,
    pub runner: PipelineRunner,
    /// Reply with a short notice when a render fails.
    pub notify_failure: bool,
}

/// Worker bound to a single workspace for its whole lifetime.
pub struct RenderWorker {
    index: usize,
    workspace: Workspace,
    deps: Arc<WorkerDeps>,
}

impl RenderWorker {
    pub fn new(index: usize, workspace: Workspace, deps: Arc<WorkerDeps>) -> Self {
        Self {
            index,
            workspace,
            deps,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Pull jobs from the shared queue until it closes.
    pub async fn run(self, queue: Arc<Mutex<mpsc::Receiver<RenderJob>>>) {
        tracing::info!(
            worker = self.index,
            workspace = %self.workspace.dir().display(),
            transport = self.deps.transport.name(),
            "Worker started"
        );

        loop {
            // Only idle workers contend for the lock.
            let job = queue.lock().await.recv().await;
            let Some(job) = job else {
                break;
            };
            self.process(job).await;
        }

        tracing::info!(worker = self.index, "Worker stopped");
    }

    /// Run one job end to end: indicator, render, delivery.
    pub async fn process(&self, job: RenderJob) -> PipelineOutcome {
        let action = if job.wants_report {
            ChatAction::UploadDocument
        } else {
            ChatAction::UploadPhoto
        };
        // First observable effect of a job; never awaited.
        self.deps.transport.send_chat_action(job.chat_id, action);

        tracing::info!(
            job_id = %job.id,
            chat_id = job.chat_id,
            worker = self.index,
            queued_ms = job.queued_ms(Utc::now()),
            "Render started"
        );

        let outcome = self.render(&job).await;

        tracing::info!(
            job_id = %job.id,
            succeeded = outcome.succeeded(),
            exit_status = ?outcome.exit_status,
            "Render finished"
        );

        self.deliver(&job, &outcome).await;
        outcome
    }

    async fn render(&self, job: &RenderJob) -> PipelineOutcome {
        if let Err(e) = self
            .deps
            .assembler
            .write_source(&self.workspace, &job.source_text)
            .await
        {
            return PipelineOutcome::failed(None, e.into(), Vec::new());
        }
        self.deps.runner.run(&self.workspace).await
    }

    /// Send the image (or optional failure notice) and, if requested, the log.
    async fn deliver(&self, job: &RenderJob, outcome: &PipelineOutcome) {
        let transport = &self.deps.transport;

        match (&outcome.output_image, &outcome.failure) {
            (Some(image), _) => {
                if let Err(e) = transport
                    .send_photo(job.chat_id, image, job.reply_to_message_id)
                    .await
                {
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to deliver image");
                }
            }
            (None, failure) => {
                if let Some(failure) = failure {
                    tracing::info!(job_id = %job.id, reason = %failure, "Render failed");
                }
                if self.deps.notify_failure {
                    let notice = failure_notice(job, outcome);
                    if let Err(e) = transport
                        .send_text(job.chat_id, &notice, job.reply_to_message_id)
                        .await
                    {
                        tracing::warn!(job_id = %job.id, error = %e, "Failed to send failure notice");
                    }
                }
            }
        }

        if job.wants_report {
            if let Err(e) = transport
                .send_document(
                    job.chat_id,
                    REPORT_FILE_NAME,
                    outcome.compiler_log.clone(),
                    job.reply_to_message_id,
                )
                .await
            {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to deliver compiler log");
            }
        }
    }
}

fn failure_notice(job: &RenderJob, outcome: &PipelineOutcome) -> String {
    let reason = outcome
        .failure
        .as_ref()
        .map(|f| f.to_string())
        .unwrap_or_else(|| "unknown error".to_string());
    if job.wants_report {
        format!("Rendering failed: {reason}.")
    } else {
        format!("Rendering failed: {reason}. Use /report to get the compiler log.")
    }
}
