//! Job dispatcher: fixed pool of workers fed by a bounded FIFO queue.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::worker::{RenderJob, RenderWorker, WorkerDeps};
use crate::workspace::Workspace;

/// Owns the worker pool and the queue feeding it.
///
/// Lifecycle: [`Dispatcher::start`] → [`Dispatcher::submit`] →
/// [`Dispatcher::shutdown`].
pub struct Dispatcher {
    tx: mpsc::Sender<RenderJob>,
    capacity: usize,
    workers: Vec<JoinHandle<()>>,
    workspace_dirs: Vec<PathBuf>,
}

impl Dispatcher {
    /// Create every workspace, then spawn one worker per workspace.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &DispatchConfig, deps: WorkerDeps) -> Result<Self, DispatchError> {
        let worker_count = config.workers.max(1);
        let capacity = config.queue_capacity.max(1);

        let workspaces = (0..worker_count)
            .map(|i| Workspace::create(config.workspace_root.as_deref(), &i.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        let workspace_dirs = workspaces.iter().map(|ws| ws.dir().to_path_buf()).collect();

        let (tx, rx) = mpsc::channel(capacity);
        let queue = Arc::new(Mutex::new(rx));
        let deps = Arc::new(deps);

        let workers = workspaces
            .into_iter()
            .enumerate()
            .map(|(index, workspace)| {
                let worker = RenderWorker::new(index, workspace, Arc::clone(&deps));
                tokio::spawn(worker.run(Arc::clone(&queue)))
            })
            .collect();

        tracing::info!(workers = worker_count, queue_capacity = capacity, "Dispatcher started");

        Ok(Self {
            tx,
            capacity,
            workers,
            workspace_dirs,
        })
    }

    /// Enqueue a job without waiting.
    pub fn submit(&self, job: RenderJob) -> Result<(), DispatchError> {
        let job_id = job.id;
        match self.tx.try_send(job) {
            Ok(()) => {
                tracing::debug!(job_id = %job_id, "Job queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(DispatchError::Busy {
                capacity: self.capacity,
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// One directory per worker, in worker order.
    pub fn workspace_dirs(&self) -> &[PathBuf] {
        &self.workspace_dirs
    }

    /// Stop accepting jobs, let workers finish what is queued, then wait for them.
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.workers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Worker task ended abnormally");
            }
        }
        tracing::info!("Dispatcher stopped");
    }
}
