//! Worker system: render jobs, pinned workspaces, and the dispatcher.
//!
//! Core components:
//! - `job`: `RenderJob`, the unit of work
//! - `worker`: `RenderWorker`: one workspace, jobs run strictly in sequence
//! - `dispatcher`: bounded queue + fixed worker pool with explicit lifecycle

pub mod dispatcher;
pub mod job;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use job::RenderJob;
pub use worker::{REPORT_FILE_NAME, RenderWorker, WorkerDeps};
