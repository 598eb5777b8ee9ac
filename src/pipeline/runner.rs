//! Child-process execution for the compile and convert stages.
//!
//! Provides:
//! - Working directory pinned to the job's workspace
//! - Timeout enforcement with kill-and-reap on expiry
//! - Concurrent stdout/stderr capture (no pipe-buffer deadlock)

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::types::{PipelineOutcome, Stage};
use crate::workspace::{Workspace, paths};

/// Compiler argv after the program name.
pub const COMPILE_ARGS: [&str; 2] = ["-interaction=nonstopmode", paths::SOURCE];

/// Converter argv after the program name.
pub const CONVERT_ARGS: [&str; 6] = ["-density", "300", paths::PDF, "-quality", "90", paths::IMAGE];

/// Maximum output retained per stream while reading (1MB).
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// How long to wait for output readers after the process is gone.
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// What a single stage produced.
struct StageRun {
    /// Exit code if the process exited (None when killed by a signal).
    result: Result<Option<i32>, PipelineError>,
    output: Vec<u8>,
}

/// Runs the external toolchain against a workspace.
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    config: PipelineConfig,
}

impl PipelineRunner {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Compile `main.tex` and convert the PDF to `main.png`.
    ///
    /// The source must already be written. The compiler's exit status gates
    /// the convert stage; the converter's exit status only matters when
    /// `strict_convert` is set.
    pub async fn run(&self, workspace: &Workspace) -> PipelineOutcome {
        if let Err(e) = workspace.clear_outputs().await {
            return PipelineOutcome::failed(None, e.into(), Vec::new());
        }

        let compile = run_stage(
            Stage::Compile,
            &self.config.compiler,
            COMPILE_ARGS,
            workspace.dir(),
            self.config.compile_timeout,
        )
        .await;
        let compiler_log = compile.output;

        let exit_status = match compile.result {
            Ok(code) => code,
            Err(e) => return PipelineOutcome::failed(None, e, compiler_log),
        };
        if exit_status != Some(0) {
            return PipelineOutcome::failed(
                exit_status,
                PipelineError::ExitStatus {
                    stage: Stage::Compile,
                    code: exit_status,
                },
                compiler_log,
            );
        }

        let convert = run_stage(
            Stage::Convert,
            &self.config.converter,
            CONVERT_ARGS,
            workspace.dir(),
            self.config.convert_timeout,
        )
        .await;

        match convert.result {
            Err(e) => PipelineOutcome::failed(exit_status, e, compiler_log),
            Ok(Some(0)) => PipelineOutcome::success(
                exit_status,
                workspace.output_image_path().to_path_buf(),
                compiler_log,
            ),
            Ok(code) if self.config.strict_convert => PipelineOutcome::failed(
                exit_status,
                PipelineError::ExitStatus {
                    stage: Stage::Convert,
                    code,
                },
                compiler_log,
            ),
            Ok(code) => {
                tracing::warn!(
                    exit_status = ?code,
                    output = %truncate_for_log(&convert.output),
                    "Converter exited non-zero; delivering image anyway"
                );
                PipelineOutcome::success(
                    exit_status,
                    workspace.output_image_path().to_path_buf(),
                    compiler_log,
                )
            }
        }
    }
}

/// Spawn one stage and wait for it, killing it if it outlives `timeout`.
async fn run_stage<I, S>(
    stage: Stage,
    program: &Path,
    args: I,
    workdir: &Path,
    timeout: Duration,
) -> StageRun
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let start = Instant::now();

    let mut child = match Command::new(program)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(%stage, program = %program.display(), error = %e, "Failed to spawn");
            return StageRun {
                result: Err(PipelineError::Spawn {
                    stage,
                    reason: e.to_string(),
                }),
                output: Vec::new(),
            };
        }
    };

    let stdout = tokio::spawn(read_stream(child.stdout.take(), MAX_OUTPUT_SIZE));
    let stderr = tokio::spawn(read_stream(child.stderr.take(), MAX_OUTPUT_SIZE));

    let result = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Ok(status.code()),
        Ok(Err(e)) => {
            let _ = child.kill().await;
            Err(PipelineError::Wait {
                stage,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            // kill() also reaps the child.
            let _ = child.kill().await;
            Err(PipelineError::Timeout { stage, timeout })
        }
    };

    let stdout = collect(stdout).await;
    let stderr = collect(stderr).await;
    let output = combine_output(stdout, stderr);

    match &result {
        Ok(code) => tracing::info!(
            %stage,
            exit_status = ?code,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Stage finished"
        ),
        Err(e) => tracing::warn!(
            %stage,
            error = %e,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Stage failed"
        ),
    }

    StageRun { result, output }
}

/// Chunk size for draining a child's pipe.
const READ_CHUNK: usize = 8 * 1024;

/// Keeps only the last `cap` bytes pushed into it.
struct TailBuffer {
    cap: usize,
    buf: VecDeque<u8>,
}

impl TailBuffer {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            buf: VecDeque::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if chunk.len() >= self.cap {
            self.buf.clear();
            self.buf.extend(&chunk[chunk.len() - self.cap..]);
            return;
        }
        let overflow = (self.buf.len() + chunk.len()).saturating_sub(self.cap);
        self.buf.drain(..overflow);
        self.buf.extend(chunk);
    }

    fn into_vec(self) -> Vec<u8> {
        self.buf.into()
    }
}

/// Drain `stream` to EOF, retaining at most `cap` trailing bytes.
async fn read_stream<R>(stream: Option<R>, cap: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut tail = TailBuffer::new(cap);
    if let Some(mut stream) = stream {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            tail.push(&chunk[..n]);
        }
    }
    Ok(tail.into_vec())
}

/// Await a reader task, giving up if a surviving grandchild keeps the pipe open.
async fn collect(mut handle: JoinHandle<std::io::Result<Vec<u8>>>) -> Vec<u8> {
    match tokio::time::timeout(OUTPUT_GRACE, &mut handle).await {
        Ok(Ok(Ok(buf))) => buf,
        Ok(Ok(Err(e))) => {
            tracing::debug!(error = %e, "Output read failed");
            Vec::new()
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Output reader panicked");
            Vec::new()
        }
        Err(_) => {
            handle.abort();
            Vec::new()
        }
    }
}

/// Join stdout and stderr, keeping the tail of oversized output.
fn combine_output(stdout: Vec<u8>, stderr: Vec<u8>) -> Vec<u8> {
    let mut output = if stderr.is_empty() {
        stdout
    } else if stdout.is_empty() {
        stderr
    } else {
        let mut out = stdout;
        out.extend_from_slice(b"\n\n--- stderr ---\n");
        out.extend_from_slice(&stderr);
        out
    };

    if output.len() > MAX_OUTPUT_SIZE {
        // pdflatex puts the interesting errors near the end.
        output.drain(..output.len() - MAX_OUTPUT_SIZE);
    }
    output
}

/// Short lossy rendering of process output for log lines.
fn truncate_for_log(output: &[u8]) -> String {
    let text = String::from_utf8_lossy(output);
    let text = text.trim();
    if text.chars().count() <= 200 {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(200).collect::<String>())
    }
}
