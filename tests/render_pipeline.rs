//! End-to-end tests: interpreter → dispatcher → stub toolchain → transport.
//!
//! `pdflatex` and `convert` are replaced by `#!/bin/sh` stubs that append to
//! a shared event log, and the transport records calls into the same log so
//! the relative order of chat actions and process launches can be asserted.
#![cfg(unix)]

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::timeout;

use texbot::channels::{ChatAction, InboundMessage, Transport};
use texbot::config::{DispatchConfig, PipelineConfig};
use texbot::document::DocumentAssembler;
use texbot::error::ChannelError;
use texbot::interpreter::Interpreter;
use texbot::pipeline::PipelineRunner;
use texbot::worker::{Dispatcher, REPORT_FILE_NAME, WorkerDeps};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(30);

const HANDLE: &str = "RenderLaTeXBot";
const USER: i64 = 1001;
const TEMPLATE: &str = "\\documentclass{standalone}\n\\begin{document}\n";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Sent {
    Action(i64, ChatAction),
    Photo(i64, PathBuf, i64),
    Document(i64, String, Vec<u8>, i64),
    Text(i64, String, i64),
}

/// Transport that records every call, mirroring them into the event log.
struct RecordingTransport {
    events: PathBuf,
    sent: Mutex<Vec<Sent>>,
}

impl RecordingTransport {
    fn new(events: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            events,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, line: &str, sent: Sent) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events)
            .unwrap();
        writeln!(file, "{line}").unwrap();
        self.sent.lock().unwrap().push(sent);
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn photos(&self) -> Vec<(PathBuf, i64)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Photo(_, path, reply_to) => Some((path, reply_to)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    fn send_chat_action(&self, chat_id: i64, action: ChatAction) {
        self.record(
            &format!("action {}", action.as_str()),
            Sent::Action(chat_id, action),
        );
    }

    async fn send_photo(&self, chat_id: i64, image: &Path, reply_to: i64) -> Result<(), ChannelError> {
        self.record("photo", Sent::Photo(chat_id, image.to_path_buf(), reply_to));
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
        reply_to: i64,
    ) -> Result<(), ChannelError> {
        self.record(
            "document",
            Sent::Document(chat_id, file_name.to_string(), bytes, reply_to),
        );
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str, reply_to: i64) -> Result<(), ChannelError> {
        self.record("text", Sent::Text(chat_id, text.to_string(), reply_to));
        Ok(())
    }
}

/// Scratch area holding the stub binaries and the event log.
struct Harness {
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn events(&self) -> Vec<String> {
        std::fs::read_to_string(self.path("events"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    /// Write an executable stub; `{events}` in `body` expands to the log path.
    fn stub(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path(name);
        let body = body.replace("{events}", &self.path("events").display().to_string());
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn pipeline(&self, compiler_body: &str, compile_timeout: Duration) -> PipelineConfig {
        PipelineConfig {
            compiler: self.stub("pdflatex", compiler_body),
            converter: self.stub(
                "convert",
                "printf 'convert %s\\n' \"$*\" >> {events}\ntouch main.png",
            ),
            compile_timeout,
            convert_timeout: Duration::from_secs(10),
            strict_convert: false,
        }
    }

    fn start(
        &self,
        workers: usize,
        pipeline: PipelineConfig,
    ) -> (Dispatcher, Arc<RecordingTransport>) {
        let transport = RecordingTransport::new(self.path("events"));
        let deps = WorkerDeps {
            transport: transport.clone(),
            assembler: DocumentAssembler::new(TEMPLATE),
            runner: PipelineRunner::new(pipeline),
            notify_failure: false,
        };
        let config = DispatchConfig {
            workers,
            queue_capacity: 64,
            workspace_root: Some(self.path("workspaces")),
            notify_failure: false,
        };
        (Dispatcher::start(&config, deps).unwrap(), transport)
    }
}

const COMPILE_OK: &str = "printf 'compile %s\\n' \"$*\" >> {events}\ntouch main.pdf";

fn interpreter() -> Interpreter {
    Interpreter::new(HANDLE, HashSet::from([USER]))
}

async fn drain(dispatcher: Dispatcher) {
    timeout(TEST_TIMEOUT, dispatcher.shutdown())
        .await
        .expect("dispatcher did not drain in time");
}

#[tokio::test]
async fn direct_message_renders_and_replies_with_photo() {
    let h = Harness::new();
    let (dispatcher, transport) = h.start(1, h.pipeline(COMPILE_OK, Duration::from_secs(20)));
    let workspace = dispatcher.workspace_dirs()[0].clone();

    let msg = InboundMessage::new(USER, USER, 77, "E=mc^2").direct();
    let job = interpreter().interpret(&msg).expect("direct message accepted");
    dispatcher.submit(job).unwrap();
    drain(dispatcher).await;

    assert_eq!(
        h.events(),
        vec![
            "action upload_photo",
            "compile -interaction=nonstopmode main.tex",
            "convert -density 300 main.pdf -quality 90 main.png",
            "photo",
        ]
    );
    assert_eq!(
        transport.sent(),
        vec![
            Sent::Action(USER, ChatAction::UploadPhoto),
            Sent::Photo(USER, workspace.join("main.png"), 77),
        ]
    );
}

#[tokio::test]
async fn group_heuristic_and_whitelist_gate_submission() {
    let h = Harness::new();
    let (dispatcher, transport) = h.start(2, h.pipeline(COMPILE_OK, Duration::from_secs(20)));
    let interp = interpreter();

    let inbound = [
        InboundMessage::new(USER, -1, 1, "\\alpha + \\beta"),
        InboundMessage::new(USER, -1, 2, "costs $3"),
        InboundMessage::new(USER, -1, 3, "just chatting"),
        InboundMessage::new(42, -1, 4, "\\alpha"),
        InboundMessage::new(42, 42, 5, "/tex x").direct(),
    ];
    for msg in &inbound {
        if let Some(job) = interp.interpret(msg) {
            dispatcher.submit(job).unwrap();
        }
    }
    drain(dispatcher).await;

    let replied: HashSet<i64> = transport.photos().into_iter().map(|(_, id)| id).collect();
    assert_eq!(replied, HashSet::from([1, 2]));
}

#[tokio::test]
async fn blank_command_reply_renders_parent_text() {
    let h = Harness::new();
    let seen = h.path("seen.tex");
    let compiler = format!("cat main.tex > {}\n{COMPILE_OK}", seen.display());
    let (dispatcher, transport) = h.start(1, h.pipeline(&compiler, Duration::from_secs(20)));
    let interp = interpreter();

    let lone = InboundMessage::new(USER, -1, 10, "/tex ");
    assert!(interp.interpret(&lone).is_none());

    let parent = InboundMessage::new(7, -1, 11, "x = 1");
    let msg = InboundMessage::new(USER, -1, 12, "/tex ").replying_to(parent);
    let job = interp.interpret(&msg).expect("reply resolved");
    assert_eq!(job.source_text, "x = 1");
    dispatcher.submit(job).unwrap();
    drain(dispatcher).await;

    assert_eq!(
        std::fs::read_to_string(seen).unwrap(),
        format!("{TEMPLATE}x = 1\n\\end{{document}}")
    );
    let photos = transport.photos();
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0].1, 12);
}

#[tokio::test]
async fn pool_of_two_never_shares_a_workspace() {
    let h = Harness::new();
    // mkdir is atomic: a second job in the same directory would fail it.
    let compiler = format!(
        "if ! mkdir busy.lock 2>/dev/null; then echo collision >> {collisions}; fi\n\
         before=$(cat main.tex)\n\
         pwd >> {runs}\n\
         sleep 0.3\n\
         after=$(cat main.tex)\n\
         [ \"$before\" = \"$after\" ] || echo clobbered >> {collisions}\n\
         rmdir busy.lock\n\
         touch main.pdf",
        collisions = h.path("collisions").display(),
        runs = h.path("runs").display(),
    );
    let (dispatcher, transport) = h.start(2, h.pipeline(&compiler, Duration::from_secs(20)));
    let workspaces: HashSet<PathBuf> = dispatcher
        .workspace_dirs()
        .iter()
        .map(|d| std::fs::canonicalize(d).unwrap())
        .collect();
    assert_eq!(workspaces.len(), 2);

    for i in 0..5 {
        let msg = InboundMessage::new(USER, USER, 100 + i, format!("job-{i}")).direct();
        dispatcher.submit(interpreter().interpret(&msg).unwrap()).unwrap();
    }
    drain(dispatcher).await;

    assert!(
        !h.path("collisions").exists(),
        "{}",
        std::fs::read_to_string(h.path("collisions")).unwrap_or_default()
    );

    // The child's `pwd` is the physical path, comparable to the canonical set.
    let runs = std::fs::read_to_string(h.path("runs")).unwrap();
    let used: Vec<PathBuf> = runs.lines().map(PathBuf::from).collect();
    assert_eq!(used.len(), 5);
    assert!(used.iter().all(|p| workspaces.contains(p)), "{used:?}");

    let photos = transport.photos();
    assert_eq!(photos.len(), 5);
    let replied: HashSet<i64> = photos.iter().map(|(_, id)| *id).collect();
    assert_eq!(replied, (100..105).collect());
}

#[tokio::test]
async fn slow_compile_times_out_and_worker_recovers() {
    let h = Harness::new();
    let compiler = format!("if grep -q SLOW main.tex; then exec sleep 60; fi\n{COMPILE_OK}");
    let (dispatcher, transport) = h.start(1, h.pipeline(&compiler, Duration::from_millis(500)));

    let slow = InboundMessage::new(USER, USER, 1, "SLOW").direct();
    let fast = InboundMessage::new(USER, USER, 2, "fast").direct();
    dispatcher.submit(interpreter().interpret(&slow).unwrap()).unwrap();
    dispatcher.submit(interpreter().interpret(&fast).unwrap()).unwrap();

    let start = Instant::now();
    drain(dispatcher).await;
    assert!(
        start.elapsed() < Duration::from_secs(10),
        "worker stayed blocked for {:?}",
        start.elapsed()
    );

    let sent = transport.sent();
    let actions = sent.iter().filter(|s| matches!(s, Sent::Action(..))).count();
    assert_eq!(actions, 2);
    assert_eq!(
        transport.photos().into_iter().map(|(_, id)| id).collect::<Vec<_>>(),
        vec![2]
    );
    // The slow job never reached the converter.
    let converts = h.events().iter().filter(|e| e.starts_with("convert")).count();
    assert_eq!(converts, 1);
}

#[tokio::test]
async fn report_delivers_compiler_log_even_on_failure() {
    let h = Harness::new();
    let compiler = "echo 'This is pdfTeX'\necho '! Undefined control sequence.'\nexit 1";
    let (dispatcher, transport) = h.start(1, h.pipeline(compiler, Duration::from_secs(20)));

    let msg = InboundMessage::new(USER, -1, 30, "/report \\nosuchmacro");
    let job = interpreter().interpret(&msg).unwrap();
    assert!(job.wants_report);
    dispatcher.submit(job).unwrap();
    drain(dispatcher).await;

    assert_eq!(h.events(), vec!["action upload_document", "document"]);
    match &transport.sent()[1] {
        Sent::Document(-1, name, bytes, 30) => {
            assert_eq!(name, REPORT_FILE_NAME);
            let log = String::from_utf8_lossy(bytes);
            assert!(log.contains("This is pdfTeX"));
            assert!(log.contains("Undefined control sequence"));
        }
        other => panic!("expected compiler log document, got {other:?}"),
    }
}

#[tokio::test]
async fn rerunning_same_job_writes_identical_source() {
    let h = Harness::new();
    let copies = h.path("copies");
    std::fs::create_dir(&copies).unwrap();
    let compiler = format!(
        "n=$(ls {copies} | wc -l)\ncp main.tex {copies}/$n.tex\n{COMPILE_OK}",
        copies = copies.display()
    );
    let (dispatcher, _transport) = h.start(1, h.pipeline(&compiler, Duration::from_secs(20)));

    let msg = InboundMessage::new(USER, USER, 5, "\\sum_{i=1}^n i").direct();
    for _ in 0..2 {
        dispatcher.submit(interpreter().interpret(&msg).unwrap()).unwrap();
    }
    drain(dispatcher).await;

    let mut files: Vec<_> = std::fs::read_dir(&copies)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    files.sort();
    assert_eq!(files.len(), 2);
    assert_eq!(
        std::fs::read(&files[0]).unwrap(),
        std::fs::read(&files[1]).unwrap()
    );
}
