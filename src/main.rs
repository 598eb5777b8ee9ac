use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;

use texbot::channels::{TelegramChannel, Transport};
use texbot::config::BotConfig;
use texbot::document::DocumentAssembler;
use texbot::error::DispatchError;
use texbot::interpreter::Interpreter;
use texbot::pipeline::PipelineRunner;
use texbot::worker::{Dispatcher, WorkerDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BotConfig::from_env().context("Failed to load configuration")?;

    // Initialize tracing; the guard flushes the file writer on exit.
    let _log_guard = init_tracing(&config);

    eprintln!("🧮 texbot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Handle: @{}", config.bot_username);
    eprintln!("   Whitelist: {} user(s)", config.whitelist.len());
    eprintln!(
        "   Workers: {} (queue {})",
        config.dispatch.workers, config.dispatch.queue_capacity
    );
    eprintln!(
        "   Compiler: {} ({}s), converter: {} ({}s{})",
        config.pipeline.compiler.display(),
        config.pipeline.compile_timeout.as_secs(),
        config.pipeline.converter.display(),
        config.pipeline.convert_timeout.as_secs(),
        if config.pipeline.strict_convert { ", strict" } else { "" }
    );

    // ── Transport ───────────────────────────────────────────────────────
    let telegram = Arc::new(TelegramChannel::new(config.bot_token));
    match telegram.get_me().await {
        Ok(Some(username)) if username != config.bot_username => tracing::warn!(
            configured = %config.bot_username,
            actual = %username,
            "BOT_USERNAME does not match the token's bot; mentions will not match"
        ),
        Ok(_) => tracing::info!("Telegram token verified"),
        Err(e) => tracing::warn!("Telegram health check failed: {e}"),
    }

    // ── Workers ─────────────────────────────────────────────────────────
    let transport: Arc<dyn Transport> = telegram.clone();
    let deps = WorkerDeps {
        transport,
        assembler: DocumentAssembler::new(config.template.as_str()),
        runner: PipelineRunner::new(config.pipeline.clone()),
        notify_failure: config.dispatch.notify_failure,
    };
    let dispatcher =
        Dispatcher::start(&config.dispatch, deps).context("Failed to start render workers")?;

    let interpreter = Interpreter::new(&config.bot_username, config.whitelist.clone());

    // ── Main loop ───────────────────────────────────────────────────────
    let mut messages = telegram.start();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            msg = messages.next() => {
                let Some(msg) = msg else {
                    tracing::warn!("Telegram message stream ended");
                    break;
                };
                let Some(job) = interpreter.interpret(&msg) else {
                    continue;
                };
                let job_id = job.id;
                match dispatcher.submit(job) {
                    Ok(()) => tracing::info!(job_id = %job_id, chat_id = msg.chat_id, "Render job submitted"),
                    Err(e @ DispatchError::Busy { .. }) => tracing::warn!(chat_id = msg.chat_id, "{e}"),
                    Err(e) => {
                        tracing::error!("{e}");
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    dispatcher.shutdown().await;
    Ok(())
}

fn init_tracing(config: &BotConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "texbot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}
