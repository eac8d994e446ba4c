use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use deeprag::{
    ChatMode, ChatSession, ChatSettings, SendOptions, SendOutcome, SessionError, SettingsError,
    SettingsStore, TracingNotifier,
};
use deeprag_backend::{BackendConfig, BackendError, HttpBackend};
use deeprag_chat::{ConversationStore, MessageId, Role, StoreChange, ThreadId};
use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "deeprag", about = "Chat with a knowledge-base assistant or the research agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one message and stream the reply.
    Send(SendArgs),
    /// Show or change the saved chat settings.
    Settings {
        #[arg(long)]
        mode: Option<ChatMode>,
        #[arg(long)]
        assistant: Option<String>,
    },
}

#[derive(Debug, Args)]
struct SendArgs {
    /// Omit to continue the thread, e.g. after `--feedback`.
    text: Option<String>,
    /// `ask` for a single assistant, `agent` for deep research.
    #[arg(long)]
    mode: Option<ChatMode>,
    /// Assistant id used in ask mode.
    #[arg(long)]
    assistant: Option<String>,
    /// Answer to the previous interrupt.
    #[arg(long)]
    feedback: Option<String>,
    /// Continue an existing agent thread.
    #[arg(long)]
    thread: Option<String>,
}

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("invalid backend configuration"))]
    Backend { source: BackendError },
    #[snafu(display("chat failed"))]
    Session { source: SessionError },
    #[snafu(display("could not save settings"))]
    Settings { source: SettingsError },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let settings = Arc::new(SettingsStore::load());

    match cli.command {
        Command::Settings { mode, assistant } => update_settings(&settings, mode, assistant),
        Command::Send(args) => send(settings, args).await,
    }
}

fn update_settings(
    settings: &SettingsStore,
    mode: Option<ChatMode>,
    assistant: Option<String>,
) -> Result<(), CliError> {
    if let Some(next) = with_overrides(&settings.settings(), mode, assistant) {
        settings.update(next).context(SettingsSnafu)?;
    }

    let current = settings.settings();
    println!("settings file: {}", settings.config_path().display());
    println!("mode:          {}", current.mode);
    println!(
        "assistant:     {}",
        current.chatbot_id.as_deref().unwrap_or("(none)")
    );
    println!(
        "research:      plan iterations {}, steps {}, search results {}",
        current.research.max_plan_iterations,
        current.research.max_step_num,
        current.research.max_search_results
    );
    Ok(())
}

async fn send(settings: Arc<SettingsStore>, args: SendArgs) -> Result<(), CliError> {
    let SendArgs {
        text,
        mode,
        assistant,
        feedback,
        thread,
    } = args;

    let config = BackendConfig::load().context(BackendSnafu)?;
    let backend = Arc::new(HttpBackend::from_config(config));
    let mut session = ChatSession::new(backend, settings, Arc::new(TracingNotifier));

    if let Some(next) = with_overrides(&session.settings(), mode, assistant) {
        session.update_settings(next).context(SessionSnafu)?;
    }
    if let Some(thread) = thread {
        session.store_mut().start_thread(ThreadId::new(thread));
    }
    let thread_id = session.thread_id().clone();

    let printer = tokio::spawn(print_deltas(session.subscribe(), std::io::stdout()));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut options = SendOptions::default();
    if let Some(feedback) = feedback {
        options = options.with_interrupt_feedback(feedback);
    }
    let result = session.send_message(text, options, cancel).await;

    let summary = research_summary(session.store());
    drop(session);
    if let Err(error) = printer.await {
        tracing::warn!(%error, "output task failed");
    }
    println!();

    match result.context(SessionSnafu)? {
        SendOutcome::Completed => {}
        SendOutcome::Interrupted => {
            println!("[waiting for feedback, continue with --thread and --feedback]")
        }
        SendOutcome::Cancelled => println!("[cancelled]"),
    }
    if !summary.is_empty() {
        println!("{summary}");
    }
    println!("thread: {thread_id}");
    Ok(())
}

fn with_overrides(
    current: &ChatSettings,
    mode: Option<ChatMode>,
    assistant: Option<String>,
) -> Option<ChatSettings> {
    if mode.is_none() && assistant.is_none() {
        return None;
    }

    let mut next = current.clone();
    if let Some(mode) = mode {
        next.mode = mode;
    }
    if let Some(assistant) = assistant {
        next.chatbot_id = Some(assistant);
    }
    Some(next)
}

/// Prints text as it streams, with a header whenever the speaker changes.
///
/// Stops at the first failed write, e.g. a closed pipe.
async fn print_deltas<W: Write>(mut changes: mpsc::UnboundedReceiver<StoreChange>, mut out: W) {
    let mut printed: HashMap<MessageId, usize> = HashMap::new();
    let mut last_speaker: Option<MessageId> = None;

    while let Some(change) = changes.recv().await {
        let message = match change {
            StoreChange::MessageAppended(message) | StoreChange::MessageUpdated(message) => {
                message
            }
            _ => continue,
        };
        if message.role == Role::User {
            continue;
        }

        let offset = printed.get(&message.id).copied().unwrap_or(0);
        let Some(delta) = message.content.get(offset..).filter(|delta| !delta.is_empty()) else {
            continue;
        };

        let mut written = Ok(());
        if last_speaker.as_ref() != Some(&message.id) {
            let speaker = message.agent.map_or("assistant", |agent| agent.as_str());
            written = write!(out, "\n[{speaker}] ");
            last_speaker = Some(message.id.clone());
        }
        if let Err(error) = written
            .and_then(|()| write!(out, "{delta}"))
            .and_then(|()| out.flush())
        {
            tracing::warn!(%error, "stopped printing the reply");
            return;
        }
        printed.insert(message.id.clone(), message.content.len());
    }
}

fn research_summary(store: &ConversationStore) -> String {
    store
        .research_ids()
        .iter()
        .filter_map(|research_id| {
            let session = store.research(research_id)?;
            let title = store
                .research_title(research_id)
                .unwrap_or_else(|| "untitled research".to_string());
            Some(format!(
                "research '{title}': {} messages, report {}",
                session.activity_message_ids.len(),
                if session.report_message_id.is_some() {
                    "ready"
                } else {
                    "missing"
                }
            ))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use std::io;

    use deeprag_chat::Message;
    use futures::FutureExt;

    use super::*;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn reply(store: &ConversationStore, content: &str) -> Message {
        let mut message = Message::streaming(
            MessageId::new("reply"),
            store.thread_id().clone(),
            Role::Assistant,
            None,
        );
        message.content = content.to_string();
        message
    }

    #[tokio::test]
    async fn prints_only_new_text() {
        let mut store = ConversationStore::new(ThreadId::new("t1"));
        let changes = store.subscribe();
        store.append_message(reply(&store, "Hi")).unwrap();
        store.update_message(reply(&store, "Hi!")).unwrap();
        drop(store);

        let mut out = Vec::new();
        print_deltas(changes, &mut out).await;

        assert_eq!(String::from_utf8(out).unwrap(), "\n[assistant] Hi!");
    }

    #[tokio::test]
    async fn write_failure_stops_printing() {
        let mut store = ConversationStore::new(ThreadId::new("t1"));
        let changes = store.subscribe();
        store.append_message(reply(&store, "Hi")).unwrap();

        // The store is still alive, so only the failed write can end the loop.
        assert_eq!(print_deltas(changes, ClosedPipe).now_or_never(), Some(()));
    }
}
