//! `handoff widget`: terminal chat against a running gateway.
//!
//! Lines typed at the prompt go to the assistant, or to the human agent
//! after `/human`.  Agent replies arrive through the relay poll loop and
//! are printed as they come in.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hd_domain::chat::{Message, Sender};

use crate::runtime::Reply;
use crate::widget::{run_poll_loop, GatewayClient, Phase, Widget};

/// Handle on a running poll loop and its printer.
struct Poller {
    cancel: CancellationToken,
    tasks: [JoinHandle<()>; 2],
}

impl Poller {
    fn start(client: &GatewayClient, widget: &Arc<Mutex<Widget>>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let poll = tokio::spawn(run_poll_loop(
            client.clone(),
            widget.clone(),
            interval,
            cancel.clone(),
            tx,
        ));
        let print = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                print_message(&message);
            }
        });
        Self {
            cancel,
            tasks: [poll, print],
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            task.await.ok();
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run the widget REPL until `/exit`, Ctrl+D or the session ends.
pub async fn run(url: String, session: Option<String>, poll_interval: Duration) -> anyhow::Result<()> {
    let client = GatewayClient::new(&url, Duration::from_secs(30))?;
    let widget = Arc::new(Mutex::new(Widget::new()));

    let (opened, is_new) = client.create_session(session.as_deref()).await?;
    let backlog = widget.lock().opened(&opened);
    for message in &backlog {
        print_message(message);
    }

    eprintln!(
        "Session {} ({})  |  /human for a person, /help for commands, Ctrl+D to exit",
        opened.session_id,
        if is_new { "new" } else { "resumed" },
    );
    eprintln!();

    let mut poller = None;
    if widget.lock().phase() == Phase::Agent {
        poller = Some(Poller::start(&client, &widget, poll_interval));
    }

    let mut rl = rustyline::DefaultEditor::new()?;

    loop {
        let readline = rl.readline("you> ");

        match readline {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();

                // ── Slash commands ────────────────────────────────
                if let Some(cmd) = trimmed.strip_prefix('/') {
                    match cmd {
                        "exit" | "quit" => break,
                        "help" => print_help(),
                        "session" => print_session(&widget),
                        "human" => {
                            if handoff(&client, &widget).await {
                                if let Some(p) = poller.take() {
                                    p.stop().await;
                                }
                                poller = Some(Poller::start(&client, &widget, poll_interval));
                            }
                        }
                        "end" => {
                            end(&client, &widget).await;
                            break;
                        }
                        other => eprintln!("Unknown command: /{other}  (type /help for a list)"),
                    }
                    continue;
                }

                // ── Customer message ──────────────────────────────
                if let Err(e) = send(&client, &widget, trimmed).await {
                    eprintln!("\x1B[31merror: {e}\x1B[0m");
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or /exit to quit)");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    if let Some(p) = poller {
        p.stop().await;
    }
    widget.lock().closed();
    eprintln!("Goodbye!");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn send(client: &GatewayClient, widget: &Arc<Mutex<Widget>>, text: &str) -> anyhow::Result<()> {
    let session_id = {
        let w = widget.lock();
        if !w.can_send() {
            anyhow::bail!("cannot send while {}", phase_label(w.phase()));
        }
        w.session_id().map(str::to_owned)
    };
    let Some(session_id) = session_id else {
        anyhow::bail!("no session open");
    };

    let sent = client.send_message(&session_id, text).await?;
    widget.lock().render(&sent.message);

    match sent.reply {
        Reply::Ai { message } => {
            if widget.lock().render(&message) {
                print_message(&message);
            }
        }
        Reply::Forwarded { .. } => eprintln!("\x1B[2m(sent to agent)\x1B[0m"),
        Reply::Degraded { notice } => eprintln!("\x1B[33m{notice}\x1B[0m"),
    }
    Ok(())
}

/// Request a hand-off.  Returns `true` when an agent thread was opened.
async fn handoff(client: &GatewayClient, widget: &Arc<Mutex<Widget>>) -> bool {
    let session_id = {
        let mut w = widget.lock();
        if let Err(reason) = w.begin_handoff() {
            eprintln!("{reason}");
            return false;
        }
        w.session_id().map(str::to_owned)
    };
    let Some(session_id) = session_id else {
        return false;
    };

    eprintln!("\x1B[2mConnecting you to a human agent...\x1B[0m");
    match client.request_handoff(&session_id).await {
        Ok(thread_id) => {
            widget.lock().handoff_succeeded(thread_id);
            eprintln!("\x1B[2mAn agent has been notified and will reply here.\x1B[0m");
            true
        }
        Err(e) => {
            widget.lock().handoff_failed();
            eprintln!("\x1B[31m{e}\x1B[0m");
            false
        }
    }
}

async fn end(client: &GatewayClient, widget: &Arc<Mutex<Widget>>) {
    let session_id = widget.lock().session_id().map(str::to_owned);
    if let Some(id) = session_id {
        match client.end_session(&id).await {
            Ok(()) => eprintln!("Session ended."),
            Err(e) => eprintln!("\x1B[31mcould not end session: {e}\x1B[0m"),
        }
    }
    widget.lock().ended();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn print_message(message: &Message) {
    match message.sender {
        Sender::Customer => println!("you: {}", message.content),
        Sender::Ai => println!("\x1B[36massistant:\x1B[0m {}", message.content),
        Sender::Agent => println!("\x1B[32magent:\x1B[0m {}", message.content),
    }
}

fn print_session(widget: &Arc<Mutex<Widget>>) {
    let w = widget.lock();
    eprintln!("Session: {}", w.session_id().unwrap_or("(none)"));
    eprintln!("State:   {}", phase_label(w.phase()));
    if let Some(thread) = w.thread_id() {
        eprintln!("Thread:  {thread}");
    }
    eprintln!("Messages shown: {}", w.messages().len());
}

fn print_help() {
    eprintln!("Commands:");
    eprintln!("  /human           Ask for a human agent");
    eprintln!("  /end             End the session and exit");
    eprintln!("  /session         Show session details");
    eprintln!("  /exit, /quit     Exit without ending the session");
    eprintln!("  /help            Show this help");
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Closed => "closed",
        Phase::Assistant => "chatting with the assistant",
        Phase::HandingOff => "waiting for an agent",
        Phase::Agent => "chatting with an agent",
        Phase::Ended => "ended",
    }
}
