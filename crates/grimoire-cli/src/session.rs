//! The interactive terminal loop around an [`Agent`].
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use console::style;
use grimoire::models::message::Message;
use grimoire::{Agent, MageError, Observer, UsageStats};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

const PROMPT: &str = "\x1b[1m\x1b[38;5;30m( O)> \x1b[0m";
const RESET_COMMAND: &str = "/reset";

/// Signals the end of a turn back to the input loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEnd {
    Completed,
    Failed,
}

/// Prints streamed text to stdout and reports turn ends over a channel
pub struct TerminalObserver {
    turns: UnboundedSender<TurnEnd>,
}

impl TerminalObserver {
    pub fn new() -> (Self, UnboundedReceiver<TurnEnd>) {
        let (turns, receiver) = mpsc::unbounded_channel();
        (Self { turns }, receiver)
    }
}

impl Observer for TerminalObserver {
    fn on_chunk(&self, chunk: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(chunk.as_bytes());
        let _ = stdout.flush();
    }

    fn on_error(&self, error: &str) {
        println!("\n{}", style(format!("Error: {}", error)).red());
        let _ = self.turns.send(TurnEnd::Failed);
    }

    fn on_complete(&self, message: &Message) {
        if message.text().map_or(true, str::is_empty) {
            println!("{}", style("[no text in reply]").yellow());
        } else {
            println!();
        }
    }

    fn on_usage(&self, usage: &UsageStats) {
        println!(
            "{}",
            style(format!(
                "usage: {} bytes sent | ~{} tokens | model: {}",
                usage.message_size_bytes, usage.tokens_used, usage.model
            ))
            .dim()
        );
        let _ = self.turns.send(TurnEnd::Completed);
    }
}

/// What the user typed at the prompt
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Message(String),
    Reset,
    Exit,
    Empty,
}

fn classify(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        Input::Empty
    } else if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        Input::Exit
    } else if line.eq_ignore_ascii_case(RESET_COMMAND) {
        Input::Reset
    } else {
        Input::Message(line.to_string())
    }
}

/// Runs the line editor on its own thread. It reads one line each time it is asked to.
struct LineReader {
    requests: std::sync::mpsc::Sender<()>,
    lines: mpsc::Receiver<rustyline::Result<String>>,
}

impl LineReader {
    fn spawn() -> Self {
        let (requests, wanted) = std::sync::mpsc::channel::<()>();
        let (sender, lines) = mpsc::channel(1);
        thread::spawn(move || {
            let mut editor = match DefaultEditor::new() {
                Ok(editor) => editor,
                Err(err) => {
                    let _ = sender.blocking_send(Err(err));
                    return;
                }
            };
            while wanted.recv().is_ok() {
                let line = editor.readline(PROMPT);
                if let Ok(text) = &line {
                    let _ = editor.add_history_entry(text.as_str());
                }
                if sender.blocking_send(line).is_err() {
                    break;
                }
            }
        });
        Self { requests, lines }
    }

    async fn next_line(&mut self) -> Option<rustyline::Result<String>> {
        self.requests.send(()).ok()?;
        self.lines.recv().await
    }
}

pub fn print_banner(model: &str, projects: &[String]) {
    println!("{}", style("grimoire").green().bold());
    println!("Model: {}", style(model).yellow());
    for project in projects {
        println!("Project: {}", style(project).yellow());
    }
    println!();
    println!(
        "{}",
        style(format!(
            "Type a message and press Enter. '{}' starts over, 'exit' leaves, Ctrl+C interrupts a reply.",
            RESET_COMMAND
        ))
        .dim()
    );
    println!();
}

/// Read lines until the user leaves, sending each one to the agent and waiting for its reply
pub async fn run(agent: &Agent, mut turns: UnboundedReceiver<TurnEnd>) -> Result<()> {
    let mut reader = LineReader::spawn();

    loop {
        let line = match reader.next_line().await {
            Some(Ok(line)) => line,
            Some(Err(ReadlineError::Interrupted | ReadlineError::Eof)) | None => break,
            Some(Err(err)) => return Err(err.into()),
        };

        match classify(&line) {
            Input::Empty => continue,
            Input::Exit => break,
            Input::Reset => {
                agent.reset_conversation().await;
                println!("{}", style("conversation reset").dim());
                continue;
            }
            Input::Message(text) => {
                // Stale signals from an earlier interrupted or doubly reported turn
                while turns.try_recv().is_ok() {}
                match agent.send_message(text) {
                    Ok(()) => wait_for_turn(agent, &mut turns).await?,
                    Err(MageError::Busy) => {
                        println!("{}", style("still working on the previous request").yellow())
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
    }

    println!("{}", style("Goodbye!").green());
    Ok(())
}

async fn wait_for_turn(agent: &Agent, turns: &mut UnboundedReceiver<TurnEnd>) -> Result<()> {
    tokio::select! {
        end = turns.recv() => {
            if end.is_none() {
                return Ok(());
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            agent.interrupt_current_request();
            println!("\n{}", style("request interrupted").yellow());
            return Ok(());
        }
    }

    // The observer hears about the turn slightly before the agent releases it
    while agent.is_busy() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("  "), Input::Empty);
        assert_eq!(classify("exit"), Input::Exit);
        assert_eq!(classify("QUIT "), Input::Exit);
        assert_eq!(classify("/reset"), Input::Reset);
        assert_eq!(
            classify("  list my files "),
            Input::Message("list my files".to_string())
        );
    }

    #[test]
    fn test_observer_reports_turn_ends() {
        let (observer, mut turns) = TerminalObserver::new();
        observer.on_error("boom");
        observer.on_complete(&Message::assistant("done"));
        observer.on_usage(&UsageStats {
            message_size_bytes: 12,
            model: "grok-4".to_string(),
            tokens_used: 3,
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        assert_eq!(turns.try_recv().unwrap(), TurnEnd::Failed);
        assert_eq!(turns.try_recv().unwrap(), TurnEnd::Completed);
        assert!(turns.try_recv().is_err());
    }
}
