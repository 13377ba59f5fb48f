//! Typed input from the terminal
//!
//! Stdin is read on a dedicated thread so a pending read never holds up
//! runtime shutdown; lines are forwarded to the async side over a channel.

use std::io::BufRead;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::orchestrator::OrchestratorHandle;
use crate::utterance::{Origin, Utterance};

const HELP: &str = "\
Available commands:
- General questions: 'how are you', 'what is AI'
- Real-time: 'what's the weather', 'latest news'
- Automation: 'open chrome', 'play music', 'take screenshot'
- Search: 'google search python', 'youtube search cats'
- Exit: 'exit', 'quit', 'bye'";

/// What a typed line asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Exit,
    Submit(String),
    Empty,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line.to_lowercase().as_str() {
            "" => ConsoleCommand::Empty,
            "help" => ConsoleCommand::Help,
            "exit" | "quit" | "bye" => ConsoleCommand::Exit,
            _ => ConsoleCommand::Submit(line.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("failed to spawn console thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Start the stdin reader thread. The receiver closes at end of input.
pub fn spawn_reader() -> Result<mpsc::Receiver<String>, ConsoleError> {
    let (line_tx, line_rx) = mpsc::channel(8);

    thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if line_tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to read console input");
                        break;
                    }
                }
            }
            debug!("console input closed");
        })?;

    Ok(line_rx)
}

/// Forward typed lines to the orchestrator until input ends or an exit is
/// submitted
pub async fn run(handle: OrchestratorHandle, mut lines: mpsc::Receiver<String>) {
    info!("console input ready, type 'help' for commands");

    while let Some(line) = lines.recv().await {
        let text = match ConsoleCommand::parse(&line) {
            ConsoleCommand::Empty => continue,
            ConsoleCommand::Help => {
                println!("\n{HELP}");
                continue;
            }
            ConsoleCommand::Exit => "exit".to_string(),
            ConsoleCommand::Submit(text) => text,
        };

        let exiting = text == "exit";
        if let Some(utterance) = Utterance::new(&text, Origin::Manual) {
            if let Err(e) = handle.submit(utterance) {
                println!("[{e}]");
                continue;
            }
        }

        if exiting {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(ConsoleCommand::parse("  HELP "), ConsoleCommand::Help);
        assert_eq!(ConsoleCommand::parse("Bye"), ConsoleCommand::Exit);
        assert_eq!(ConsoleCommand::parse("quit"), ConsoleCommand::Exit);
        assert_eq!(ConsoleCommand::parse("   "), ConsoleCommand::Empty);
        assert_eq!(
            ConsoleCommand::parse(" open chrome "),
            ConsoleCommand::Submit("open chrome".to_string())
        );
    }

    #[tokio::test]
    async fn test_lines_are_submitted() {
        let (handle, mut worker) = OrchestratorHandle::detached();
        let (tx, rx) = mpsc::channel(8);

        tx.send("help".to_string()).await.unwrap();
        tx.send("open chrome".to_string()).await.unwrap();
        drop(tx);
        run(handle, rx).await;

        let queued = worker.complete().unwrap();
        assert_eq!(queued.text(), "open chrome");
        assert_eq!(queued.origin(), Origin::Manual);
    }

    #[tokio::test]
    async fn test_exit_alias_submits_exit_and_stops() {
        let (handle, mut worker) = OrchestratorHandle::detached();
        let (tx, rx) = mpsc::channel(8);

        tx.send("quit".to_string()).await.unwrap();
        tx.send("open chrome".to_string()).await.unwrap();
        run(handle, rx).await;

        assert_eq!(worker.complete().unwrap().text(), "exit");
        assert!(worker.complete().is_none());
    }
}
