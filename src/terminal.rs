use std::io::{BufRead, BufReader, Write};

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use triage_agent::{ConversationEntry, SessionIo};
use triage_core::error::{Result, TriageError};

/// Line-oriented terminal session: one stdin line per turn, one stdout line
/// per agent entry.
///
/// Lines are read on a detached thread and forwarded over a channel, so an
/// abandoned read never holds up runtime shutdown.
pub struct TerminalIo {
    lines: mpsc::Receiver<std::io::Result<String>>,
}

impl TerminalIo {
    pub fn new() -> Self {
        Self::from_reader(BufReader::new(std::io::stdin()))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        let (tx, rx) = mpsc::channel(1);
        std::thread::spawn(move || {
            for line in reader.lines() {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
        Self { lines: rx }
    }
}

impl SessionIo for TerminalIo {
    fn read_input(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            print!("> ");
            std::io::stdout().flush()?;

            match self.lines.recv().await {
                None => {
                    println!();
                    Ok(None)
                }
                Some(line) => match line?.trim() {
                    "/quit" | "/exit" | "/q" => Ok(None),
                    input => Ok(Some(input.to_string())),
                },
            }
        })
    }

    fn emit(&mut self, entry: &ConversationEntry) -> Result<()> {
        println!("{}: {}", entry.speaker(), entry.content);
        Ok(())
    }

    fn report_failure(&mut self, error: &TriageError) -> Result<()> {
        println!("[error] {}", error);
        Ok(())
    }
}
