//! Operator interaction: the confirmation prompt and the pre-send countdown.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::io::{BufRead, BufReader, Stdin, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Source of operator decisions and sink for the countdown display.
#[async_trait]
pub trait Operator: Send {
    /// Asks a question and returns the raw answer (empty at end of input).
    async fn ask(&mut self, prompt: &str) -> Result<String>;

    /// Called at each countdown tick with the seconds still to wait.
    fn show_remaining(&mut self, remaining_secs: u64);

    fn countdown_done(&mut self) {}
}

/// Only `yes` / `y` (any case) proceed.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "yes" | "y")
}

pub fn format_remaining(remaining_secs: u64) -> String {
    format!("{:02}:{:02}", remaining_secs / 60, remaining_secs % 60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownOutcome {
    Completed,
    Cancelled,
}

/// Waits `seconds`, one tick per second. Cancellation is checked before each
/// tick and while sleeping.
pub async fn countdown<O>(seconds: u64, cancel: &CancellationToken, operator: &mut O) -> CountdownOutcome
where
    O: Operator + ?Sized,
{
    for remaining in (1..=seconds).rev() {
        if cancel.is_cancelled() {
            return CountdownOutcome::Cancelled;
        }

        operator.show_remaining(remaining);

        tokio::select! {
            _ = cancel.cancelled() => return CountdownOutcome::Cancelled,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }

    operator.countdown_done();
    CountdownOutcome::Completed
}

/// Interactive operator on stdin/stdout.
///
/// Each answer is read on a detached thread, so an abandoned prompt never
/// keeps the runtime from shutting down.
pub struct ConsoleOperator<R = BufReader<Stdin>> {
    input: Arc<Mutex<R>>,
}

impl ConsoleOperator {
    pub fn new() -> Self {
        Self::with_input(BufReader::new(std::io::stdin()))
    }
}

impl Default for ConsoleOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: BufRead + Send + 'static> ConsoleOperator<R> {
    pub fn with_input(input: R) -> Self {
        ConsoleOperator {
            input: Arc::new(Mutex::new(input)),
        }
    }
}

fn read_answer<R: BufRead>(input: &Mutex<R>) -> Result<String> {
    let mut reader = input.lock().map_err(|_| anyhow!("Operator input lock poisoned"))?;
    let mut answer = String::new();
    reader
        .read_line(&mut answer)
        .context("Unable to read the operator answer")?;
    Ok(answer)
}

#[async_trait]
impl<R: BufRead + Send + 'static> Operator for ConsoleOperator<R> {
    async fn ask(&mut self, prompt: &str) -> Result<String> {
        print!("\n{} ", prompt);
        std::io::stdout().flush().context("Unable to flush stdout")?;

        let (tx, rx) = oneshot::channel();
        let input = Arc::clone(&self.input);
        std::thread::spawn(move || {
            let _ = tx.send(read_answer(&input));
        });

        rx.await.context("Operator input closed")?
    }

    fn show_remaining(&mut self, remaining_secs: u64) {
        print!("\rTime remaining: {}", format_remaining(remaining_secs));
        let _ = std::io::stdout().flush();
    }

    fn countdown_done(&mut self) {
        println!("\n");
    }
}
