use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use csv::{ReaderBuilder, Trim};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_MAX_EMAILS_PER_BATCH;
use crate::email::common::columns;
use crate::email::{CsvRow, DispatchSummary, EmailKind, MessageComposer, RecipientRecord, SendOutcome};
use crate::operator::{countdown, is_affirmative, CountdownOutcome, Operator};
use crate::sender::RetryingSender;

pub const DEFAULT_EMAIL_DELAY_SECS: u64 = 3;
pub const DEFAULT_PRE_SEND_DELAY_SECS: u64 = 30;

/// Recipients of one batch invocation, in CSV order.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub kind: EmailKind,
    pub rows: Vec<CsvRow>,
    /// Job-level values for kind-specific columns, used when a row leaves them empty.
    pub defaults: HashMap<String, String>,
}

impl BatchJob {
    pub fn from_csv(
        path: impl AsRef<Path>,
        kind: EmailKind,
        defaults: HashMap<String, String>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("CSV file not found at {}", path.display()))?;

        let job = Self::from_reader(file, kind, defaults)
            .with_context(|| format!("Unable to read CSV file {}", path.display()))?;
        info!("📋 Loaded {} recipient row(s) from {}", job.len(), path.display());
        Ok(job)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        kind: EmailKind,
        defaults: HashMap<String, String>,
    ) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let headers = rdr.headers().context("Unable to read CSV headers")?.clone();
        debug!("Found CSV headers: {:?}", headers);

        let missing_columns: Vec<&str> = [columns::EMAIL, columns::NAME, columns::STUDENT_ID]
            .iter()
            .chain(kind.extra_fields().iter())
            .copied()
            .filter(|column| !headers.iter().any(|h| h == *column) && !defaults.contains_key(*column))
            .collect();
        if !missing_columns.is_empty() {
            warn!(
                "⚠️  CSV has no column(s) {}: affected rows will fail",
                missing_columns.join(", ")
            );
        }

        let mut rows = Vec::new();
        for (index, result) in rdr.records().enumerate() {
            let fallback_line = index as u64 + 2;
            let row = match result {
                Ok(record) => CsvRow {
                    line: record.position().map(|p| p.line()).unwrap_or(fallback_line),
                    values: Ok(headers
                        .iter()
                        .zip(record.iter())
                        .map(|(h, v)| (h.to_string(), v.to_string()))
                        .collect()),
                },
                Err(e) => {
                    warn!("CSV line {} unreadable: {}", fallback_line, e);
                    CsvRow {
                        line: fallback_line,
                        values: Err(e.to_string()),
                    }
                }
            };
            rows.push(row);
        }

        Ok(BatchJob { kind, rows, defaults })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    /// Pause between two consecutive sends.
    pub email_delay: Duration,
    /// Countdown before the first send, in seconds. Zero skips it.
    pub pre_send_delay_secs: u64,
    /// Soft limit above which the preview recommends smaller batches.
    pub max_emails_per_batch: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        DispatchOptions {
            email_delay: Duration::from_secs(DEFAULT_EMAIL_DELAY_SECS),
            pre_send_delay_secs: DEFAULT_PRE_SEND_DELAY_SECS,
            max_emails_per_batch: DEFAULT_MAX_EMAILS_PER_BATCH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every row was visited.
    Completed,
    /// The operator did not answer yes.
    Declined,
    /// Interrupted while waiting for the answer or during the countdown.
    CancelledBeforeSend,
    /// Interrupted between two rows.
    CancelledDuringDispatch,
    /// The server refused the credentials; remaining rows were not attempted.
    AbortedOnAuthFailure,
}

impl RunStatus {
    pub fn is_aborted(&self) -> bool {
        !matches!(self, RunStatus::Completed)
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub summary: DispatchSummary,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl RunReport {
    fn not_started(status: RunStatus, total: usize, started_at: DateTime<Local>) -> Self {
        RunReport {
            status,
            summary: DispatchSummary {
                skipped: total,
                ..DispatchSummary::default()
            },
            started_at,
            finished_at: Local::now(),
        }
    }

    pub fn render_summary(&self) -> String {
        let status = match self.status {
            RunStatus::Completed => "completed",
            RunStatus::Declined => "declined by operator",
            RunStatus::CancelledBeforeSend => "cancelled before sending",
            RunStatus::CancelledDuringDispatch => "cancelled during dispatch",
            RunStatus::AbortedOnAuthFailure => "aborted on authentication failure",
        };

        let mut out = String::new();
        out.push_str("\n--- Processing Complete ---\n");
        out.push_str(&format!("Status: {}\n", status));
        out.push_str(&format!("✅ Successfully sent: {}\n", self.summary.sent));
        out.push_str(&format!("❌ Failed: {}\n", self.summary.failed));
        if self.summary.skipped > 0 {
            out.push_str(&format!("⏭️  Not attempted: {}\n", self.summary.skipped));
        }
        out.push_str(&format!(
            "🕐 {} → {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.finished_at.format("%H:%M:%S")
        ));
        out
    }
}

/// Human-readable listing shown before the batch confirmation.
pub fn render_batch_preview(job: &BatchJob, options: &DispatchOptions) -> String {
    let total = job.len();
    let mut out = String::new();

    out.push_str("\nBatch Email Preview:\n");
    out.push_str(&format!("Type: {}\n", job.kind.name().to_uppercase()));
    out.push_str(&format!("Total recipients: {}\n", total));
    out.push_str(&format!("Delay between emails: {} seconds\n", options.email_delay.as_secs()));

    if total > options.max_emails_per_batch {
        out.push_str(&format!("\n⚠️  WARNING: You are sending to {} recipients.\n", total));
        out.push_str(&format!(
            "Recommended batch size is {} emails to avoid spam filters.\n",
            options.max_emails_per_batch
        ));
        out.push_str("Consider splitting your CSV into smaller batches.\n");
    }

    out.push('\n');
    for (index, row) in job.rows.iter().enumerate() {
        out.push_str(&format!(
            "  {}. {} ({}) - {}\n",
            index + 1,
            row.get(columns::NAME).unwrap_or("<no name>"),
            row.get(columns::STUDENT_ID).unwrap_or("<no id>"),
            row.get(columns::EMAIL).unwrap_or("<no email>"),
        ));
    }

    out
}

pub fn render_single_preview(record: &RecipientRecord, kind: EmailKind) -> String {
    let mut out = String::new();
    out.push_str("\nEmail Preview:\n");
    out.push_str(&format!("Type: {}\n", kind.name().to_uppercase()));
    out.push_str(&format!("To: {}\n", record.email));
    out.push_str(&format!("Name: {}\n", record.name));
    out.push_str(&format!("Student ID: {}\n", record.student_id));
    for (column, value) in record.extras() {
        out.push_str(&format!("{}: {}\n", column, value));
    }
    out
}

/// Drives preview, confirmation, countdown and dispatch for one invocation.
pub struct BatchRunner<O: Operator> {
    sender: RetryingSender,
    composer: MessageComposer,
    operator: O,
    cancel: CancellationToken,
    options: DispatchOptions,
}

impl<O: Operator> BatchRunner<O> {
    pub fn new(
        sender: RetryingSender,
        composer: MessageComposer,
        operator: O,
        cancel: CancellationToken,
        options: DispatchOptions,
    ) -> Self {
        BatchRunner {
            sender,
            composer,
            operator,
            cancel,
            options,
        }
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    pub async fn run_batch(&mut self, job: &BatchJob) -> Result<RunReport> {
        let started_at = Local::now();

        // The composer only renders one kind
        if job.kind != self.composer.kind() {
            anyhow::bail!(
                "Batch job is for {} emails but the composer renders {}",
                job.kind,
                self.composer.kind()
            );
        }

        // 1. Preview every row before asking
        println!("{}", render_batch_preview(job, &self.options));
        if job.len() > self.options.max_emails_per_batch {
            warn!(
                "Batch of {} exceeds the recommended {} recipients",
                job.len(),
                self.options.max_emails_per_batch
            );
        }

        if job.is_empty() {
            info!("No recipients in the CSV file, nothing to send");
            return Ok(RunReport::not_started(RunStatus::Completed, 0, started_at));
        }

        // 2. Confirmation and countdown
        let prompt = format!("Do you want to proceed with sending {} emails? (yes/no):", job.len());
        if let Some(status) = self.confirm_and_wait(&prompt).await? {
            println!("❌ Batch send cancelled.");
            return Ok(RunReport::not_started(status, job.len(), started_at));
        }

        // 3. Send in file order
        let (status, summary) = self.dispatch(job).await;

        Ok(RunReport {
            status,
            summary,
            started_at,
            finished_at: Local::now(),
        })
    }

    pub async fn run_single(&mut self, record: &RecipientRecord) -> Result<RunReport> {
        let started_at = Local::now();

        println!("{}", render_single_preview(record, self.composer.kind()));

        let mut summary = DispatchSummary::new();
        let mut status = RunStatus::Completed;

        // Render before asking so a bad record never waits through the countdown
        let email = match self.composer.compose(record) {
            Ok(email) => email,
            Err(e) => {
                error!("❌ Error: {}", e);
                summary.failure();
                return Ok(RunReport {
                    status,
                    summary,
                    started_at,
                    finished_at: Local::now(),
                });
            }
        };

        if let Some(status) = self.confirm_and_wait("Proceed with sending this email? (yes/no):").await? {
            println!("❌ Send cancelled.");
            return Ok(RunReport::not_started(status, 1, started_at));
        }

        let outcome = self.sender.send(&email).await;
        if outcome.is_permanent_failure() {
            status = RunStatus::AbortedOnAuthFailure;
        }
        tally(&mut summary, &outcome);

        Ok(RunReport {
            status,
            summary,
            started_at,
            finished_at: Local::now(),
        })
    }

    /// Confirmation followed by the optional countdown. `None` means go.
    async fn confirm_and_wait(&mut self, prompt: &str) -> Result<Option<RunStatus>> {
        let answer = tokio::select! {
            answer = self.operator.ask(prompt) => answer?,
            _ = self.cancel.cancelled() => {
                warn!("❌ Interrupted while waiting for confirmation");
                return Ok(Some(RunStatus::CancelledBeforeSend));
            }
        };

        if !is_affirmative(&answer) {
            info!("Operator answered '{}', nothing will be sent", answer.trim());
            return Ok(Some(RunStatus::Declined));
        }

        let delay = self.options.pre_send_delay_secs;
        if delay > 0 {
            println!("\nEmail will be sent in {} seconds...", delay);
            println!("Press Ctrl+C to cancel the scheduled send.\n");

            if countdown(delay, &self.cancel, &mut self.operator).await == CountdownOutcome::Cancelled {
                warn!("❌ Send cancelled during countdown");
                return Ok(Some(RunStatus::CancelledBeforeSend));
            }
        }

        Ok(None)
    }

    async fn dispatch(&mut self, job: &BatchJob) -> (RunStatus, DispatchSummary) {
        let total = job.len();
        let mut summary = DispatchSummary::new();
        let mut status = RunStatus::Completed;
        let mut has_sent = false;

        info!("🚀 Dispatching {} {} email(s)", total, job.kind);

        for (index, row) in job.rows.iter().enumerate() {
            let position = index + 1;

            if self.cancel.is_cancelled() {
                warn!("❌ Batch send cancelled!");
                status = RunStatus::CancelledDuringDispatch;
                break;
            }

            info!(
                "[{}/{}] Processing: {} <{}>",
                position,
                total,
                row.get(columns::NAME).unwrap_or("?"),
                row.get(columns::EMAIL).unwrap_or("?")
            );

            // A bad row fails alone and the batch moves on
            let email = match RecipientRecord::from_row(row, job.kind, &job.defaults)
                .and_then(|record| self.composer.compose(&record))
            {
                Ok(email) => email,
                Err(e) => {
                    error!("❌ Error on CSV line {}: {}", row.line, e);
                    summary.failure();
                    continue;
                }
            };

            // Pause only between two messages that actually go out
            if has_sent && !self.options.email_delay.is_zero() {
                info!("Waiting {} seconds before next email...", self.options.email_delay.as_secs());
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        warn!("❌ Batch send cancelled!");
                        status = RunStatus::CancelledDuringDispatch;
                        break;
                    }
                    _ = tokio::time::sleep(self.options.email_delay) => {}
                }
            }

            let outcome = self.sender.send(&email).await;
            has_sent = true;
            tally(&mut summary, &outcome);

            if outcome.is_permanent_failure() {
                error!(
                    "❌ Stopping the batch: the server refused the credentials, {} remaining recipient(s) not attempted",
                    total - position
                );
                status = RunStatus::AbortedOnAuthFailure;
                break;
            }
        }

        // Rows after an early stop were never attempted
        summary.skipped = total - summary.attempted();
        info!(
            "Dispatch finished: {} sent, {} failed, {} not attempted",
            summary.sent, summary.failed, summary.skipped
        );

        (status, summary)
    }
}

fn tally(summary: &mut DispatchSummary, outcome: &SendOutcome) {
    if outcome.is_sent() {
        summary.success();
    } else {
        summary.failure();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_from(csv: &str) -> BatchJob {
        BatchJob::from_reader(csv.as_bytes(), EmailKind::Blast, HashMap::new()).unwrap()
    }

    #[test]
    fn test_rows_keep_file_order_and_lines() {
        let job = job_from("email,name,student_id\nb@x.edu,Bea,2\na@x.edu,Ana,1\n");

        assert_eq!(job.len(), 2);
        assert_eq!(job.rows[0].get("name"), Some("Bea"));
        assert_eq!(job.rows[1].get("name"), Some("Ana"));
        assert_eq!(job.rows[0].line, 2);
        assert_eq!(job.rows[1].line, 3);
    }

    #[test]
    fn test_short_row_is_kept() {
        let job = job_from("email,name,student_id\na@x.edu,Ana\n");

        assert_eq!(job.len(), 1);
        assert_eq!(job.rows[0].get("student_id"), None);
    }

    #[test]
    fn test_preview_lists_rows_and_warns_on_large_batch() {
        let job = job_from("email,name,student_id\na@x.edu,Ana,1\nb@x.edu,,2\n");
        let options = DispatchOptions {
            max_emails_per_batch: 1,
            ..DispatchOptions::default()
        };

        let preview = render_batch_preview(&job, &options);

        assert!(preview.contains("Type: BLAST"));
        assert!(preview.contains("Total recipients: 2"));
        assert!(preview.contains("  1. Ana (1) - a@x.edu"));
        assert!(preview.contains("  2. <no name> (2) - b@x.edu"));
        assert!(preview.contains("WARNING: You are sending to 2 recipients."));
    }

    #[test]
    fn test_preview_without_warning() {
        let job = job_from("email,name,student_id\na@x.edu,Ana,1\n");

        let preview = render_batch_preview(&job, &DispatchOptions::default());

        assert!(!preview.contains("WARNING"));
        assert!(preview.contains("Delay between emails: 3 seconds"));
    }

    #[test]
    fn test_missing_csv_is_fatal() {
        let dir = tempfile::tempdir().unwrap();

        let err = BatchJob::from_csv(dir.path().join("nope.csv"), EmailKind::Blast, HashMap::new()).unwrap_err();

        assert!(err.to_string().contains("CSV file not found"));
    }

    #[test]
    fn test_summary_mentions_skipped_rows() {
        let now = Local::now();
        let report = RunReport {
            status: RunStatus::AbortedOnAuthFailure,
            summary: DispatchSummary { sent: 0, failed: 1, skipped: 4 },
            started_at: now,
            finished_at: now,
        };

        let text = report.render_summary();

        assert!(text.contains("aborted on authentication failure"));
        assert!(text.contains("❌ Failed: 1"));
        assert!(text.contains("Not attempted: 4"));
        assert!(report.status.is_aborted());
    }
}
