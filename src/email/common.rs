//! Common structures shared by the composer, the sender and the batch runner
use std::collections::{BTreeMap, HashMap};

use lettre::message::Mailbox;

use crate::email::kind::EmailKind;
use crate::error::RowError;

/// CSV column names.
pub mod columns {
    pub const EMAIL: &str = "email";
    pub const NAME: &str = "name";
    pub const STUDENT_ID: &str = "student_id";
    pub const ELECTION_DATE: &str = "election_date";
    pub const START_TIME: &str = "start_time";
    pub const END_TIME: &str = "end_time";
    pub const REAPPLY_REASON: &str = "reapply_reason";
}

/// One data row of the CSV file, as read (not yet validated).
#[derive(Debug, Clone)]
pub struct CsvRow {
    /// 1-based line number in the file, header included.
    pub line: u64,
    pub values: Result<HashMap<String, String>, String>,
}

impl CsvRow {
    pub fn from_pairs(line: u64, pairs: &[(&str, &str)]) -> Self {
        CsvRow {
            line,
            values: Ok(pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()),
        }
    }

    /// Trimmed, non-empty value of a column.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.as_ref().ok().and_then(|values| non_empty(values, column))
    }
}

fn non_empty<'a>(values: &'a HashMap<String, String>, column: &str) -> Option<&'a str> {
    values
        .get(column)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientRecord {
    pub email: String,
    pub name: String,
    pub student_id: String,
    extras: BTreeMap<String, String>,
}

impl RecipientRecord {
    pub fn new(email: impl Into<String>, name: impl Into<String>, student_id: impl Into<String>) -> Self {
        RecipientRecord {
            email: email.into(),
            name: name.into(),
            student_id: student_id.into(),
            extras: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, column: &str, value: impl Into<String>) -> Self {
        self.extras.insert(column.to_string(), value.into());
        self
    }

    pub fn extra(&self, column: &str) -> Option<&str> {
        self.extras.get(column).map(String::as_str)
    }

    pub fn extras(&self) -> impl Iterator<Item = (&str, &str)> {
        self.extras.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parsed recipient address.
    pub fn mailbox(&self) -> Result<Mailbox, RowError> {
        self.email
            .parse()
            .map_err(|e: lettre::address::AddressError| RowError::InvalidAddress {
                address: self.email.clone(),
                reason: e.to_string(),
            })
    }

    pub fn from_row(
        row: &CsvRow,
        kind: EmailKind,
        defaults: &HashMap<String, String>,
    ) -> Result<Self, RowError> {
        let values = row.values.as_ref().map_err(|e| RowError::Malformed(e.clone()))?;
        Self::from_fields(values, kind, defaults)
    }

    /// Validates the fields required by `kind`. Kind-specific fields fall back
    /// to the job-level `defaults` when the row leaves them empty.
    pub fn from_fields(
        values: &HashMap<String, String>,
        kind: EmailKind,
        defaults: &HashMap<String, String>,
    ) -> Result<Self, RowError> {
        let required = |column: &str| {
            non_empty(values, column)
                .map(str::to_string)
                .ok_or_else(|| RowError::MissingField(column.to_string()))
        };

        let mut record = RecipientRecord::new(
            required(columns::EMAIL)?,
            required(columns::NAME)?,
            required(columns::STUDENT_ID)?,
        );

        for column in kind.extra_fields() {
            let value = non_empty(values, column)
                .or_else(|| non_empty(defaults, column))
                .ok_or_else(|| RowError::MissingField(column.to_string()))?;
            record.extras.insert(column.to_string(), value.to_string());
        }

        Ok(record)
    }
}

/// A fully rendered message ready for the transport.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: Mailbox,
    pub subject: String,
    pub html_body: String,
    pub priority: u8,
}

impl OutgoingEmail {
    pub fn recipient(&self) -> String {
        self.to.email.to_string()
    }
}

/// Result of sending to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { attempts: u32 },
    FailedPermanent { reason: String },
    Rejected { reason: String },
    FailedTransientExhausted { attempts: u32, last_error: String },
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }

    pub fn is_permanent_failure(&self) -> bool {
        matches!(self, SendOutcome::FailedPermanent { .. })
    }
}

/// Tally of a dispatch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    /// Rows never attempted because the run stopped early.
    pub skipped: usize,
}

impl DispatchSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(&mut self) {
        self.sent += 1;
    }

    pub fn failure(&mut self) {
        self.failed += 1;
    }

    pub fn attempted(&self) -> usize {
        self.sent + self.failed
    }
}
