use log::warn;

use crate::config::ContentConfig;
use crate::email::common::{OutgoingEmail, RecipientRecord};
use crate::email::kind::EmailKind;
use crate::email::template::{unresolved_placeholders, Template};
use crate::error::RowError;

/// Turns recipient records into rendered messages for one email kind.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    kind: EmailKind,
    template: Template,
    content: ContentConfig,
}

impl MessageComposer {
    pub fn new(kind: EmailKind, template: Template, content: ContentConfig) -> Self {
        MessageComposer { kind, template, content }
    }

    pub fn kind(&self) -> EmailKind {
        self.kind
    }

    pub fn compose(&self, record: &RecipientRecord) -> Result<OutgoingEmail, RowError> {
        let to = record.mailbox()?;

        let html_body = self.template.render(&self.kind.placeholders(record, &self.content));

        let leftovers = unresolved_placeholders(&html_body);
        if !leftovers.is_empty() {
            warn!(
                "⚠️  {} email for {} still contains placeholders: {}",
                self.kind,
                record.email,
                leftovers.join(", ")
            );
        }

        Ok(OutgoingEmail {
            to,
            subject: self.kind.subject().to_string(),
            html_body,
            priority: self.kind.priority(),
        })
    }
}
