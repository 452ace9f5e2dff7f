//! Descriptor for each kind of email the tool can send.

use std::fmt;

use crate::config::ContentConfig;
use crate::email::common::{columns, RecipientRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum EmailKind {
    /// Election announcement with precinct and alternative-email form
    #[value(name = "blast")]
    Blast,
    /// Ballot link for online voters
    #[value(name = "ballot_links")]
    BallotLinks,
    /// Online voting application approved
    #[value(name = "approval")]
    Approval,
    /// Online voting application must be resubmitted
    #[value(name = "reapply")]
    Reapply,
}

impl EmailKind {
    pub fn name(&self) -> &'static str {
        match self {
            EmailKind::Blast => "blast",
            EmailKind::BallotLinks => "ballot_links",
            EmailKind::Approval => "approval",
            EmailKind::Reapply => "reapply",
        }
    }

    pub fn template_file(&self) -> &'static str {
        match self {
            EmailKind::Blast => "email_blast.html",
            EmailKind::BallotLinks => "email_ballot_links.html",
            EmailKind::Approval => "email_approval_template.html",
            EmailKind::Reapply => "email_reapply_template.html",
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            EmailKind::Blast => "USSC Special Election & Plebiscite - December 9, 2025",
            EmailKind::BallotLinks => "VOTE NOW - USSC Special Election & Plebiscite",
            EmailKind::Approval => "Online Voting Application Approved - FC Plebiscite",
            EmailKind::Reapply => "Online Voting Application - Reapplication Required",
        }
    }

    /// Value of the `X-Priority` header (1 = highest).
    pub fn priority(&self) -> u8 {
        match self {
            EmailKind::BallotLinks | EmailKind::Reapply => 1,
            EmailKind::Blast | EmailKind::Approval => 3,
        }
    }

    /// Kind-specific columns a record must carry besides email, name and ID.
    pub fn extra_fields(&self) -> &'static [&'static str] {
        match self {
            EmailKind::Blast | EmailKind::BallotLinks => &[],
            EmailKind::Approval => &[columns::ELECTION_DATE, columns::START_TIME, columns::END_TIME],
            EmailKind::Reapply => &[columns::REAPPLY_REASON],
        }
    }

    /// Placeholder → value pairs for one recipient, in substitution order.
    pub fn placeholders(
        &self,
        record: &RecipientRecord,
        content: &ContentConfig,
    ) -> Vec<(&'static str, String)> {
        let mut replacements = vec![
            ("[STUDENT NAME]", record.name.clone()),
            ("[STUDENT ID NO.]", record.student_id.clone()),
            ("[WHITELISTED EMAIL]", record.email.clone()),
        ];

        let extra = |column: &str| record.extra(column).unwrap_or_default().to_string();

        match self {
            EmailKind::Blast => {
                replacements.push(("[ALTERNATIVE EMAIL FORM LINK]", content.alternative_email_form_link.clone()));
                replacements.push(("[PRECINCT LOCATION]", content.precinct_location.clone()));
            }
            EmailKind::BallotLinks => {
                replacements.push(("[SPECIAL ELECTION LINK]", content.ballot_link.clone()));
                replacements.push(("[PRECINCT LOCATION]", content.precinct_location.clone()));
            }
            EmailKind::Approval => {
                replacements.push(("[ELECTION DATE]", extra(columns::ELECTION_DATE)));
                replacements.push(("[START TIME]", extra(columns::START_TIME)));
                replacements.push(("[END TIME]", extra(columns::END_TIME)));
            }
            EmailKind::Reapply => {
                replacements.push(("[REAPPLY REASON]", extra(columns::REAPPLY_REASON)));
                replacements.push(("[REAPPLY LINK]", content.reapply_link.clone()));
            }
        }

        replacements
    }
}

impl fmt::Display for EmailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_placeholders_use_record_extras() {
        let record = RecipientRecord::new("23-1-01032@vsu.edu.ph", "Ana Reyes", "23-1-01032")
            .with_extra(columns::ELECTION_DATE, "Wednesday, November 26, 2025")
            .with_extra(columns::START_TIME, "8:00 AM")
            .with_extra(columns::END_TIME, "5:00 PM");

        let pairs = EmailKind::Approval.placeholders(&record, &ContentConfig::default());

        assert!(pairs.contains(&("[ELECTION DATE]", "Wednesday, November 26, 2025".to_string())));
        assert!(pairs.contains(&("[END TIME]", "5:00 PM".to_string())));
        assert!(pairs.contains(&("[WHITELISTED EMAIL]", "23-1-01032@vsu.edu.ph".to_string())));
    }

    #[test]
    fn test_ballot_links_uses_configured_link() {
        let record = RecipientRecord::new("a@vsu.edu.ph", "A", "1");
        let content = ContentConfig {
            ballot_link: "https://vote.example/ballot".to_string(),
            precinct_location: "TBA".to_string(),
            ..ContentConfig::default()
        };

        let pairs = EmailKind::BallotLinks.placeholders(&record, &content);

        assert!(pairs.contains(&("[SPECIAL ELECTION LINK]", "https://vote.example/ballot".to_string())));
        assert_eq!(EmailKind::BallotLinks.priority(), 1);
    }

    #[test]
    fn test_extra_fields_per_kind() {
        assert!(EmailKind::Blast.extra_fields().is_empty());
        assert_eq!(EmailKind::Reapply.extra_fields(), &[columns::REAPPLY_REASON]);
        assert_eq!(EmailKind::Approval.extra_fields().len(), 3);
    }
}
