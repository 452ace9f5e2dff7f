use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{debug, info};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{HeaderConfig, SmtpConfig};
use crate::email::OutgoingEmail;
use crate::error::TransportError;

/// One delivery attempt for one message.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), TransportError>;

    fn name(&self) -> &str;
}

/// SMTP reply codes meaning the credentials were refused.
const AUTH_FAILURE_CODES: [&str; 4] = ["530", "534", "535", "538"];

pub fn is_auth_failure_code(code: &str) -> bool {
    AUTH_FAILURE_CODES.contains(&code)
}

fn classify(err: lettre::transport::smtp::Error) -> TransportError {
    match err.status().map(|code| code.to_string()) {
        Some(code) if is_auth_failure_code(&code) => TransportError::Authentication(err.to_string()),
        _ => TransportError::Transient(err.to_string()),
    }
}

macro_rules! text_header {
    ($ty:ident, $name:literal) => {
        #[derive(Debug, Clone)]
        struct $ty(String);

        impl Header for $ty {
            fn name() -> HeaderName {
                HeaderName::new_from_ascii_str($name)
            }

            fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
                Ok($ty(s.to_string()))
            }

            fn display(&self) -> HeaderValue {
                HeaderValue::new(Self::name(), self.0.clone())
            }
        }
    };
}

text_header!(XPriority, "X-Priority");
text_header!(XMailer, "X-Mailer");
text_header!(Organization, "Organization");
text_header!(ListUnsubscribe, "List-Unsubscribe");

/// STARTTLS SMTP delivery. Each attempt opens its own connection and
/// closes it after the message (no pooling).
pub struct SmtpTransport {
    host: String,
    port: u16,
    credentials: Credentials,
    from: Mailbox,
    reply_to: Option<Mailbox>,
    headers: HeaderConfig,
}

impl SmtpTransport {
    pub fn new(smtp: &SmtpConfig, headers: &HeaderConfig) -> Result<Self> {
        info!("Configuring SMTP transport {}:{}", smtp.host, smtp.port);

        let from: Mailbox = smtp
            .sender_email
            .parse()
            .with_context(|| format!("SENDER_EMAIL is not a valid address: '{}'", smtp.sender_email))?;

        let reply_to = headers
            .reply_to
            .as_deref()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .with_context(|| format!("REPLY_TO is not a valid address: '{}'", addr))
            })
            .transpose()?;

        Ok(SmtpTransport {
            host: smtp.host.clone(),
            port: smtp.port,
            credentials: Credentials::new(smtp.sender_email.clone(), smtp.sender_password.clone()),
            from,
            reply_to,
            headers: headers.clone(),
        })
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message, TransportError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(email.to.clone())
            .subject(email.subject.clone())
            .header(XPriority(email.priority.to_string()))
            .header(XMailer(self.headers.x_mailer.clone()));

        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }
        if let Some(organization) = &self.headers.organization {
            builder = builder.header(Organization(organization.clone()));
        }
        if let Some(list_unsubscribe) = &self.headers.list_unsubscribe {
            builder = builder.header(ListUnsubscribe(list_unsubscribe.clone()));
        }

        builder
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone())
            .map_err(|e| TransportError::Rejected(format!("unable to build message: {}", e)))
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
        let message = self.build_message(email)?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
            .map_err(classify)?
            .port(self.port)
            .credentials(self.credentials.clone())
            .build();

        let response = mailer.send(message).await.map_err(classify)?;
        debug!("SMTP response for {}: {:?}", email.recipient(), response.code());

        Ok(())
    }

    fn name(&self) -> &str {
        "smtp"
    }
}

/// Writes each rendered message to an outbox directory instead of sending it.
pub struct DryRunTransport {
    outbox: PathBuf,
    written: AtomicUsize,
}

impl DryRunTransport {
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        DryRunTransport {
            outbox: outbox.into(),
            written: AtomicUsize::new(0),
        }
    }

    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    fn file_name(index: usize, recipient: &str) -> String {
        let safe: String = recipient
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        format!("{:03}_{}.html", index, safe)
    }
}

#[async_trait]
impl Transport for DryRunTransport {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
        tokio::fs::create_dir_all(&self.outbox)
            .await
            .map_err(|e| TransportError::Transient(format!("unable to create outbox: {}", e)))?;

        let index = self.written.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.outbox.join(Self::file_name(index, &email.recipient()));
        let content = format!(
            "<!-- To: {} | Subject: {} | X-Priority: {} -->\n{}",
            email.to, email.subject, email.priority, email.html_body
        );

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| TransportError::Transient(format!("unable to write {}: {}", path.display(), e)))?;

        info!("💾 [dry-run] Message for {} saved to {}", email.recipient(), path.display());
        Ok(())
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_codes() {
        assert!(is_auth_failure_code("535"));
        assert!(is_auth_failure_code("530"));
        assert!(!is_auth_failure_code("421"));
        assert!(!is_auth_failure_code("550"));
    }

    #[test]
    fn test_dry_run_file_name() {
        assert_eq!(
            DryRunTransport::file_name(7, "23-1-01032@vsu.edu.ph"),
            "007_23-1-01032_vsu.edu.ph.html"
        );
    }

    #[tokio::test]
    async fn test_dry_run_writes_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let transport = DryRunTransport::new(dir.path().join("outbox"));
        let email = OutgoingEmail {
            to: "ana@vsu.edu.ph".parse().unwrap(),
            subject: "Hello".to_string(),
            html_body: "<p>Hi Ana</p>".to_string(),
            priority: 3,
        };

        transport.deliver(&email).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("outbox/001_ana_vsu.edu.ph.html")).unwrap();
        assert!(written.contains("<p>Hi Ana</p>"));
        assert!(written.contains("Subject: Hello"));
        assert_eq!(transport.written(), 1);
    }

    #[test]
    fn test_smtp_transport_rejects_bad_sender() {
        let smtp = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            sender_email: "not an address".to_string(),
            sender_password: "secret".to_string(),
        };

        assert!(SmtpTransport::new(&smtp, &HeaderConfig::default()).is_err());
    }

    #[test]
    fn test_smtp_message_carries_headers() {
        let smtp = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            sender_email: "seb@vsu.edu.ph".to_string(),
            sender_password: "secret".to_string(),
        };
        let headers = HeaderConfig {
            reply_to: Some("fcbaybayseb@vsu.edu.ph".to_string()),
            organization: Some("Faculty of Computing".to_string()),
            ..HeaderConfig::default()
        };
        let transport = SmtpTransport::new(&smtp, &headers).unwrap();
        let email = OutgoingEmail {
            to: "ana@vsu.edu.ph".parse().unwrap(),
            subject: "VOTE NOW".to_string(),
            html_body: "<p>Hi</p>".to_string(),
            priority: 1,
        };

        let formatted = String::from_utf8(transport.build_message(&email).unwrap().formatted()).unwrap();

        assert!(formatted.contains("X-Priority: 1"));
        assert!(formatted.contains("X-Mailer: Election Mailer"));
        assert!(formatted.contains("Organization: Faculty of Computing"));
        assert!(formatted.contains("Reply-To: fcbaybayseb@vsu.edu.ph"));
        assert!(formatted.contains("Subject: VOTE NOW"));
    }
}
