use anyhow::{Context, Result};
use serde::Deserialize;

/// Batch size above which the preview recommends splitting the CSV.
pub const DEFAULT_MAX_EMAILS_PER_BATCH: usize = 50;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub smtp: SmtpConfig,
    pub content: ContentConfig,
    pub headers: HeaderConfig,
    pub template_dir: String,
    pub max_emails_per_batch: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub sender_email: String,
    pub sender_password: String,
}

/// Job-wide values substituted into the templates.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ContentConfig {
    pub alternative_email_form_link: String,
    pub precinct_location: String,
    pub ballot_link: String,
    pub reapply_link: String,
}

/// Optional headers added to every outgoing message.
#[derive(Debug, Deserialize, Clone)]
pub struct HeaderConfig {
    pub reply_to: Option<String>,
    pub organization: Option<String>,
    pub x_mailer: String,
    pub list_unsubscribe: Option<String>,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        HeaderConfig {
            reply_to: None,
            organization: None,
            x_mailer: "Election Mailer".to_string(),
            list_unsubscribe: None,
        }
    }
}

const REQUIRED_VARS: [&str; 4] = ["SMTP_SERVER", "SMTP_PORT", "SENDER_EMAIL", "SENDER_PASSWORD"];

impl Config {
    pub fn new() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::check_required_vars(&lookup)?;

        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &str| {
            var(name).with_context(|| format!("{} must be set", name))
        };

        let port_raw = required("SMTP_PORT")?;
        let port: u16 = port_raw
            .trim()
            .parse()
            .with_context(|| format!("SMTP_PORT is not a valid port number: '{}'", port_raw))?;

        let max_emails_per_batch = match var("MAX_EMAILS_PER_BATCH") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("MAX_EMAILS_PER_BATCH is not a number: '{}'", raw))?,
            None => DEFAULT_MAX_EMAILS_PER_BATCH,
        };

        Ok(Config {
            smtp: SmtpConfig {
                host: required("SMTP_SERVER")?,
                port,
                sender_email: required("SENDER_EMAIL")?,
                sender_password: required("SENDER_PASSWORD")?,
            },
            content: ContentConfig {
                alternative_email_form_link: var("ALTERNATIVE_EMAIL_FORM_LINK").unwrap_or_default(),
                precinct_location: var("PRECINCT_LOCATION").unwrap_or_else(|| "TBA".to_string()),
                ballot_link: var("BALLOT_LINK").unwrap_or_default(),
                reapply_link: var("REAPPLY_LINK").unwrap_or_default(),
            },
            headers: HeaderConfig {
                reply_to: var("REPLY_TO"),
                organization: var("ORGANIZATION"),
                x_mailer: var("X_MAILER").unwrap_or_else(|| HeaderConfig::default().x_mailer),
                list_unsubscribe: var("LIST_UNSUBSCRIBE"),
            },
            template_dir: var("TEMPLATE_DIR").unwrap_or_else(|| ".".to_string()),
            max_emails_per_batch,
        })
    }

    fn check_required_vars<F>(lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let missing_vars: Vec<&str> = REQUIRED_VARS
            .iter()
            .copied()
            .filter(|&name| lookup(name).map_or(true, |v| v.trim().is_empty()))
            .collect();

        if !missing_vars.is_empty() {
            anyhow::bail!(
                "Missing environment variables: {}\n\
                 \n\
                 💡 Solutions:\n\
                 1. Create a .env file with your SMTP credentials:\n\
                    cp .env.example .env\n\
                    # Then edit .env with your values\n\
                 \n\
                 2. Or export the variables manually:\n\
                    export SMTP_SERVER=smtp.gmail.com\n\
                    export SMTP_PORT=587\n\
                    export SENDER_EMAIL=you@example.com\n\
                    export SENDER_PASSWORD=your-app-password",
                missing_vars.join(", ")
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    const SMTP_VARS: [(&str, &str); 4] = [
        ("SMTP_SERVER", "smtp.example.com"),
        ("SMTP_PORT", "587"),
        ("SENDER_EMAIL", "seb@example.com"),
        ("SENDER_PASSWORD", "app-password"),
    ];

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_lookup(lookup_from(&SMTP_VARS)).unwrap();

        assert_eq!(config.smtp.host, "smtp.example.com");
        assert_eq!(config.smtp.port, 587);
        assert_eq!(config.content.precinct_location, "TBA");
        assert_eq!(config.content.ballot_link, "");
        assert_eq!(config.headers.x_mailer, "Election Mailer");
        assert_eq!(config.template_dir, ".");
        assert_eq!(config.max_emails_per_batch, DEFAULT_MAX_EMAILS_PER_BATCH);
    }

    #[test]
    fn test_missing_transport_vars_are_listed() {
        let err = Config::from_lookup(lookup_from(&[("SMTP_SERVER", "smtp.example.com")]))
            .unwrap_err()
            .to_string();

        let first_line = err.lines().next().unwrap_or_default();
        assert_eq!(
            first_line,
            "Missing environment variables: SMTP_PORT, SENDER_EMAIL, SENDER_PASSWORD"
        );
    }

    #[test]
    fn test_invalid_port_rejected() {
        let mut vars = SMTP_VARS.to_vec();
        vars[1] = ("SMTP_PORT", "not-a-port");

        assert!(Config::from_lookup(lookup_from(&vars)).is_err());
    }

    #[test]
    fn test_optional_values_read() {
        let mut vars = SMTP_VARS.to_vec();
        vars.push(("PRECINCT_LOCATION", "CAS Building"));
        vars.push(("REPLY_TO", "seb@example.com"));
        vars.push(("MAX_EMAILS_PER_BATCH", "20"));

        let config = Config::from_lookup(lookup_from(&vars)).unwrap();

        assert_eq!(config.content.precinct_location, "CAS Building");
        assert_eq!(config.headers.reply_to.as_deref(), Some("seb@example.com"));
        assert_eq!(config.max_emails_per_batch, 20);
    }
}
