use anyhow::Result;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};
use log::{error, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use election_mailer::batch::{
    BatchJob, BatchRunner, DispatchOptions, RunReport, DEFAULT_EMAIL_DELAY_SECS,
    DEFAULT_PRE_SEND_DELAY_SECS,
};
use election_mailer::config::Config;
use election_mailer::email::common::columns;
use election_mailer::email::{EmailKind, MessageComposer, RecipientRecord, Template};
use election_mailer::error::RowError;
use election_mailer::operator::ConsoleOperator;
use election_mailer::sender::{RetryPolicy, RetryingSender, DEFAULT_MAX_RETRIES};
use election_mailer::transport::{DryRunTransport, SmtpTransport, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// One recipient given on the command line
    Single,
    /// Every row of a CSV file
    Batch,
}

#[derive(Parser)]
#[command(name = "election-mailer")]
#[command(about = "USSC Email Sender - Special Election and Plebiscite")]
#[command(version = "0.1.0")]
struct Args {
    /// Send mode: single email or batch from CSV
    #[arg(long, value_enum, default_value_t = Mode::Single)]
    mode: Mode,

    /// Type of email to send
    #[arg(long = "type", value_enum, default_value_t = EmailKind::Blast)]
    kind: EmailKind,

    /// Recipient email address (single mode)
    #[arg(long)]
    email: Option<String>,

    /// Student name (single mode)
    #[arg(long)]
    name: Option<String>,

    /// Student ID (single mode)
    #[arg(long)]
    id: Option<String>,

    /// Path to CSV file for batch processing (columns: email,name,student_id[,...])
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Delay in seconds before sending
    #[arg(long, default_value_t = DEFAULT_PRE_SEND_DELAY_SECS)]
    delay: u64,

    /// Delay in seconds between each email in batch mode
    #[arg(long, default_value_t = DEFAULT_EMAIL_DELAY_SECS)]
    email_delay: u64,

    /// Election date (approval emails)
    #[arg(long)]
    election_date: Option<String>,

    /// Voting start time (approval emails)
    #[arg(long)]
    start_time: Option<String>,

    /// Voting end time (approval emails)
    #[arg(long)]
    end_time: Option<String>,

    /// Reason the application must be resubmitted (reapply emails)
    #[arg(long)]
    reapply_reason: Option<String>,

    /// Reapplication form link, overrides REAPPLY_LINK (reapply emails)
    #[arg(long)]
    reapply_link: Option<String>,

    /// Maximum delivery attempts per recipient
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Render and save messages to the outbox instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Directory receiving the rendered messages in dry-run mode
    #[arg(long, default_value = "./outbox")]
    outbox: PathBuf,

    /// Check the configuration and exit
    #[arg(long)]
    check_config: bool,
}

impl Args {
    /// Kind-specific values given on the command line, keyed by CSV column.
    fn job_defaults(&self) -> HashMap<String, String> {
        [
            (columns::ELECTION_DATE, &self.election_date),
            (columns::START_TIME, &self.start_time),
            (columns::END_TIME, &self.end_time),
            (columns::REAPPLY_REASON, &self.reapply_reason),
        ]
        .into_iter()
        .filter_map(|(column, value)| value.as_ref().map(|v| (column.to_string(), v.clone())))
        .collect()
    }

    /// Recipient of a single-mode send, or the usage message to print.
    fn single_recipient(&self) -> Result<RecipientRecord, String> {
        let mut fields = self.job_defaults();
        for (column, value) in [
            (columns::EMAIL, &self.email),
            (columns::NAME, &self.name),
            (columns::STUDENT_ID, &self.id),
        ] {
            if let Some(value) = value {
                fields.insert(column.to_string(), value.clone());
            }
        }

        let record = match RecipientRecord::from_fields(&fields, self.kind, &HashMap::new()) {
            Ok(record) => record,
            Err(RowError::MissingField(column)) if column.as_str() == columns::EMAIL
                || column.as_str() == columns::NAME
                || column.as_str() == columns::STUDENT_ID =>
            {
                return Err("--email, --name, and --id are required for single mode".to_string())
            }
            Err(RowError::MissingField(column)) => {
                return Err(format!(
                    "--{} is required for {} emails",
                    column.replace('_', "-"),
                    self.kind
                ))
            }
            Err(e) => return Err(e.to_string()),
        };

        // Une adresse invalide est signalée avant la confirmation et le compte à rebours
        if let Err(e) = record.mailbox() {
            return Err(format!("--email: {}", e));
        }

        Ok(record)
    }

    fn check_usage(&self) -> Result<(), String> {
        match self.mode {
            Mode::Single => self.single_recipient().map(|_| ()),
            Mode::Batch if self.csv.is_none() => Err("--csv is required for batch mode".to_string()),
            Mode::Batch => Ok(()),
        }
    }

    fn validate(&self) {
        if let Err(message) = self.check_usage() {
            usage_error(message);
        }
    }
}

fn usage_error(message: impl std::fmt::Display) -> ! {
    let mut command = Args::command();
    let _ = command.print_help();
    println!();
    command.error(ErrorKind::MissingRequiredArgument, message).exit()
}

/// First Ctrl+C cancels the token, a second one exits immediately.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Unable to listen for Ctrl+C, cancellation disabled");
            return;
        }
        println!("\n\n❌ Interrupted by user, stopping before the next send...");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n❌ Forced exit.");
            std::process::exit(130);
        }
    });
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Charger le fichier .env s'il existe
    dotenv::dotenv().ok();

    // Parser les arguments CLI
    let args = Args::parse();

    // Initialiser le logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("--- USSC Email Sender - Special Election and Plebiscite ---\n");

    // Les erreurs d'usage sortent avant tout accès à la configuration
    if !args.check_config {
        args.validate();
    }

    // Charger la configuration
    let mut config = Config::new()?;
    if let Some(link) = &args.reapply_link {
        config.content.reapply_link = link.clone();
    }

    // Si demandé, vérifier seulement la configuration
    if args.check_config {
        println!("✅ Configuration valid!");
        println!("📧 SMTP: {}@{}:{}", config.smtp.sender_email, config.smtp.host, config.smtp.port);
        println!("🔑 Password: {}", "*".repeat(config.smtp.sender_password.len().min(12)));
        println!("📁 Templates: {}", config.template_dir);
        println!("📍 Precinct location: {}", config.content.precinct_location);
        println!("📦 Recommended batch size: {}", config.max_emails_per_batch);
        return Ok(ExitCode::SUCCESS);
    }

    if args.dry_run {
        info!("🧪 Starting in DRY-RUN mode, messages go to {}", args.outbox.display());
    } else {
        info!("🚀 Starting {} {} send", args.kind, if args.mode == Mode::Batch { "batch" } else { "single" });
    }

    // Un template manquant est fatal avant tout envoi
    let template = Template::load(&config.template_dir, args.kind)?;
    let composer = MessageComposer::new(args.kind, template, config.content.clone());

    // Mode dry-run : les messages sont écrits dans l'outbox
    let transport: Arc<dyn Transport> = if args.dry_run {
        Arc::new(DryRunTransport::new(args.outbox.clone()))
    } else {
        Arc::new(SmtpTransport::new(&config.smtp, &config.headers)?)
    };
    let sender = RetryingSender::new(transport, RetryPolicy::new(args.max_retries));

    // Ctrl+C annule le jeton, vérifié entre chaque étape
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let options = DispatchOptions {
        email_delay: Duration::from_secs(args.email_delay),
        pre_send_delay_secs: args.delay,
        max_emails_per_batch: config.max_emails_per_batch,
    };
    let mut runner = BatchRunner::new(sender, composer, ConsoleOperator::new(), cancel, options);

    let result: Result<RunReport> = match args.mode {
        Mode::Single => match args.single_recipient() {
            Ok(record) => runner.run_single(&record).await,
            Err(message) => usage_error(message),
        },
        Mode::Batch => match &args.csv {
            Some(csv) => match BatchJob::from_csv(csv, args.kind, args.job_defaults()) {
                Ok(job) => runner.run_batch(&job).await,
                Err(e) => Err(e),
            },
            None => usage_error("--csv is required for batch mode"),
        },
    };

    // Afficher le bilan et choisir le code de sortie
    match result {
        Ok(report) => {
            println!("{}", report.render_summary());
            if report.status.is_aborted() {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Err(e) => {
            error!("❌ {:#}", e);
            Err(e)
        }
    }
}
