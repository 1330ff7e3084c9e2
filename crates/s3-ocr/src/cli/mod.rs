use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::pipeline::retry::RetryPolicy;

pub mod validators;

use validators::{validate_bucket, validate_retries, validate_search_limit};

/// Top-level CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "s3-ocr",
    version,
    author,
    about = "Run OCR against PDF files stored in S3 and index the extracted text"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// Supported subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start OCR jobs for PDF files in an S3 bucket.
    Start(StartArgs),
    /// Reuse existing jobs for documents whose content was already processed.
    Dedupe(DedupeArgs),
    /// Show how many submitted jobs have completed.
    Status(StatusArgs),
    /// Show the current status of an OCR job.
    InspectJob(InspectJobArgs),
    /// Download the OCR output for a document.
    Fetch(FetchArgs),
    /// Print the extracted text for a document.
    Text(TextArgs),
    /// Build or update a SQLite search index of completed OCR results.
    Index(IndexArgs),
    /// Full-text search over a local index.
    Search(SearchArgs),
}

/// Connection and credential options shared by every AWS-facing command.
#[derive(Debug, Clone, Default, Args)]
pub struct AwsArgs {
    /// AWS access key ID.
    #[arg(long, value_name = "KEY")]
    pub access_key: Option<String>,
    /// AWS secret access key.
    #[arg(long, value_name = "KEY")]
    pub secret_key: Option<String>,
    /// AWS session token.
    #[arg(long, value_name = "TOKEN")]
    pub session_token: Option<String>,
    /// Custom endpoint URL, e.g. for an S3-compatible store.
    #[arg(long, value_name = "URL")]
    pub endpoint_url: Option<String>,
    /// AWS region (overrides configuration and environment).
    #[arg(long)]
    pub region: Option<String>,
    /// JSON or INI file containing credentials.
    #[arg(short = 'a', long = "auth", value_name = "FILE")]
    pub auth: Option<PathBuf>,
}

impl AwsArgs {
    pub fn has_explicit_keys(&self) -> bool {
        self.access_key.is_some() || self.secret_key.is_some() || self.session_token.is_some()
    }
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// S3 bucket holding the documents.
    #[arg(value_parser = validate_bucket)]
    pub bucket: String,
    /// Specific document keys to process.
    pub keys: Vec<String>,
    /// Process every PDF in the bucket.
    #[arg(long)]
    pub all: bool,
    /// Process PDFs whose keys start with this prefix.
    #[arg(long)]
    pub prefix: Option<String>,
    /// List the documents that would be submitted without starting jobs.
    #[arg(long)]
    pub dry_run: bool,
    /// Retries for a rate-limited submission (overrides configuration).
    #[arg(long, value_name = "N", value_parser = validate_retries, conflicts_with = "no_retry")]
    pub retries: Option<u32>,
    /// Abort on the first rate-limit response.
    #[arg(long)]
    pub no_retry: bool,
    /// Resubmit documents whose content changed since their job was started.
    #[arg(long)]
    pub resubmit_changed: bool,
    #[command(flatten)]
    pub aws: AwsArgs,
}

impl StartArgs {
    /// Retry policy after applying `--retries` / `--no-retry` to `configured`.
    pub fn retry_policy(&self, configured: RetryPolicy) -> RetryPolicy {
        if self.no_retry {
            return RetryPolicy::disabled();
        }
        match self.retries {
            Some(max_retries) => RetryPolicy {
                max_retries,
                ..configured
            },
            None => configured,
        }
    }
}

#[derive(Debug, Args)]
pub struct DedupeArgs {
    #[arg(value_parser = validate_bucket)]
    pub bucket: String,
    /// Print the planned markers as JSON without writing them.
    #[arg(long)]
    pub dry_run: bool,
    #[command(flatten)]
    pub aws: AwsArgs,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(value_parser = validate_bucket)]
    pub bucket: String,
    #[command(flatten)]
    pub aws: AwsArgs,
}

#[derive(Debug, Args)]
pub struct InspectJobArgs {
    pub job_id: String,
    #[command(flatten)]
    pub aws: AwsArgs,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    #[arg(value_parser = validate_bucket)]
    pub bucket: String,
    /// Document key whose OCR output should be fetched.
    pub key: String,
    /// Write all parts combined into one JSON file (`-` for stdout).
    #[arg(short = 'c', long, value_name = "TARGET")]
    pub combine: Option<String>,
    /// Directory for per-part downloads.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,
    #[command(flatten)]
    pub aws: AwsArgs,
}

#[derive(Debug, Args)]
pub struct TextArgs {
    #[arg(value_parser = validate_bucket)]
    pub bucket: String,
    pub key: String,
    /// Separate pages with a `----` divider line.
    #[arg(long)]
    pub divider: bool,
    #[command(flatten)]
    pub aws: AwsArgs,
}

#[derive(Debug, Args)]
pub struct IndexArgs {
    #[arg(value_parser = validate_bucket)]
    pub bucket: String,
    /// SQLite database to create or update.
    #[arg(value_name = "DATABASE")]
    pub database: PathBuf,
    #[command(flatten)]
    pub aws: AwsArgs,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(value_name = "DATABASE")]
    pub database: PathBuf,
    /// FTS5 query expression.
    pub query: String,
    /// Maximum number of hits to print.
    #[arg(long, default_value_t = 20, value_parser = validate_search_limit)]
    pub limit: usize,
}
