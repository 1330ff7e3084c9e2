use std::{
    io::{self, Write},
    path::Path,
    process,
    sync::Arc,
};

use s3_ocr::cli::{
    AwsArgs, Cli, Commands, DedupeArgs, FetchArgs, IndexArgs, InspectJobArgs, SearchArgs,
    StartArgs, StatusArgs, TextArgs,
};
use s3_ocr::config::{self, AppConfig, read_auth_file};
use s3_ocr::error::AppError;
use s3_ocr::index::PageIndex;
use s3_ocr::pipeline::{ListingScope, StatusReport, derive_state, render_text};
use s3_ocr::progress::make_progress_bar;
use s3_ocr::services::{
    AwsConnection, ReconcileContext, S3ObjectStore, SubmitEvent, SubmitOptions,
    TextractClient, build_index, build_limiter, combined_for_document,
    dedupe_markers, describe_job, download_parts, list_output_parts, load_listing, load_sdk_config,
    resolve_job_id, submit_pending,
};
use tracing_subscriber::{filter::LevelFilter, fmt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_level = determine_log_level(&cli);
    init_tracing(log_level);

    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn init_tracing(level: LevelFilter) {
    let subscriber = fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

fn determine_log_level(cli: &Cli) -> LevelFilter {
    match cli.verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let verbosity = cli.verbose;
    let cfg = config::load()?;

    match cli.command {
        Commands::Start(args) => run_start(&cfg, args).await?,
        Commands::Dedupe(args) => run_dedupe(&cfg, args, verbosity).await?,
        Commands::Status(args) => run_status(&cfg, args).await?,
        Commands::InspectJob(args) => run_inspect_job(&cfg, args).await?,
        Commands::Fetch(args) => run_fetch(&cfg, args, verbosity).await?,
        Commands::Text(args) => run_text(&cfg, args).await?,
        Commands::Index(args) => run_index(&cfg, args, verbosity).await?,
        Commands::Search(args) => run_search(args)?,
    }

    Ok(())
}

/// Merge configuration with command-line connection flags.
async fn resolve_connection(cfg: &AppConfig, aws: &AwsArgs) -> Result<AwsConnection, AppError> {
    let mut connection = AwsConnection::from_config(&cfg.aws);
    if let Some(region) = &aws.region {
        connection.region = Some(region.clone());
    }
    if let Some(endpoint) = &aws.endpoint_url {
        connection.endpoint_url = Some(endpoint.clone());
    }

    match (&aws.auth, aws.has_explicit_keys()) {
        (Some(_), true) => {
            return Err(AppError::Usage(
                "--auth cannot be used with --access-key, --secret-key or --session-token"
                    .to_string(),
            ));
        }
        (Some(path), false) => {
            connection.credentials = Some(read_auth_file(path).await?);
        }
        (None, true) => {
            let (Some(access_key_id), Some(secret_access_key)) = (&aws.access_key, &aws.secret_key)
            else {
                return Err(AppError::Usage(
                    "--access-key and --secret-key must be provided together".to_string(),
                ));
            };
            connection.credentials = Some(config::StaticCredentials {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                session_token: aws.session_token.clone(),
            });
        }
        (None, false) => {}
    }
    Ok(connection)
}

async fn build_context(
    cfg: &AppConfig,
    aws: &AwsArgs,
    bucket: &str,
) -> Result<(ReconcileContext, aws_config::SdkConfig), AppError> {
    let connection = resolve_connection(cfg, aws).await?;
    let sdk_config = load_sdk_config(&connection).await;
    let store = S3ObjectStore::from_sdk_config(&sdk_config, connection.force_path_style);
    let ctx = ReconcileContext::new(Arc::new(store), bucket, cfg.ocr.layout());
    tracing::debug!(bucket, "initialized S3 object store");
    Ok((ctx, sdk_config))
}

async fn run_start(cfg: &AppConfig, args: StartArgs) -> Result<(), AppError> {
    let scope = ListingScope::from_selection(args.keys.clone(), args.prefix.clone(), args.all)?;
    let (ctx, sdk_config) = build_context(cfg, &args.aws, &args.bucket).await?;
    let limiter = build_limiter(cfg.submit.requests_per_second);
    let client = TextractClient::from_sdk_config(&sdk_config, limiter);

    let options = SubmitOptions {
        dry_run: args.dry_run,
        resubmit_changed: args.resubmit_changed,
        policy: args.retry_policy(cfg.submit.retry_policy()),
    };

    let mut on_event = |event: &SubmitEvent| match event {
        SubmitEvent::Planned {
            marked, documents, ..
        } => {
            println!("Found {marked} files with .s3-ocr.json out of {documents} PDFs");
        }
        SubmitEvent::WouldSubmit { key } => println!("Would start OCR for {key}"),
        SubmitEvent::Submitted { key, job_id } => {
            println!("Starting OCR for {key}, Job ID: {job_id}");
        }
        SubmitEvent::Failed { key, reason } => {
            println!("Failed to start OCR for {key}");
            tracing::warn!(event = "submit_failed", key = %key, reason = %reason, "submission failed");
        }
    };

    let report = submit_pending(&ctx, &client, &scope, &options, &mut on_event).await?;
    tracing::info!(
        event = "start_finished",
        planned = report.planned.len(),
        submitted = report.submitted.len(),
        failed = report.failed.len(),
        "start pass finished"
    );
    Ok(())
}

async fn run_dedupe(cfg: &AppConfig, args: DedupeArgs, verbosity: u8) -> Result<(), AppError> {
    let (ctx, _) = build_context(cfg, &args.aws, &args.bucket).await?;
    let progress = (verbosity == 0).then(|| make_progress_bar(0, "markers"));

    let report = dedupe_markers(&ctx, args.dry_run, progress.as_ref()).await?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    if args.dry_run {
        println!("{}", report.plan_json()?);
    } else {
        println!("Wrote {} marker(s)", report.written.len());
    }
    Ok(())
}

async fn run_status(cfg: &AppConfig, args: StatusArgs) -> Result<(), AppError> {
    let (ctx, _) = build_context(cfg, &args.aws, &args.bucket).await?;
    let listing = load_listing(ctx.store(), &ctx.bucket, &ListingScope::Bucket).await?;
    let state = derive_state(&listing, &ctx.layout);
    println!("{}", StatusReport::from_state(&state));
    Ok(())
}

async fn run_inspect_job(cfg: &AppConfig, args: InspectJobArgs) -> Result<(), AppError> {
    let connection = resolve_connection(cfg, &args.aws).await?;
    let sdk_config = load_sdk_config(&connection).await;
    let client = TextractClient::from_sdk_config(&sdk_config, None);

    println!("{}", describe_job(&client, &args.job_id).await?);
    Ok(())
}

async fn run_fetch(cfg: &AppConfig, args: FetchArgs, verbosity: u8) -> Result<(), AppError> {
    let (ctx, _) = build_context(cfg, &args.aws, &args.bucket).await?;

    if let Some(target) = args.combine.as_deref() {
        let combined = combined_for_document(&ctx, &args.key).await?;
        let mut bytes = combined.to_json_bytes()?;
        if target == "-" {
            bytes.push(b'\n');
            io::stdout()
                .write_all(&bytes)
                .map_err(|source| AppError::Io {
                    path: "<stdout>".into(),
                    source,
                })?;
        } else {
            write_file(Path::new(target), &bytes).await?;
        }
        return Ok(());
    }

    let job_id = resolve_job_id(&ctx, &args.key).await?;
    let parts = list_output_parts(&ctx, &job_id).await?;
    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .map_err(|source| AppError::Io {
            path: args.output_dir.clone(),
            source,
        })?;

    let progress = (verbosity == 0).then(|| make_progress_bar(parts.len() as u64, "parts"));
    let written = download_parts(&ctx, &parts, &args.output_dir, progress.as_ref()).await?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    for path in written {
        println!("{}", path.display());
    }
    Ok(())
}

async fn run_text(cfg: &AppConfig, args: TextArgs) -> Result<(), AppError> {
    let (ctx, _) = build_context(cfg, &args.aws, &args.bucket).await?;
    let combined = combined_for_document(&ctx, &args.key).await?;
    print!("{}", render_text(&combined, args.divider));
    Ok(())
}

async fn run_index(cfg: &AppConfig, args: IndexArgs, verbosity: u8) -> Result<(), AppError> {
    let (ctx, _) = build_context(cfg, &args.aws, &args.bucket).await?;
    let mut index = PageIndex::open(&args.database)?;

    let report = build_index(&ctx, &mut index, verbosity == 0).await?;
    println!(
        "Indexed {} page(s) from {} job(s); {} marker(s) refreshed",
        report.pages_written,
        report.jobs_indexed.len(),
        report.markers_refreshed
    );
    if !report.orphans.is_empty() {
        println!("{} job(s) have output but no marker", report.orphans.len());
    }
    for (job_id, reason) in &report.failed {
        eprintln!("Failed to index job {job_id}: {reason}");
    }

    if report.is_complete() {
        Ok(())
    } else {
        Err(AppError::IndexIncomplete {
            failed: report.failed.len(),
        })
    }
}

fn run_search(args: SearchArgs) -> Result<(), AppError> {
    let index = PageIndex::open(&args.database)?;
    let hits = index.search(&args.query, args.limit)?;
    if hits.is_empty() {
        println!("No results");
        return Ok(());
    }
    for hit in hits {
        println!("{} (page {})", hit.path, hit.page);
        println!("    {}", hit.snippet);
    }
    Ok(())
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| AppError::Io {
            path: path.to_path_buf(),
            source,
        })
}
