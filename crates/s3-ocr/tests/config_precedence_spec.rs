use std::{
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use clap::Parser;
use s3_ocr::cli::{Cli, Commands, StartArgs};
use s3_ocr::config::{self, AppConfig};
use s3_ocr::pipeline::RetryPolicy;
use s3_ocr::services::build_limiter;
use tempfile::TempDir;

const VARS: [&str; 9] = [
    "HOME",
    "XDG_CONFIG_HOME",
    "S3_OCR_ETC_CONFIG_DIR",
    "S3_OCR_CONFIG_FILE",
    "S3_OCR__OCR__OUTPUT_PREFIX",
    "S3_OCR__OCR__DOCUMENT_EXTENSION",
    "S3_OCR__SUBMIT__MAX_RETRIES",
    "S3_OCR__SUBMIT__MIN_DELAY_MS",
    "S3_OCR__SUBMIT__REQUESTS_PER_SECOND",
];

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Isolated process environment: empty config roots, a scratch working
/// directory and no `S3_OCR*` variables. Restores everything on drop.
struct Sandbox {
    _guard: MutexGuard<'static, ()>,
    saved: Vec<(&'static str, Option<OsString>)>,
    original_dir: PathBuf,
    root: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let saved = VARS.iter().map(|&name| (name, env::var_os(name))).collect();
        let original_dir = env::current_dir().expect("current dir");
        let root = TempDir::new().expect("sandbox dir");

        for name in VARS {
            remove_var(name);
        }
        set_var("HOME", root.path());
        set_var("XDG_CONFIG_HOME", root.path().join("xdg"));
        set_var("S3_OCR_ETC_CONFIG_DIR", root.path().join("etc"));
        env::set_current_dir(root.path()).expect("enter sandbox");

        Self {
            _guard: guard,
            saved,
            original_dir,
            root,
        }
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn load(&self) -> AppConfig {
        config::load().expect("load config")
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        let _ = env::set_current_dir(&self.original_dir);
        for (name, value) in self.saved.drain(..) {
            match value {
                Some(value) => set_var(name, value),
                None => remove_var(name),
            }
        }
    }
}

fn set_var(name: &str, value: impl AsRef<std::ffi::OsStr>) {
    unsafe { env::set_var(name, value) }
}

fn remove_var(name: &str) {
    unsafe { env::remove_var(name) }
}

fn start_args(argv: &[&str]) -> StartArgs {
    match Cli::try_parse_from(argv).expect("valid start arguments").command {
        Commands::Start(args) => args,
        other => panic!("expected start, got {other:?}"),
    }
}

#[test]
fn defaults_produce_standard_layout_and_policy() {
    let sandbox = Sandbox::new();
    let cfg = sandbox.load();

    let layout = cfg.ocr.layout();
    assert_eq!(layout.output_prefix(), "textract-output");
    assert!(layout.is_document("scans/a.pdf"));
    assert_eq!(cfg.submit.retry_policy(), RetryPolicy::default());
    assert!(build_limiter(cfg.submit.requests_per_second).is_some());
    assert_eq!(cfg.aws.region, None);
    assert!(!cfg.aws.force_path_style);
}

#[test]
fn submit_numbers_are_parsed_from_environment() {
    let sandbox = Sandbox::new();
    set_var("S3_OCR__SUBMIT__MAX_RETRIES", "5");
    set_var("S3_OCR__SUBMIT__MIN_DELAY_MS", "250");
    set_var("S3_OCR__SUBMIT__REQUESTS_PER_SECOND", "0");

    let cfg = sandbox.load();
    let policy = cfg.submit.retry_policy();
    assert_eq!(policy.max_retries, 5);
    assert_eq!(policy.min_delay, Duration::from_millis(250));
    assert_eq!(policy.max_delay, Duration::from_secs(30));
    assert!(build_limiter(cfg.submit.requests_per_second).is_none());
}

#[test]
fn trailing_slash_in_output_prefix_is_normalized() {
    let sandbox = Sandbox::new();
    let explicit = sandbox.path().join("s3-ocr.toml");
    fs::write(
        &explicit,
        "[ocr]\noutput_prefix = \"ocr-results/\"\ndocument_extension = \".PDF\"\n\n[aws]\nforce_path_style = true\n",
    )
    .expect("write explicit config");
    set_var("S3_OCR_CONFIG_FILE", &explicit);

    let cfg = sandbox.load();
    let layout = cfg.ocr.layout();
    assert_eq!(layout.output_prefix(), "ocr-results");
    assert_eq!(layout.job_prefix("J1"), "ocr-results/J1/");
    assert_eq!(layout.job_id_of("ocr-results/J1/1"), Some("J1"));
    assert!(layout.is_document("SCAN.PDF"));
    assert!(!layout.is_document("scan.pdf"));
    assert!(cfg.aws.force_path_style);

    set_var("S3_OCR__OCR__OUTPUT_PREFIX", "/env-results/");
    assert_eq!(sandbox.load().ocr.layout().output_prefix(), "env-results");
}

#[test]
fn command_line_retry_flags_win_over_configuration() {
    let sandbox = Sandbox::new();
    set_var("S3_OCR__SUBMIT__MAX_RETRIES", "8");
    set_var("S3_OCR__SUBMIT__MIN_DELAY_MS", "40");
    let configured = sandbox.load().submit.retry_policy();

    let inherited = start_args(&["s3-ocr", "start", "bucket", "--all"]).retry_policy(configured);
    assert_eq!(inherited.max_retries, 8);

    let overridden =
        start_args(&["s3-ocr", "start", "bucket", "--all", "--retries", "1"]).retry_policy(configured);
    assert_eq!(overridden.max_retries, 1);
    assert_eq!(overridden.min_delay, Duration::from_millis(40));

    let disabled =
        start_args(&["s3-ocr", "start", "bucket", "--prefix", "2024/", "--no-retry"]).retry_policy(configured);
    assert_eq!(disabled, RetryPolicy::disabled());
}
