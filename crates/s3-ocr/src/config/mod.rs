//! Configuration loading and XDG path helpers.
//!
//! Sources, lowest precedence first: built-in defaults,
//! `$S3_OCR_ETC_CONFIG_DIR` (or `/etc`) `/s3-ocr/settings.toml`, the XDG
//! config dir `settings.toml`, `./config/settings.toml`, the file named by
//! `S3_OCR_CONFIG_FILE`, then `S3_OCR__SECTION__KEY` environment variables.

pub mod credentials;

use std::env;
use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::constants::{DEFAULT_DOCUMENT_EXTENSION, DEFAULT_OUTPUT_PREFIX, DEFAULT_SUBMIT_RETRIES};
use crate::pipeline::layout::OutputLayout;
use crate::pipeline::retry::RetryPolicy;

pub use credentials::{CredentialsError, StaticCredentials, parse_auth, read_auth_file};

const APP_NAME: &str = "s3-ocr";
const SETTINGS_FILE: &str = "settings.toml";
const LOCAL_CONFIG_FILE: &str = "config/settings";
const ETC_DIR_ENV: &str = "S3_OCR_ETC_CONFIG_DIR";
const CONFIG_FILE_ENV: &str = "S3_OCR_CONFIG_FILE";
const ENV_PREFIX: &str = "S3_OCR";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("unable to resolve project directories")]
    MissingProjectDirs,
    #[error(transparent)]
    Build(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub aws: AwsConfig,
    pub ocr: OcrConfig,
    pub submit: SubmitConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AwsConfig {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    pub output_prefix: String,
    pub document_extension: String,
}

impl OcrConfig {
    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(self.output_prefix.as_str(), self.document_extension.as_str())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubmitConfig {
    pub max_retries: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Client-side cap on submissions per second; zero disables it.
    pub requests_per_second: u32,
}

impl SubmitConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            min_delay: std::time::Duration::from_millis(self.min_delay_ms),
            max_delay: std::time::Duration::from_millis(self.max_delay_ms),
        }
    }
}

pub fn load() -> Result<AppConfig, AppConfigError> {
    let mut builder = Config::builder()
        .set_default("aws.force_path_style", false)?
        .set_default("ocr.output_prefix", DEFAULT_OUTPUT_PREFIX)?
        .set_default("ocr.document_extension", DEFAULT_DOCUMENT_EXTENSION)?
        .set_default("submit.max_retries", i64::from(DEFAULT_SUBMIT_RETRIES))?
        .set_default("submit.min_delay_ms", 1_000_i64)?
        .set_default("submit.max_delay_ms", 30_000_i64)?
        .set_default("submit.requests_per_second", 5_i64)?
        .add_source(File::from(etc_config_path()).required(false));

    if let Some(xdg) = xdg_config_path() {
        builder = builder.add_source(File::from(xdg).required(false));
    }
    builder = builder.add_source(File::with_name(LOCAL_CONFIG_FILE).required(false));
    if let Some(explicit) = env::var_os(CONFIG_FILE_ENV) {
        builder = builder.add_source(File::from(PathBuf::from(explicit)).required(false));
    }

    let cfg = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    Ok(cfg)
}

pub fn project_dirs() -> Result<ProjectDirs, AppConfigError> {
    ProjectDirs::from("", "", APP_NAME).ok_or(AppConfigError::MissingProjectDirs)
}

fn etc_config_path() -> PathBuf {
    let root = env::var_os(ETC_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc"));
    root.join(APP_NAME).join(SETTINGS_FILE)
}

fn xdg_config_path() -> Option<PathBuf> {
    project_dirs()
        .ok()
        .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
}
