//! Static AWS credentials read from `--auth` files.

use std::fmt;
use std::path::Path;

use config::{Config, File, FileFormat, Map, Value};
use serde::Deserialize;
use thiserror::Error;

const INI_ACCESS_KEY: &str = "aws_access_key_id";
const INI_SECRET_KEY: &str = "aws_secret_access_key";
const INI_SESSION_TOKEN: &str = "aws_session_token";

#[derive(Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("failed to read auth file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON auth file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid INI auth file {path}: {source}")]
    Ini {
        path: String,
        #[source]
        source: config::ConfigError,
    },
    #[error("no section with {INI_ACCESS_KEY} in auth file {path}")]
    MissingSection { path: String },
    #[error("auth file {path} is missing {field}")]
    MissingField { path: String, field: &'static str },
}

#[derive(Deserialize)]
struct JsonAuth {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "SessionToken", default)]
    session_token: Option<String>,
}

pub async fn read_auth_file(path: &Path) -> Result<StaticCredentials, CredentialsError> {
    let display = path.display().to_string();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CredentialsError::Read {
            path: display.clone(),
            source,
        })?;
    parse_auth(&content, &display)
}

/// Parse JSON (`AccessKeyId`, `SecretAccessKey`, `SessionToken`) or INI
/// credentials. For INI the first section holding `aws_access_key_id` wins.
pub fn parse_auth(content: &str, path: &str) -> Result<StaticCredentials, CredentialsError> {
    if content.trim_start().starts_with('{') {
        let auth: JsonAuth =
            serde_json::from_str(content).map_err(|source| CredentialsError::Json {
                path: path.to_string(),
                source,
            })?;
        return Ok(StaticCredentials {
            access_key_id: auth.access_key_id,
            secret_access_key: auth.secret_access_key,
            session_token: auth.session_token,
        });
    }
    parse_ini(content, path)
}

fn parse_ini(content: &str, path: &str) -> Result<StaticCredentials, CredentialsError> {
    let ini_error = |source: config::ConfigError| CredentialsError::Ini {
        path: path.to_string(),
        source,
    };
    let sections: Map<String, Value> = Config::builder()
        .add_source(File::from_str(content, FileFormat::Ini))
        .build()
        .map_err(ini_error)?
        .try_deserialize()
        .map_err(ini_error)?;

    for (_, section) in sections {
        let Ok(table) = section.into_table() else {
            continue;
        };
        let Some(access_key_id) = lookup(&table, INI_ACCESS_KEY) else {
            continue;
        };
        let secret_access_key =
            lookup(&table, INI_SECRET_KEY).ok_or_else(|| CredentialsError::MissingField {
                path: path.to_string(),
                field: INI_SECRET_KEY,
            })?;
        return Ok(StaticCredentials {
            access_key_id,
            secret_access_key,
            session_token: lookup(&table, INI_SESSION_TOKEN),
        });
    }
    Err(CredentialsError::MissingSection {
        path: path.to_string(),
    })
}

fn lookup(table: &Map<String, Value>, key: &str) -> Option<String> {
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .and_then(|(_, value)| value.clone().into_string().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_credentials() {
        let creds = parse_auth(
            r#"{"AccessKeyId": "AKIA1", "SecretAccessKey": "s3cret", "SessionToken": "tok"}"#,
            "auth.json",
        )
        .unwrap();
        assert_eq!(creds.access_key_id, "AKIA1");
        assert_eq!(creds.secret_access_key, "s3cret");
        assert_eq!(creds.session_token.as_deref(), Some("tok"));
    }

    #[test]
    fn ini_credentials_use_first_matching_section() {
        let content = "[other]\nregion = us-east-1\n\n[default]\naws_access_key_id = AKIA2\naws_secret_access_key = hidden\n\n[second]\naws_access_key_id = AKIA3\naws_secret_access_key = x\n";
        let creds = parse_auth(content, "credentials").unwrap();
        assert_eq!(creds.access_key_id, "AKIA2");
        assert_eq!(creds.secret_access_key, "hidden");
        assert_eq!(creds.session_token, None);
    }

    #[test]
    fn ini_without_keys_is_rejected() {
        let err = parse_auth("[default]\nregion = eu-west-1\n", "credentials").unwrap_err();
        assert!(matches!(err, CredentialsError::MissingSection { .. }));
    }

    #[tokio::test]
    async fn auth_file_is_read_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("credentials.ini");
        tokio::fs::write(&path, "[work]\naws_access_key_id = AKIA9\naws_secret_access_key = k\naws_session_token = t\n")
            .await
            .unwrap();
        let creds = read_auth_file(&path).await.unwrap();
        assert_eq!(creds.access_key_id, "AKIA9");
        assert_eq!(creds.session_token.as_deref(), Some("t"));

        let missing = read_auth_file(&dir.path().join("absent.json")).await.unwrap_err();
        assert!(matches!(missing, CredentialsError::Read { .. }));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = StaticCredentials {
            access_key_id: "AKIA".into(),
            secret_access_key: "topsecret".into(),
            session_token: Some("token".into()),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("AKIA"));
    }
}
