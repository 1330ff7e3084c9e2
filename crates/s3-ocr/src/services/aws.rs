use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::config::Credentials;

use crate::config::{AwsConfig, StaticCredentials};

const CREDENTIALS_PROVIDER_NAME: &str = "s3-ocr-static";

/// Resolved connection settings for S3 and Textract clients.
#[derive(Debug, Clone, Default)]
pub struct AwsConnection {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    /// Explicit credentials; the default provider chain is used when `None`.
    pub credentials: Option<StaticCredentials>,
}

impl AwsConnection {
    pub fn from_config(cfg: &AwsConfig) -> Self {
        Self {
            region: cfg.region.clone(),
            endpoint_url: cfg.endpoint_url.clone(),
            force_path_style: cfg.force_path_style,
            credentials: None,
        }
    }
}

pub async fn load_sdk_config(connection: &AwsConnection) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &connection.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(endpoint) = &connection.endpoint_url {
        loader = loader.endpoint_url(endpoint.as_str());
    }
    if let Some(creds) = &connection.credentials {
        loader = loader.credentials_provider(Credentials::new(
            creds.access_key_id.as_str(),
            creds.secret_access_key.as_str(),
            creds.session_token.clone(),
            None,
            CREDENTIALS_PROVIDER_NAME,
        ));
    }
    let sdk_config = loader.load().await;
    tracing::debug!(
        region = ?sdk_config.region(),
        endpoint = ?connection.endpoint_url,
        static_credentials = connection.credentials.is_some(),
        "loaded AWS configuration"
    );
    sdk_config
}
