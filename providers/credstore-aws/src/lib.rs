//! AWS wiring for credstore: the secret table lives in DynamoDB and data keys
//! come from KMS.

mod dynamo;
mod kms;

pub use dynamo::DynamoBackend;
pub use kms::KmsKeyProvider;

use anyhow::{Result, bail};
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_kms::Client as KmsClient;
use aws_types::SdkConfig;
use aws_types::region::Region;
use credstore_core::{KeyManagement, RecordBackend};
use std::env;
use tracing::debug;

const REGION_ENV: &str = "CREDSTORE_AWS_REGION";
const DYNAMODB_ENDPOINT_ENV: &str = "CREDSTORE_DYNAMODB_ENDPOINT";
const KMS_ENDPOINT_ENV: &str = "CREDSTORE_KMS_ENDPOINT";

/// Components returned for wiring into a [`credstore_core::Credstore`].
pub struct BackendComponents {
    pub backend: Box<dyn RecordBackend>,
    pub key_provider: Box<dyn KeyManagement>,
}

/// Build the DynamoDB backend and the KMS key provider from the environment
/// and the default AWS credential chain.
pub async fn build_backend() -> Result<BackendComponents> {
    build_backend_with(AwsProviderConfig::from_env()).await
}

/// Like [`build_backend`] with explicit overrides.
pub async fn build_backend_with(config: AwsProviderConfig) -> Result<BackendComponents> {
    config.validate()?;
    let shared_config = config.load_sdk_config().await;

    let dynamo_client = {
        let mut builder = aws_sdk_dynamodb::config::Builder::from(&shared_config);
        if let Some(endpoint) = config.dynamodb_endpoint.as_deref() {
            builder = builder.endpoint_url(endpoint);
        }
        DynamoClient::from_conf(builder.build())
    };

    let kms_client = {
        let mut builder = aws_sdk_kms::config::Builder::from(&shared_config);
        if let Some(endpoint) = config.kms_endpoint.as_deref() {
            builder = builder.endpoint_url(endpoint);
        }
        KmsClient::from_conf(builder.build())
    };

    debug!(
        region = ?shared_config.region(),
        dynamodb_endpoint = ?config.dynamodb_endpoint,
        kms_endpoint = ?config.kms_endpoint,
        "built aws clients"
    );

    Ok(BackendComponents {
        backend: Box::new(DynamoBackend::new(dynamo_client)),
        key_provider: Box::new(KmsKeyProvider::new(kms_client)),
    })
}

/// Overrides on top of the default AWS configuration chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsProviderConfig {
    pub region: Option<String>,
    pub dynamodb_endpoint: Option<String>,
    pub kms_endpoint: Option<String>,
}

impl AwsProviderConfig {
    /// Read `CREDSTORE_AWS_REGION`, `CREDSTORE_DYNAMODB_ENDPOINT` and
    /// `CREDSTORE_KMS_ENDPOINT`. Blank values are ignored.
    pub fn from_env() -> Self {
        Self {
            region: env_value(REGION_ENV),
            dynamodb_endpoint: env_value(DYNAMODB_ENDPOINT_ENV),
            kms_endpoint: env_value(KMS_ENDPOINT_ENV),
        }
    }

    /// Endpoint overrides must be absolute http(s) URLs.
    pub fn validate(&self) -> Result<()> {
        let endpoints = [
            (DYNAMODB_ENDPOINT_ENV, &self.dynamodb_endpoint),
            (KMS_ENDPOINT_ENV, &self.kms_endpoint),
        ];
        for (source, endpoint) in endpoints {
            if let Some(endpoint) = endpoint
                && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
            {
                bail!("{source} must be an http(s) URL, got `{endpoint}`");
            }
        }
        Ok(())
    }

    pub async fn load_sdk_config(&self) -> SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = self.region.clone() {
            loader = loader.region(Region::new(region));
        }
        loader.load().await
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}
