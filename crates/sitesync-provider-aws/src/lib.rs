// # AWS Backends
//
// This crate provides the Amazon S3 object store and the Amazon CloudFront
// content delivery backends for sitesync.
//
// ## Behavior
//
// - One SDK request per trait call (container creation and distribution
//   deletion are single logical requests made of a few calls)
// - Full error propagation to the engine, classified into `BackendErrorKind`
// - NO retry logic (owned by the sitesync-core retry policy)
// - NO sleeping or polling (a distribution still deploying is reported as a
//   transient failure and retried by the engine)
// - NO caching of listings or configurations (state owned by `SiteState`)
// - The SDK's own retry layer is disabled so attempts are counted once
//
// ## Security Requirements
//
// - Credentials come from the default AWS provider chain only
// - Certificate ARNs NEVER appear in Debug output
//
// ## API Reference
//
// - S3: CreateBucket, PutBucketOwnershipControls, PutPublicAccessBlock,
//   PutBucketWebsite, ListObjectsV2, PutObject, DeleteObject, DeleteBucket
// - CloudFront: CreateDistribution, GetDistributionConfig, UpdateDistribution,
//   GetDistribution, DeleteDistribution, CreateInvalidation

mod cloudfront;
mod error;
mod s3;

pub use cloudfront::CloudFrontCdn;
pub use s3::{CONTENT_DIGEST_METADATA, S3ObjectStore};

use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use sitesync_core::{BackendConfig, Error, Result};

/// S3 store and CloudFront CDN sharing one SDK configuration
#[derive(Debug)]
pub struct AwsBackends {
    /// Object storage
    pub store: S3ObjectStore,
    /// Content delivery
    pub cdn: CloudFrontCdn,
}

/// Load AWS configuration and build both backends
///
/// The region falls back to the default provider chain (environment,
/// profile, instance metadata). An endpoint override switches S3 to
/// path-style addressing for S3-compatible stores.
///
/// # Errors
///
/// Returns a configuration error for non-AWS backend configs and when no
/// region can be resolved.
pub async fn connect(config: &BackendConfig) -> Result<AwsBackends> {
    let BackendConfig::Aws {
        region,
        endpoint_url,
        certificate_arn,
    } = config
    else {
        return Err(Error::config(format!(
            "Expected an aws backend, got: {}",
            config.type_name()
        )));
    };
    config.validate()?;

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).retry_config(RetryConfig::disabled());
    if let Some(region) = region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(url) = endpoint_url {
        loader = loader.endpoint_url(url);
    }
    let sdk_config = loader.load().await;

    let region = sdk_config
        .region()
        .map(|r| r.to_string())
        .ok_or_else(|| Error::config("No AWS region configured (set SITESYNC_AWS_REGION or AWS_REGION)"))?;

    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();
    let store = S3ObjectStore::new(aws_sdk_s3::Client::from_conf(s3_config), region.clone());
    let cdn = CloudFrontCdn::new(aws_sdk_cloudfront::Client::new(&sdk_config), certificate_arn.clone());

    tracing::debug!("AWS backends ready in {}", region);
    Ok(AwsBackends { store, cdn })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_config_is_rejected() {
        let err = tokio_test::block_on(connect(&BackendConfig::Memory)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn invalid_endpoint_is_rejected_before_loading() {
        let config = BackendConfig::Aws {
            region: Some("eu-west-1".to_string()),
            endpoint_url: Some("ftp://localhost".to_string()),
            certificate_arn: None,
        };
        let err = tokio_test::block_on(connect(&config)).unwrap_err();
        assert!(err.to_string().contains("HTTP or HTTPS"));
    }

    #[tokio::test]
    async fn explicit_region_drives_website_endpoint() {
        let config = BackendConfig::Aws {
            region: Some("ap-southeast-2".to_string()),
            endpoint_url: None,
            certificate_arn: None,
        };
        let backends = connect(&config).await.unwrap();

        assert_eq!(backends.store.region(), "ap-southeast-2");
        assert_eq!(
            sitesync_core::ObjectStore::website_endpoint(&backends.store, "site"),
            "http://site.s3-website-ap-southeast-2.amazonaws.com"
        );
    }
}
