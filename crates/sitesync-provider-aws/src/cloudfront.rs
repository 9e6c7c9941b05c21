// Amazon CloudFront content delivery
//
// Distributions use the bucket's website endpoint as a custom origin (HTTP
// only, as S3 website endpoints do not serve TLS) with the managed
// CachingOptimized policy. Updates and deletes go through the ETag of the
// current configuration.
//
// Deleting an enabled distribution takes two phases: the first call disables
// it and reports a transient error, later calls fail transiently until the
// change is deployed, then the distribution is removed. The engine's retry
// policy drives the waiting.

use async_trait::async_trait;
use aws_sdk_cloudfront::Client;
use aws_sdk_cloudfront::types::{
    Aliases, CustomErrorResponse, CustomErrorResponses, CustomOriginConfig, DefaultCacheBehavior,
    DistributionConfig, InvalidationBatch, MinimumProtocolVersion, Origin, OriginProtocolPolicy,
    Origins, Paths, SslSupportMethod, ViewerCertificate, ViewerProtocolPolicy,
};
use sitesync_core::traits::{ContentDelivery, DistributionInfo, DistributionSpec};
use sitesync_core::{BackendErrorKind, Error, Result};
use std::fmt;

use crate::error::{build_error, sdk_error};

const BACKEND: &str = "cloudfront";

/// Managed cache policy "CachingOptimized"
const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";

/// Identifier of the single origin inside a distribution
const ORIGIN_ID: &str = "website";

/// Status reported once a configuration change has propagated
const DEPLOYED: &str = "Deployed";

/// Seconds an error response stays cached
const ERROR_CACHING_MIN_TTL: i64 = 10;

/// CloudFront-backed content delivery
pub struct CloudFrontCdn {
    client: Client,
    certificate_arn: Option<String>,
}

impl CloudFrontCdn {
    /// Wrap an existing client
    ///
    /// `certificate_arn` names an externally issued certificate used when a
    /// distribution declares a custom domain.
    pub fn new(client: Client, certificate_arn: Option<String>) -> Self {
        Self {
            client,
            certificate_arn,
        }
    }

    /// Build the full distribution configuration for a spec
    fn distribution_config(&self, spec: &DistributionSpec, caller_reference: &str) -> Result<DistributionConfig> {
        build_distribution_config(spec, caller_reference, self.certificate_arn.as_deref())
    }

    /// Fetch the current configuration and its ETag
    async fn current_config(&self, id: &str) -> Result<(DistributionConfig, String)> {
        let output = self
            .client
            .get_distribution_config()
            .id(id)
            .send()
            .await
            .map_err(|e| sdk_error(BACKEND, "GetDistributionConfig", e))?;

        let etag = output
            .e_tag()
            .ok_or_else(|| malformed("ETag"))?
            .to_string();
        let config = output
            .distribution_config()
            .cloned()
            .ok_or_else(|| malformed("configuration"))?;

        Ok((config, etag))
    }
}

impl fmt::Debug for CloudFrontCdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudFrontCdn")
            .field("certificate_arn", &self.certificate_arn.as_ref().map(|_| "<REDACTED>"))
            .finish_non_exhaustive()
    }
}

fn malformed(missing: &str) -> Error {
    Error::backend(
        BACKEND,
        BackendErrorKind::Rejected,
        format!("response carries no {}", missing),
    )
}

fn build_distribution_config(
    spec: &DistributionSpec,
    caller_reference: &str,
    certificate_arn: Option<&str>,
) -> Result<DistributionConfig> {
    let origin = Origin::builder()
        .id(ORIGIN_ID)
        .domain_name(&spec.origin_domain)
        .custom_origin_config(
            CustomOriginConfig::builder()
                .http_port(80)
                .https_port(443)
                .origin_protocol_policy(OriginProtocolPolicy::HttpOnly)
                .build()
                .map_err(|e| build_error("origin config", e))?,
        )
        .build()
        .map_err(|e| build_error("origin", e))?;

    let origins = Origins::builder()
        .quantity(1)
        .items(origin)
        .build()
        .map_err(|e| build_error("origins", e))?;

    let cache_behavior = DefaultCacheBehavior::builder()
        .target_origin_id(ORIGIN_ID)
        .viewer_protocol_policy(ViewerProtocolPolicy::RedirectToHttps)
        .cache_policy_id(CACHING_OPTIMIZED_POLICY_ID)
        .compress(true)
        .build()
        .map_err(|e| build_error("cache behavior", e))?;

    let aliases: Vec<String> = spec.custom_domain.iter().cloned().collect();
    let aliases = Aliases::builder()
        .quantity(aliases.len() as i32)
        .set_items(if aliases.is_empty() { None } else { Some(aliases) })
        .build()
        .map_err(|e| build_error("aliases", e))?;

    let error_responses = match spec.error_document {
        Some(ref document) => {
            let response = CustomErrorResponse::builder()
                .error_code(404)
                .response_page_path(format!("/{}", document))
                .response_code("404")
                .error_caching_min_ttl(ERROR_CACHING_MIN_TTL)
                .build()
                .map_err(|e| build_error("error response", e))?;
            CustomErrorResponses::builder().quantity(1).items(response)
        }
        None => CustomErrorResponses::builder().quantity(0),
    }
    .build()
    .map_err(|e| build_error("error responses", e))?;

    // Aliases need a certificate covering them; without one the default
    // certificate is used and CloudFront rejects the alias
    let certificate = match (spec.custom_domain.as_ref(), certificate_arn) {
        (Some(_), Some(arn)) => ViewerCertificate::builder()
            .acm_certificate_arn(arn)
            .ssl_support_method(SslSupportMethod::SniOnly)
            .minimum_protocol_version(MinimumProtocolVersion::from("TLSv1.2_2021"))
            .build(),
        _ => ViewerCertificate::builder()
            .cloud_front_default_certificate(true)
            .build(),
    };

    DistributionConfig::builder()
        .caller_reference(caller_reference)
        .comment(format!("sitesync: {}", spec.origin_domain))
        .enabled(true)
        .origins(origins)
        .default_cache_behavior(cache_behavior)
        .default_root_object(&spec.index_document)
        .aliases(aliases)
        .custom_error_responses(error_responses)
        .viewer_certificate(certificate)
        .build()
        .map_err(|e| build_error("distribution config", e))
}

#[async_trait]
impl ContentDelivery for CloudFrontCdn {
    async fn create_distribution(&self, spec: &DistributionSpec) -> Result<DistributionInfo> {
        let config = self.distribution_config(spec, &spec.caller_reference)?;

        let output = self
            .client
            .create_distribution()
            .distribution_config(config)
            .send()
            .await
            .map_err(|e| sdk_error(BACKEND, "CreateDistribution", e))?;

        let distribution = output.distribution().ok_or_else(|| malformed("distribution"))?;

        tracing::debug!("Created distribution {}", distribution.id());
        Ok(DistributionInfo {
            id: distribution.id().to_string(),
            domain_name: distribution.domain_name().to_string(),
        })
    }

    async fn update_distribution(&self, id: &str, spec: &DistributionSpec) -> Result<DistributionInfo> {
        let (current, etag) = self.current_config(id).await?;
        // The caller reference of an existing distribution is immutable
        let config = self.distribution_config(spec, current.caller_reference())?;

        let output = self
            .client
            .update_distribution()
            .id(id)
            .if_match(etag)
            .distribution_config(config)
            .send()
            .await
            .map_err(|e| sdk_error(BACKEND, "UpdateDistribution", e))?;

        let distribution = output.distribution().ok_or_else(|| malformed("distribution"))?;

        Ok(DistributionInfo {
            id: distribution.id().to_string(),
            domain_name: distribution.domain_name().to_string(),
        })
    }

    async fn create_invalidation(&self, id: &str, paths: &[String]) -> Result<String> {
        let paths = Paths::builder()
            .quantity(paths.len() as i32)
            .set_items(Some(paths.to_vec()))
            .build()
            .map_err(|e| build_error("invalidation paths", e))?;
        let batch = InvalidationBatch::builder()
            .paths(paths)
            .caller_reference(format!("sitesync-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S%.6f")))
            .build()
            .map_err(|e| build_error("invalidation batch", e))?;

        let output = self
            .client
            .create_invalidation()
            .distribution_id(id)
            .invalidation_batch(batch)
            .send()
            .await
            .map_err(|e| sdk_error(BACKEND, "CreateInvalidation", e))?;

        output
            .invalidation()
            .map(|invalidation| invalidation.id().to_string())
            .ok_or_else(|| malformed("invalidation"))
    }

    async fn delete_distribution(&self, id: &str) -> Result<()> {
        let (config, etag) = self.current_config(id).await?;

        if config.enabled() {
            let mut disabled = config;
            disabled.enabled = false;

            self.client
                .update_distribution()
                .id(id)
                .if_match(etag)
                .distribution_config(disabled)
                .send()
                .await
                .map_err(|e| sdk_error(BACKEND, "UpdateDistribution", e))?;

            tracing::info!("Disabled distribution {}, waiting for deployment", id);
            return Err(Error::transient(
                BACKEND,
                format!("distribution {} disabled, deletion pending deployment", id),
            ));
        }

        let output = self
            .client
            .get_distribution()
            .id(id)
            .send()
            .await
            .map_err(|e| sdk_error(BACKEND, "GetDistribution", e))?;
        let status = output.distribution().map(|d| d.status()).unwrap_or_default();
        if status != DEPLOYED {
            return Err(Error::transient(
                BACKEND,
                format!("distribution {} is {}, deletion pending deployment", id, status),
            ));
        }

        self.client
            .delete_distribution()
            .id(id)
            .if_match(etag)
            .send()
            .await
            .map_err(|e| sdk_error(BACKEND, "DeleteDistribution", e))?;

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
