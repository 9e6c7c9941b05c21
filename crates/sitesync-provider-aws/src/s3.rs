// Amazon S3 object store
//
// One SDK request per trait call, except container creation which applies
// the ownership and public-access settings public website hosting needs.
// Listings report ETags only: S3 does not return user metadata in
// ListObjectsV2, so `content_hash` is always `None` and the diff engine falls
// back to the hashes recorded in `SiteState`.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, ErrorDocument, IndexDocument,
    ObjectCannedAcl, ObjectOwnership, OwnershipControls, OwnershipControlsRule,
    PublicAccessBlockConfiguration, WebsiteConfiguration,
};
use sitesync_core::traits::{ObjectPage, ObjectStore, ObjectUpload, RemoteObjectEntry, WebsiteSettings};
use sitesync_core::{Error, Result};
use std::fmt;

use crate::error::{build_error, sdk_error};

const BACKEND: &str = "s3";

/// Object metadata key holding the BLAKE3 digest of the body
pub const CONTENT_DIGEST_METADATA: &str = "content-digest";

/// Region whose buckets take no location constraint
const DEFAULT_REGION: &str = "us-east-1";

/// Regions whose website endpoints join `s3-website` and the region with a
/// dash; every other region uses a dot
const DASH_WEBSITE_REGIONS: &[&str] = &[
    "us-east-1",
    "us-west-1",
    "us-west-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
    "eu-west-1",
    "sa-east-1",
    "us-gov-west-1",
];

/// S3-backed object store
pub struct S3ObjectStore {
    client: Client,
    region: String,
}

impl S3ObjectStore {
    /// Wrap an existing client
    ///
    /// `region` decides the bucket location constraint and the website
    /// endpoint host.
    pub fn new(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }

    /// Region of the buckets this store manages
    pub fn region(&self) -> &str {
        &self.region
    }
}

impl fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Website endpoint host for a bucket in a region
fn website_host(container: &str, region: &str) -> String {
    let separator = if DASH_WEBSITE_REGIONS.contains(&region) { '-' } else { '.' };
    format!("{}.s3-website{}{}.amazonaws.com", container, separator, region)
}

/// Strip the quotes S3 puts around ETags
fn unquote_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

fn website_configuration(settings: &WebsiteSettings) -> Result<WebsiteConfiguration> {
    let index = IndexDocument::builder()
        .suffix(&settings.index_document)
        .build()
        .map_err(|e| build_error("index document", e))?;

    let error = settings
        .error_document
        .as_ref()
        .map(|key| {
            ErrorDocument::builder()
                .key(key)
                .build()
                .map_err(|e| build_error("error document", e))
        })
        .transpose()?;

    Ok(WebsiteConfiguration::builder()
        .index_document(index)
        .set_error_document(error)
        .build())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    /// Create the bucket, allow object ACLs and lift the public-access block
    ///
    /// A bucket already owned by the caller counts as created.
    async fn create_container(&self, container: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(container);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => tracing::debug!("Created bucket {}", container),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|service| service.is_bucket_already_owned_by_you()) =>
            {
                tracing::debug!("Bucket {} already owned", container);
            }
            Err(e) => return Err(sdk_error(BACKEND, "CreateBucket", e)),
        }

        let rule = OwnershipControlsRule::builder()
            .object_ownership(ObjectOwnership::ObjectWriter)
            .build()
            .map_err(|e| build_error("ownership rule", e))?;
        let controls = OwnershipControls::builder()
            .rules(rule)
            .build()
            .map_err(|e| build_error("ownership controls", e))?;

        self.client
            .put_bucket_ownership_controls()
            .bucket(container)
            .ownership_controls(controls)
            .send()
            .await
            .map_err(|e| sdk_error(BACKEND, "PutBucketOwnershipControls", e))?;

        self.client
            .put_public_access_block()
            .bucket(container)
            .public_access_block_configuration(
                PublicAccessBlockConfiguration::builder()
                    .block_public_acls(false)
                    .ignore_public_acls(false)
                    .block_public_policy(false)
                    .restrict_public_buckets(false)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error(BACKEND, "PutPublicAccessBlock", e))?;

        Ok(())
    }

    async fn configure_website(&self, container: &str, settings: &WebsiteSettings) -> Result<()> {
        self.client
            .put_bucket_website()
            .bucket(container)
            .website_configuration(website_configuration(settings)?)
            .send()
            .await
            .map_err(|e| sdk_error(BACKEND, "PutBucketWebsite", e))?;

        tracing::debug!(
            "Website hosting on {} serves {}",
            container,
            settings.index_document
        );
        Ok(())
    }

    async fn list_objects(&self, container: &str, continuation: Option<&str>) -> Result<ObjectPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(container)
            .set_continuation_token(continuation.map(str::to_string))
            .send()
            .await
            .map_err(|e| sdk_error(BACKEND, "ListObjectsV2", e))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                object.key().map(|key| RemoteObjectEntry {
                    key: key.to_string(),
                    content_hash: None,
                    etag: object.e_tag().map(unquote_etag).unwrap_or_default(),
                })
            })
            .collect();

        let next_continuation = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ObjectPage {
            objects,
            next_continuation,
        })
    }

    async fn put_object(&self, container: &str, upload: &ObjectUpload) -> Result<()> {
        let body = ByteStream::from_path(&upload.source_path)
            .await
            .map_err(|e| Error::io(upload.source_path.clone(), std::io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(container)
            .key(&upload.key)
            .body(body)
            .acl(ObjectCannedAcl::PublicRead)
            .content_type(&upload.content_type)
            .cache_control(&upload.cache_control)
            .metadata(CONTENT_DIGEST_METADATA, upload.content_hash.to_hex())
            .send()
            .await
            .map_err(|e| sdk_error(BACKEND, "PutObject", e))?;

        Ok(())
    }

    async fn delete_object(&self, container: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(BACKEND, "DeleteObject", e))?;
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> Result<()> {
        self.client
            .delete_bucket()
            .bucket(container)
            .send()
            .await
            .map_err(|e| sdk_error(BACKEND, "DeleteBucket", e))?;
        Ok(())
    }

    fn website_endpoint(&self, container: &str) -> String {
        format!("http://{}", website_host(container, &self.region))
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
