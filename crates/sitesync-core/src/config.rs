//! Configuration types for the reconciliation engine
//!
//! This module defines the declared resource inputs ([`DesiredSite`]) and the
//! engine settings that shape a reconciliation ([`ProviderSettings`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::retry::RetryPolicy;
use crate::traits::WebsiteSettings;

/// Declared inputs of a static website resource
///
/// Deserializes from the camelCase input schema supplied by the host:
/// `staticDirectory`, `indexDocument`, `errorDocument`, `customDomain`,
/// `bucketName`, `includedFiles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredSite {
    /// Local directory holding the site content
    pub static_directory: PathBuf,

    /// Document served for directory requests
    #[serde(default = "default_index_document")]
    pub index_document: String,

    /// Document served for missing keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_document: Option<String>,

    /// Domain attached to the distribution as an alias
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_domain: Option<String>,

    /// Storage container name (generated when absent)
    ///
    /// A declared container may already exist. Creating into it never
    /// deletes objects it already holds; later updates delete remote keys
    /// absent locally unless the prune scope is [`PruneScope::Tracked`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,

    /// Glob patterns selecting the files to publish
    #[serde(default = "default_included_files")]
    pub included_files: Vec<String>,
}

impl DesiredSite {
    /// Create inputs for a directory with default settings
    pub fn new(static_directory: impl Into<PathBuf>) -> Self {
        Self {
            static_directory: static_directory.into(),
            index_document: default_index_document(),
            error_document: None,
            custom_domain: None,
            bucket_name: None,
            included_files: default_included_files(),
        }
    }

    /// Set the index document
    pub fn with_index_document(mut self, index_document: impl Into<String>) -> Self {
        self.index_document = index_document.into();
        self
    }

    /// Set the error document
    pub fn with_error_document(mut self, error_document: impl Into<String>) -> Self {
        self.error_document = Some(error_document.into());
        self
    }

    /// Set the custom domain
    pub fn with_custom_domain(mut self, domain: impl Into<String>) -> Self {
        self.custom_domain = Some(domain.into());
        self
    }

    /// Set an explicit bucket name
    pub fn with_bucket_name(mut self, bucket_name: impl Into<String>) -> Self {
        self.bucket_name = Some(bucket_name.into());
        self
    }

    /// Replace the included file patterns
    pub fn with_included_files<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.included_files = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Website hosting settings derived from these inputs
    pub fn website_settings(&self) -> WebsiteSettings {
        WebsiteSettings {
            index_document: self.index_document.clone(),
            error_document: self.error_document.clone(),
        }
    }

    /// Validate the inputs
    ///
    /// Checks that the source directory exists, that document names are
    /// plain relative keys, and that the domain, bucket name and glob
    /// patterns are well formed.
    pub fn validate(&self) -> Result<(), crate::Error> {
        let dir = &self.static_directory;
        if dir.as_os_str().is_empty() {
            return Err(crate::Error::config("staticDirectory cannot be empty"));
        }
        if !dir.is_dir() {
            return Err(crate::Error::config(format!(
                "staticDirectory does not exist or is not a directory: {}",
                dir.display()
            )));
        }

        validate_document_key("indexDocument", &self.index_document)?;
        if let Some(ref error_document) = self.error_document {
            validate_document_key("errorDocument", error_document)?;
        }

        if let Some(ref domain) = self.custom_domain {
            validate_domain_name(domain)?;
        }

        if let Some(ref bucket) = self.bucket_name {
            validate_bucket_name(bucket)?;
        }

        if self.included_files.is_empty() {
            return Err(crate::Error::config(
                "includedFiles must contain at least one pattern",
            ));
        }
        for pattern in &self.included_files {
            glob::Pattern::new(pattern).map_err(|e| {
                crate::Error::config(format!("Invalid includedFiles pattern '{}': {}", pattern, e))
            })?;
        }

        Ok(())
    }
}

fn default_index_document() -> String {
    "index.html".to_string()
}

fn default_included_files() -> Vec<String> {
    vec!["**".to_string()]
}

fn validate_document_key(field: &str, key: &str) -> Result<(), crate::Error> {
    if key.is_empty() {
        return Err(crate::Error::config(format!("{} cannot be empty", field)));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(crate::Error::config(format!(
            "{} must be a relative key using forward slashes: '{}'",
            field, key
        )));
    }
    if key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return Err(crate::Error::config(format!(
            "{} contains an empty or relative path segment: '{}'",
            field, key
        )));
    }
    Ok(())
}

/// Basic DNS domain name validation (RFC 1035 lengths, LDH labels)
fn validate_domain_name(domain: &str) -> Result<(), crate::Error> {
    if domain.is_empty() {
        return Err(crate::Error::config("customDomain cannot be empty"));
    }

    if domain.len() > 253 {
        return Err(crate::Error::config(format!(
            "customDomain too long: {} chars (max 253)",
            domain.len()
        )));
    }

    if !domain.contains('.') {
        return Err(crate::Error::config(format!(
            "customDomain must be fully qualified: '{}'",
            domain
        )));
    }

    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(crate::Error::config(format!(
                "customDomain has an invalid label: '{}'",
                domain
            )));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(crate::Error::config(format!(
                "customDomain label contains invalid characters: '{}'",
                label
            )));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(crate::Error::config(format!(
                "customDomain label cannot start or end with hyphen: '{}'",
                label
            )));
        }
    }

    Ok(())
}

/// Bucket naming rules shared by the supported object stores
fn validate_bucket_name(name: &str) -> Result<(), crate::Error> {
    if !(3..=63).contains(&name.len()) {
        return Err(crate::Error::config(format!(
            "bucketName must be 3-63 characters long: '{}'",
            name
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(crate::Error::config(format!(
            "bucketName may only contain lowercase letters, digits, '-' and '.': '{}'",
            name
        )));
    }
    let first_last = [name.chars().next(), name.chars().last()];
    if first_last
        .iter()
        .flatten()
        .any(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
    {
        return Err(crate::Error::config(format!(
            "bucketName must start and end with a letter or digit: '{}'",
            name
        )));
    }
    if name.contains("..") {
        return Err(crate::Error::config(format!(
            "bucketName cannot contain consecutive dots: '{}'",
            name
        )));
    }
    Ok(())
}

/// Which remote keys a sync may delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneScope {
    /// Every remote key that is absent locally (create into a declared
    /// container still only deletes tracked keys, of which there are none)
    #[default]
    All,
    /// Only keys this provider recorded as written
    Tracked,
}

/// Cache-control header values applied on upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheControlPolicy {
    /// HTML documents, including the index and error documents
    #[serde(default = "default_document_cache_control")]
    pub document: String,

    /// Assets whose file name carries a content hash
    #[serde(default = "default_immutable_cache_control")]
    pub immutable_asset: String,

    /// Everything else
    #[serde(default = "default_asset_cache_control")]
    pub default: String,
}

impl Default for CacheControlPolicy {
    fn default() -> Self {
        Self {
            document: default_document_cache_control(),
            immutable_asset: default_immutable_cache_control(),
            default: default_asset_cache_control(),
        }
    }
}

impl CacheControlPolicy {
    /// Pick the header value for an object key
    pub fn for_key(&self, key: &str, content_type: &str) -> &str {
        if content_type.starts_with("text/html") {
            return &self.document;
        }

        let file_name = key.rsplit('/').next().unwrap_or(key);
        let fingerprinted = file_name
            .split(['.', '-', '_'])
            .any(|segment| segment.len() >= 8 && segment.chars().all(|c| c.is_ascii_hexdigit()));

        if fingerprinted {
            &self.immutable_asset
        } else {
            &self.default
        }
    }
}

fn default_document_cache_control() -> String {
    "public, max-age=0, must-revalidate".to_string()
}

fn default_immutable_cache_control() -> String {
    "public, max-age=31536000, immutable".to_string()
}

fn default_asset_cache_control() -> String {
    "public, max-age=3600".to_string()
}

/// Sync executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Maximum number of object operations in flight
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// Which remote keys may be deleted
    #[serde(default)]
    pub prune: PruneScope,

    /// Cache-control header values
    #[serde(default)]
    pub cache_control: CacheControlPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            upload_concurrency: default_upload_concurrency(),
            prune: PruneScope::default(),
            cache_control: CacheControlPolicy::default(),
        }
    }
}

fn default_upload_concurrency() -> usize {
    8
}

/// Engine settings for one provider instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Backoff policy for backend calls
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Sync executor settings
    #[serde(default)]
    pub sync: SyncSettings,

    /// Prefix for generated bucket names
    #[serde(default = "default_bucket_prefix")]
    pub bucket_prefix: String,

    /// Capacity of the provider event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            sync: SyncSettings::default(),
            bucket_prefix: default_bucket_prefix(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl ProviderSettings {
    /// Validate the settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.retry.validate()?;

        if self.sync.upload_concurrency == 0 {
            return Err(crate::Error::config("upload_concurrency must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        if self.bucket_prefix.is_empty() || self.bucket_prefix.len() > 50 {
            return Err(crate::Error::config(
                "bucket_prefix must be between 1 and 50 characters",
            ));
        }

        Ok(())
    }
}

fn default_bucket_prefix() -> String {
    "static-website".to_string()
}

fn default_event_channel_capacity() -> usize {
    1000
}

/// Backend selection
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Amazon S3 + CloudFront
    Aws {
        /// Region (falls back to the default provider chain when absent)
        region: Option<String>,
        /// Endpoint override for S3-compatible stores
        endpoint_url: Option<String>,
        /// Externally issued certificate used for custom domains
        certificate_arn: Option<String>,
    },

    /// In-process backends (nothing leaves the machine)
    Memory,
}

impl BackendConfig {
    /// Get the backend type name
    pub fn type_name(&self) -> &str {
        match self {
            BackendConfig::Aws { .. } => "aws",
            BackendConfig::Memory => "memory",
        }
    }

    /// Validate the backend configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if let BackendConfig::Aws {
            endpoint_url: Some(url),
            ..
        } = self
            && !url.starts_with("https://")
            && !url.starts_with("http://")
        {
            return Err(crate::Error::config(format!(
                "AWS endpoint URL must use HTTP or HTTPS scheme. Got: {}",
                url
            )));
        }
        Ok(())
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Aws {
            region: None,
            endpoint_url: None,
            certificate_arn: None,
        }
    }
}

// Certificate ARNs identify account resources; keep them out of logs
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendConfig::Aws {
                region,
                endpoint_url,
                certificate_arn,
            } => f
                .debug_struct("Aws")
                .field("region", region)
                .field("endpoint_url", endpoint_url)
                .field(
                    "certificate_arn",
                    &certificate_arn.as_ref().map(|_| "<REDACTED>"),
                )
                .finish(),
            BackendConfig::Memory => write!(f, "Memory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn desired_site_deserializes_from_input_schema() {
        let json = serde_json::json!({
            "staticDirectory": "website",
            "errorDocument": "404.html",
        });
        let site: DesiredSite = serde_json::from_value(json).unwrap();

        assert_eq!(site.static_directory, PathBuf::from("website"));
        assert_eq!(site.index_document, "index.html");
        assert_eq!(site.error_document.as_deref(), Some("404.html"));
        assert_eq!(site.included_files, vec!["**".to_string()]);
        assert!(site.custom_domain.is_none());
    }

    #[test]
    fn missing_directory_is_a_configuration_error() {
        let site = DesiredSite::new("/definitely/not/here");
        let err = site.validate().unwrap_err();
        assert!(matches!(err, crate::Error::Configuration(_)));
    }

    #[test]
    fn traversing_documents_are_rejected() {
        let dir = tempdir().unwrap();
        let site = DesiredSite::new(dir.path()).with_index_document("../index.html");
        assert!(site.validate().is_err());

        let site = DesiredSite::new(dir.path()).with_error_document("/404.html");
        assert!(site.validate().is_err());

        let site = DesiredSite::new(dir.path()).with_error_document("errors/404.html");
        assert!(site.validate().is_ok());
    }

    #[test]
    fn domain_and_bucket_names_are_checked() {
        let dir = tempdir().unwrap();
        assert!(DesiredSite::new(dir.path())
            .with_custom_domain("www.example.com")
            .validate()
            .is_ok());
        assert!(DesiredSite::new(dir.path())
            .with_custom_domain("-bad.example.com")
            .validate()
            .is_err());
        assert!(DesiredSite::new(dir.path())
            .with_bucket_name("my-site.assets")
            .validate()
            .is_ok());
        assert!(DesiredSite::new(dir.path())
            .with_bucket_name("My_Site")
            .validate()
            .is_err());
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let dir = tempdir().unwrap();
        let site = DesiredSite::new(dir.path()).with_included_files(["[unclosed"]);
        assert!(site.validate().is_err());
    }

    #[test]
    fn cache_control_distinguishes_documents_and_fingerprinted_assets() {
        let policy = CacheControlPolicy::default();

        assert_eq!(
            policy.for_key("index.html", "text/html"),
            "public, max-age=0, must-revalidate"
        );
        assert_eq!(
            policy.for_key("assets/app.3f9a1c2b.js", "text/javascript"),
            "public, max-age=31536000, immutable"
        );
        assert_eq!(policy.for_key("logo.png", "image/png"), "public, max-age=3600");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut settings = ProviderSettings::default();
        assert!(settings.validate().is_ok());

        settings.sync.upload_concurrency = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn backend_debug_redacts_certificate() {
        let config = BackendConfig::Aws {
            region: Some("eu-west-1".to_string()),
            endpoint_url: None,
            certificate_arn: Some("arn:aws:acm:us-east-1:123456789012:certificate/abc".to_string()),
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("123456789012"));
        assert!(debug.contains("eu-west-1"));
    }
}
