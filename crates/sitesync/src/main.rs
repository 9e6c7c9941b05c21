// # sitesync - static website host
//
// A THIN host around sitesync-core:
// - All reconciliation logic lives in sitesync-core
// - Configuration is via environment variables ONLY
// - This binary only loads and persists `SiteState` and drives ONE
//   lifecycle call per invocation
//
// ## Commands
//
// The command is the first argument:
// - `up`: create the site, or update it when inputs or files changed
// - `preview`: report what `up` would do, without touching the backends
// - `refresh`: print the outputs recorded in the state file
// - `destroy`: remove the distribution, the objects and the container
//
// ## Configuration
//
// ### Site
// - `SITESYNC_STATIC_DIRECTORY`: Local directory to publish (required)
// - `SITESYNC_INDEX_DOCUMENT`: Index document (default: index.html)
// - `SITESYNC_ERROR_DOCUMENT`: Error document (optional)
// - `SITESYNC_CUSTOM_DOMAIN`: Domain attached to the distribution (optional)
// - `SITESYNC_BUCKET_NAME`: Bucket name (generated when unset)
// - `SITESYNC_INCLUDED_FILES`: Comma-separated glob patterns (default: **)
//
// ### State
// - `SITESYNC_RESOURCE_NAME`: Name the state is recorded under (default: site)
// - `SITESYNC_STATE_PATH`: State file (default: sitesync-state.json)
//
// Changing `SITESYNC_BUCKET_NAME` replaces the site. The old site's state is
// kept under `<name>.superseded` until its bucket and distribution are gone,
// so a failed replacement never loses track of it.
//
// ### Backend
// - `SITESYNC_BACKEND`: aws (default) or memory
// - `SITESYNC_AWS_REGION`: Region (default provider chain when unset)
// - `SITESYNC_AWS_ENDPOINT_URL`: Endpoint override for S3-compatible stores
// - `SITESYNC_AWS_CERTIFICATE_ARN`: Certificate for the custom domain
//
// ### Engine
// - `SITESYNC_MAX_ATTEMPTS`: Attempts per backend call
// - `SITESYNC_UPLOAD_CONCURRENCY`: Object operations in flight
// - `SITESYNC_LOG_LEVEL`: trace, debug, info (default), warn, error
//
// The memory backend keeps both the objects and the state in memory, so
// every invocation starts from scratch.
//
// ## Example
//
// ```bash
// export SITESYNC_STATIC_DIRECTORY=./www
// export SITESYNC_ERROR_DOCUMENT=404.html
// export SITESYNC_AWS_REGION=eu-west-1
//
// sitesync up
// ```

use anyhow::{Context, Result};
use sitesync_core::backend::{MemoryContentDelivery, MemoryObjectStore};
use sitesync_core::{
    BackendConfig, ContentDelivery, DesiredSite, FileStateStore, MemoryStateStore, ObjectStore,
    ProviderEvent, ProviderSettings, SiteOutputs, StateStore, StaticSiteProvider,
};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Exit codes for different termination scenarios
#[derive(Debug, Clone, Copy)]
enum SitesyncExitCode {
    /// Command completed
    Success = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (backend, filesystem, partial sync)
    RuntimeError = 2,
}

impl From<SitesyncExitCode> for ExitCode {
    fn from(code: SitesyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Lifecycle command selected by the first argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Up,
    Preview,
    Refresh,
    Destroy,
}

impl Command {
    fn parse(arg: Option<&str>) -> Result<Self> {
        match arg {
            Some("up") => Ok(Command::Up),
            Some("preview") => Ok(Command::Preview),
            Some("refresh") => Ok(Command::Refresh),
            Some("destroy") => Ok(Command::Destroy),
            Some(other) => anyhow::bail!(
                "Unknown command '{}'. Valid commands: up, preview, refresh, destroy",
                other
            ),
            None => anyhow::bail!("Missing command. Usage: sitesync <up|preview|refresh|destroy>"),
        }
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    site: DesiredSite,
    resource_name: String,
    state_path: PathBuf,
    backend: BackendConfig,
    max_attempts: Option<u32>,
    upload_concurrency: Option<usize>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through a variable lookup
    ///
    /// Empty values count as unset.
    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let static_directory = var("SITESYNC_STATIC_DIRECTORY").context(
            "SITESYNC_STATIC_DIRECTORY is required. \
            Set it via: export SITESYNC_STATIC_DIRECTORY=./www",
        )?;

        let mut site = DesiredSite::new(static_directory);
        if let Some(index) = var("SITESYNC_INDEX_DOCUMENT") {
            site = site.with_index_document(index);
        }
        site.error_document = var("SITESYNC_ERROR_DOCUMENT");
        site.custom_domain = var("SITESYNC_CUSTOM_DOMAIN");
        site.bucket_name = var("SITESYNC_BUCKET_NAME");
        if let Some(patterns) = var("SITESYNC_INCLUDED_FILES") {
            site = site.with_included_files(
                patterns
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty()),
            );
        }

        let backend = match var("SITESYNC_BACKEND").as_deref().unwrap_or("aws") {
            "aws" => BackendConfig::Aws {
                region: var("SITESYNC_AWS_REGION"),
                endpoint_url: var("SITESYNC_AWS_ENDPOINT_URL"),
                certificate_arn: var("SITESYNC_AWS_CERTIFICATE_ARN"),
            },
            "memory" => BackendConfig::Memory,
            other => anyhow::bail!(
                "SITESYNC_BACKEND '{}' is not supported. Supported backends: aws, memory",
                other
            ),
        };

        Ok(Self {
            site,
            resource_name: var("SITESYNC_RESOURCE_NAME").unwrap_or_else(|| "site".to_string()),
            state_path: var("SITESYNC_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("sitesync-state.json")),
            backend,
            max_attempts: parse_number("SITESYNC_MAX_ATTEMPTS", var("SITESYNC_MAX_ATTEMPTS"))?,
            upload_concurrency: parse_number(
                "SITESYNC_UPLOAD_CONCURRENCY",
                var("SITESYNC_UPLOAD_CONCURRENCY"),
            )?,
            log_level: var("SITESYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Engine settings with the environment overrides applied
    fn settings(&self) -> ProviderSettings {
        let mut settings = ProviderSettings::default();
        if let Some(attempts) = self.max_attempts {
            settings.retry.max_attempts = attempts;
        }
        if let Some(concurrency) = self.upload_concurrency {
            settings.sync.upload_concurrency = concurrency;
        }
        settings
    }

    /// Validate the configuration
    ///
    /// Checks the site inputs, the backend and engine settings, the state
    /// file location and the log level.
    fn validate(&self) -> Result<()> {
        self.site.validate()?;
        self.backend.validate()?;
        self.settings().validate()?;

        if let Some(parent) = self.state_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "SITESYNC_STATE_PATH parent directory does not exist: {}. \
                Create it first: mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        parse_log_level(&self.log_level)?;
        Ok(())
    }
}

fn parse_number<T>(name: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("{} must be a number. Got '{}': {}", name, raw, e))
        })
        .transpose()
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "SITESYNC_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

fn main() -> ExitCode {
    let command = match Command::parse(env::args().nth(1).as_deref()) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", e);
            return SitesyncExitCode::ConfigError.into();
        }
    };

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return SitesyncExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return SitesyncExitCode::ConfigError.into();
    }

    let log_level = parse_log_level(&config.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return SitesyncExitCode::ConfigError.into();
    }

    info!(
        "sitesync {:?} of '{}' ({} backend)",
        command,
        config.resource_name,
        config.backend.type_name()
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return SitesyncExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run(command, config).await {
            Ok(()) => SitesyncExitCode::Success,
            Err(e) => {
                error!("{:#}", e);
                SitesyncExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Run one command
async fn run(command: Command, config: Config) -> Result<()> {
    let state_store: Arc<dyn StateStore> = match config.backend {
        BackendConfig::Memory => Arc::new(MemoryStateStore::new()),
        BackendConfig::Aws { .. } => Arc::new(FileStateStore::new(&config.state_path).await?),
    };

    let (store, cdn) = build_backends(&config.backend).await?;
    let (provider, events) = StaticSiteProvider::new(store, cdn, config.settings())?;
    let drain = tokio::spawn(log_events(events));

    let result = match command {
        Command::Up => up(&provider, state_store.as_ref(), &config).await,
        Command::Preview => preview(&provider, state_store.as_ref(), &config).await,
        Command::Refresh => refresh(&provider, state_store.as_ref(), &config).await,
        Command::Destroy => destroy(&provider, state_store.as_ref(), &config).await,
    };

    // Closing the provider closes the event channel
    drop(provider);
    if let Err(e) = drain.await {
        warn!("Event logger stopped: {}", e);
    }

    state_store.flush().await?;
    result
}

async fn build_backends(
    config: &BackendConfig,
) -> Result<(Arc<dyn ObjectStore>, Arc<dyn ContentDelivery>)> {
    match config {
        BackendConfig::Memory => Ok((
            Arc::new(MemoryObjectStore::new()),
            Arc::new(MemoryContentDelivery::new()),
        )),
        #[cfg(feature = "aws")]
        BackendConfig::Aws { .. } => {
            let backends = sitesync_provider_aws::connect(config).await?;
            Ok((Arc::new(backends.store), Arc::new(backends.cdn)))
        }
        #[cfg(not(feature = "aws"))]
        BackendConfig::Aws { .. } => {
            anyhow::bail!("sitesync was built without the aws feature")
        }
    }
}

async fn log_events(mut events: mpsc::Receiver<ProviderEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ProviderEvent::ObjectFailed { key, error, .. } => warn!("{}: {}", key, error),
            ProviderEvent::InvalidationFailed { error, .. } => warn!("Invalidation: {}", error),
            other => debug!("{:?}", other),
        }
    }
}

/// Create the site or bring it up to date
async fn up(provider: &StaticSiteProvider, states: &dyn StateStore, config: &Config) -> Result<()> {
    let name = config.resource_name.as_str();
    let outputs = converge(provider, states, config).await?;
    remove_superseded(provider, states, name).await?;
    print_outputs(&outputs)
}

async fn converge(
    provider: &StaticSiteProvider,
    states: &dyn StateStore,
    config: &Config,
) -> Result<SiteOutputs> {
    let name = config.resource_name.as_str();

    let Some(olds) = states.get_state(name).await? else {
        let (_, outputs, state) = match provider.create(config.site.clone()).await {
            Ok(created) => created,
            Err(e) => return Err(keep_partial_state(states, name, e).await),
        };
        states.set_state(name, &state).await?;
        return Ok(outputs);
    };

    let id = olds.bucket_id.as_str();
    let diff = provider.diff(id, &olds, &config.site).await?;

    if !diff.changes {
        info!("'{}' is up to date", name);
        return Ok(provider.read(id, &olds));
    }

    if diff.replace {
        info!("Replacing '{}': bucket {} is superseded", name, id);

        // Only one superseded site is tracked at a time
        remove_superseded(provider, states, name).await?;
        let superseded = superseded_name(name);
        states.set_state(&superseded, &olds).await?;

        let (_, outputs, state) = match provider.create(config.site.clone()).await {
            Ok(created) => created,
            Err(e) if e.partial_state().is_some() => {
                return Err(keep_partial_state(states, name, e).await);
            }
            Err(e) => {
                // Nothing was created, `name` still records the old site
                states.delete_state(&superseded).await?;
                return Err(e.into());
            }
        };
        states.set_state(name, &state).await?;
        return Ok(outputs);
    }

    info!("Updating '{}': {}", name, diff.changed_fields.join(", "));
    let (outputs, state) = match provider.update(id, &olds, config.site.clone()).await {
        Ok(updated) => updated,
        Err(e) => return Err(keep_partial_state(states, name, e).await),
    };
    states.set_state(name, &state).await?;
    Ok(outputs)
}

/// Name the state of a site being replaced is kept under until it is removed
fn superseded_name(name: &str) -> String {
    format!("{}.superseded", name)
}

/// Delete the site a replacement superseded, if one is recorded
async fn remove_superseded(
    provider: &StaticSiteProvider,
    states: &dyn StateStore,
    name: &str,
) -> Result<()> {
    let superseded = superseded_name(name);
    let Some(olds) = states.get_state(&superseded).await? else {
        return Ok(());
    };

    let current = states.get_state(name).await?;
    if current.is_some_and(|state| state.bucket_id == olds.bucket_id) {
        debug!("Superseded record of '{}' names the live bucket, dropping it", name);
        states.delete_state(&superseded).await?;
        return Ok(());
    }

    info!("Removing superseded bucket {}", olds.bucket_id);
    if let Err(e) = provider.delete(&olds.bucket_id, &olds).await {
        let err = keep_partial_state(states, &superseded, e).await;
        return Err(err.context(format!("Removing superseded bucket {} failed", olds.bucket_id)));
    }
    states.delete_state(&superseded).await?;
    Ok(())
}

/// Report what `up` would do
async fn preview(provider: &StaticSiteProvider, states: &dyn StateStore, config: &Config) -> Result<()> {
    let name = config.resource_name.as_str();

    let report = match states.get_state(name).await? {
        None => serde_json::json!({ "action": "create" }),
        Some(olds) => {
            let diff = provider.diff(&olds.bucket_id, &olds, &config.site).await?;
            let action = match (diff.changes, diff.replace) {
                (false, _) => "none",
                (true, true) => "replace",
                (true, false) => "update",
            };
            serde_json::json!({
                "action": action,
                "changedFields": diff.changed_fields,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Print the outputs recorded in the state
async fn refresh(provider: &StaticSiteProvider, states: &dyn StateStore, config: &Config) -> Result<()> {
    let name = config.resource_name.as_str();
    let mut state = states
        .get_state(name)
        .await?
        .with_context(|| format!("No state recorded for '{}'", name))?;

    let outputs = provider.read(&state.bucket_id, &state);
    if outputs.url != state.site_url {
        state.site_url = outputs.url.clone();
        states.set_state(name, &state).await?;
    }
    print_outputs(&outputs)
}

/// Remove every backend resource, then the state
async fn destroy(provider: &StaticSiteProvider, states: &dyn StateStore, config: &Config) -> Result<()> {
    let name = config.resource_name.as_str();
    let Some(olds) = states.get_state(name).await? else {
        remove_superseded(provider, states, name).await?;
        info!("Nothing recorded for '{}', nothing to destroy", name);
        return Ok(());
    };

    if let Err(e) = provider.delete(&olds.bucket_id, &olds).await {
        return Err(keep_partial_state(states, name, e).await);
    }
    remove_superseded(provider, states, name).await?;
    states.delete_state(name).await?;
    info!("Destroyed '{}'", name);
    Ok(())
}

/// Persist the state a partial failure carries, then hand back the error
async fn keep_partial_state(
    states: &dyn StateStore,
    name: &str,
    err: sitesync_core::Error,
) -> anyhow::Error {
    if let Some(state) = err.partial_state() {
        match states.set_state(name, state).await {
            Ok(()) => warn!("Recorded the partially applied state of '{}'", name),
            Err(store_err) => error!("Failed to record partial state of '{}': {}", name, store_err),
        }
    }
    err.into()
}

fn print_outputs(outputs: &SiteOutputs) -> Result<()> {
    for warning in &outputs.warnings {
        warn!("{}", warning);
    }
    println!("{}", serde_json::to_string_pretty(outputs)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn commands_parse() {
        assert_eq!(Command::parse(Some("up")).unwrap(), Command::Up);
        assert_eq!(Command::parse(Some("destroy")).unwrap(), Command::Destroy);
        assert!(Command::parse(Some("deploy")).is_err());
        assert!(Command::parse(None).is_err());
    }

    #[test]
    fn static_directory_is_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("SITESYNC_STATIC_DIRECTORY"));
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[("SITESYNC_STATIC_DIRECTORY", "www")])).unwrap();

        assert_eq!(config.site.index_document, "index.html");
        assert_eq!(config.site.included_files, vec!["**".to_string()]);
        assert_eq!(config.resource_name, "site");
        assert_eq!(config.state_path, PathBuf::from("sitesync-state.json"));
        assert_eq!(config.backend.type_name(), "aws");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn site_inputs_come_from_environment() {
        let config = Config::from_lookup(lookup(&[
            ("SITESYNC_STATIC_DIRECTORY", "www"),
            ("SITESYNC_ERROR_DOCUMENT", "404.html"),
            ("SITESYNC_CUSTOM_DOMAIN", "www.example.com"),
            ("SITESYNC_BUCKET_NAME", "my-site"),
            ("SITESYNC_INCLUDED_FILES", "*.html, assets/** ,"),
            ("SITESYNC_BACKEND", "memory"),
        ]))
        .unwrap();

        assert_eq!(config.site.error_document.as_deref(), Some("404.html"));
        assert_eq!(config.site.custom_domain.as_deref(), Some("www.example.com"));
        assert_eq!(config.site.bucket_name.as_deref(), Some("my-site"));
        assert_eq!(
            config.site.included_files,
            vec!["*.html".to_string(), "assets/**".to_string()]
        );
        assert_eq!(config.backend.type_name(), "memory");
    }

    #[test]
    fn empty_values_count_as_unset() {
        let config = Config::from_lookup(lookup(&[
            ("SITESYNC_STATIC_DIRECTORY", "www"),
            ("SITESYNC_ERROR_DOCUMENT", ""),
            ("SITESYNC_MAX_ATTEMPTS", " "),
        ]))
        .unwrap();

        assert!(config.site.error_document.is_none());
        assert!(config.max_attempts.is_none());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("SITESYNC_STATIC_DIRECTORY", "www"),
            ("SITESYNC_BACKEND", "gcs"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn numbers_are_parsed_strictly() {
        let err = Config::from_lookup(lookup(&[
            ("SITESYNC_STATIC_DIRECTORY", "www"),
            ("SITESYNC_UPLOAD_CONCURRENCY", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SITESYNC_UPLOAD_CONCURRENCY"));

        let config = Config::from_lookup(lookup(&[
            ("SITESYNC_STATIC_DIRECTORY", "www"),
            ("SITESYNC_MAX_ATTEMPTS", "7"),
            ("SITESYNC_UPLOAD_CONCURRENCY", "16"),
        ]))
        .unwrap();
        let settings = config.settings();
        assert_eq!(settings.retry.max_attempts, 7);
        assert_eq!(settings.sync.upload_concurrency, 16);
    }

    #[test]
    fn validation_checks_directory_and_settings() {
        let dir = tempdir().unwrap();
        let site_dir = dir.path().to_string_lossy().to_string();

        let valid = Config::from_lookup(lookup(&[
            ("SITESYNC_STATIC_DIRECTORY", site_dir.as_str()),
            ("SITESYNC_BACKEND", "memory"),
        ]))
        .unwrap();
        valid.validate().unwrap();

        let missing = Config::from_lookup(lookup(&[("SITESYNC_STATIC_DIRECTORY", "/definitely/not/here")])).unwrap();
        assert!(missing.validate().is_err());

        let zero = Config::from_lookup(lookup(&[
            ("SITESYNC_STATIC_DIRECTORY", site_dir.as_str()),
            ("SITESYNC_UPLOAD_CONCURRENCY", "0"),
        ]))
        .unwrap();
        assert!(zero.validate().is_err());

        let noisy = Config::from_lookup(lookup(&[
            ("SITESYNC_STATIC_DIRECTORY", site_dir.as_str()),
            ("SITESYNC_LOG_LEVEL", "loud"),
        ]))
        .unwrap();
        assert!(noisy.validate().is_err());
    }

    #[test]
    fn state_path_parent_must_exist() {
        let dir = tempdir().unwrap();
        let site_dir = dir.path().to_string_lossy().to_string();
        let state_path = dir.path().join("missing/state.json").to_string_lossy().to_string();

        let config = Config::from_lookup(lookup(&[
            ("SITESYNC_STATIC_DIRECTORY", site_dir.as_str()),
            ("SITESYNC_STATE_PATH", state_path.as_str()),
        ]))
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("parent directory does not exist"));
    }

    #[tokio::test]
    async fn memory_backend_runs_up_then_destroy() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        let site_dir = dir.path().to_string_lossy().to_string();

        let config = Config::from_lookup(lookup(&[
            ("SITESYNC_STATIC_DIRECTORY", site_dir.as_str()),
            ("SITESYNC_BACKEND", "memory"),
        ]))
        .unwrap();

        let states = MemoryStateStore::new();
        let (store, cdn) = build_backends(&config.backend).await.unwrap();
        let (provider, _events) = StaticSiteProvider::new(store, cdn, config.settings()).unwrap();

        up(&provider, &states, &config).await.unwrap();
        let state = states.get_state("site").await.unwrap().unwrap();
        assert!(state.last_applied_file_hashes.contains_key("index.html"));

        // Second run finds nothing to do
        up(&provider, &states, &config).await.unwrap();
        assert_eq!(states.get_state("site").await.unwrap(), Some(state));

        destroy(&provider, &states, &config).await.unwrap();
        assert!(states.get_state("site").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_replacement_keeps_the_old_site_recorded() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        std::fs::write(dir.path().join("style.css"), "body {}").unwrap();
        let site_dir = dir.path().to_string_lossy().to_string();
        let config_for = |bucket: &str| {
            Config::from_lookup(lookup(&[
                ("SITESYNC_STATIC_DIRECTORY", site_dir.as_str()),
                ("SITESYNC_BACKEND", "memory"),
                ("SITESYNC_BUCKET_NAME", bucket),
            ]))
            .unwrap()
        };

        let store = Arc::new(MemoryObjectStore::new());
        let states = MemoryStateStore::new();
        let (provider, _events) = StaticSiteProvider::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::new(MemoryContentDelivery::new()),
            config_for("site-a").settings(),
        )
        .unwrap();

        up(&provider, &states, &config_for("site-a")).await.unwrap();

        store.reject_key("style.css");
        let replaced = config_for("site-b");
        up(&provider, &states, &replaced)
            .await
            .expect_err("replacement misses style.css");

        let current = states.get_state("site").await.unwrap().unwrap();
        assert_eq!(current.bucket_id, "site-b");
        assert!(!current.last_applied_file_hashes.contains_key("style.css"));
        let superseded = states.get_state("site.superseded").await.unwrap().unwrap();
        assert_eq!(superseded.bucket_id, "site-a");
        assert!(store.has_container("site-a"));

        // The next run finishes the replacement and only then removes the old site
        store.clear_failures();
        up(&provider, &states, &replaced).await.unwrap();

        let current = states.get_state("site").await.unwrap().unwrap();
        assert_eq!(current.bucket_id, "site-b");
        assert!(current.last_applied_file_hashes.contains_key("style.css"));
        assert!(states.get_state("site.superseded").await.unwrap().is_none());
        assert!(!store.has_container("site-a"));
        assert_eq!(store.keys("site-b"), vec!["index.html", "style.css"]);
    }
}
