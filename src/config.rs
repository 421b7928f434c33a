use crate::LdaError;
use crate::build::{BuildSettings, FleetSettings};
use crate::cli::BuildArgs;
use crate::fleet::{InstanceSpec, PollPolicy};
use crate::metrics::MetricsConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Default)]
pub struct LdaConfig {
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Build parameters. Every field can be overridden on the command line.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct BuildConfig {
    pub partition: Option<String>,
    pub num_topics: Option<usize>,
    pub max_topic_frequency: Option<usize>,
    pub workers: Option<usize>,
    pub model_prefix: Option<String>,
    pub local_prefix: Option<String>,
    pub remote_prefix: Option<String>,
    pub bucket: Option<String>,
    pub code_revision: Option<String>,
    pub stopword_count: Option<usize>,
    pub grace_secs: Option<u64>,
    pub terminate_on_complete: Option<bool>,
    pub terminate_on_failure: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct FleetConfig {
    pub auto_launch: Option<bool>,
    pub instance_count: Option<usize>,
    pub bid_price: Option<String>,
    pub image_id: Option<String>,
    pub instance_type: Option<String>,
    pub key_name: Option<String>,
    pub subnet_id: Option<String>,
    pub security_group_ids: Option<Vec<String>>,
    /// Base URL of the compute provider API.
    #[serde(default = "default_provider_endpoint")]
    pub endpoint: String,
    pub poll_interval_secs: Option<u64>,
    pub poll_backoff: Option<f64>,
    pub max_poll_interval_secs: Option<u64>,
    /// No deadline unless set: fulfillment is awaited indefinitely.
    pub poll_deadline_secs: Option<u64>,
}

fn default_provider_endpoint() -> String {
    "http://localhost:8700".into()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Fs,
    Http,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Fs,
            root: default_store_root(),
            endpoint: None,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_store_root() -> PathBuf {
    pagelda_home().join("store")
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrainerConfig {
    #[serde(default = "default_trainer_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            program: default_trainer_program(),
            args: Vec::new(),
        }
    }
}

fn default_trainer_program() -> String {
    "pagelda-train".into()
}

/// One term-extraction service; `kind` selects the registry builder.
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub kind: String,
    pub endpoint: Option<String>,
    pub path: Option<PathBuf>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn pagelda_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".pagelda")
}

/// Load config from PAGELDA_CONFIG env var, ~/.pagelda/config.toml, or defaults.
pub fn load_config() -> Result<LdaConfig, LdaError> {
    match config_path() {
        Some(p) if p.exists() => load_config_from(&p),
        _ => Ok(LdaConfig::default()),
    }
}

pub fn load_config_from(path: &Path) -> Result<LdaConfig, LdaError> {
    let content = std::fs::read_to_string(path)?;
    let config: LdaConfig = toml::from_str(&content)
        .map_err(|e| LdaError::Config(format!("{}: {e}", path.display())))?;
    validate_config(&config)?;
    Ok(config)
}

fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("PAGELDA_CONFIG") {
        return Some(PathBuf::from(p));
    }
    std::env::var("HOME").ok()?;
    Some(pagelda_home().join("config.toml"))
}

fn validate_config(config: &LdaConfig) -> Result<(), LdaError> {
    if let Some(price) = &config.fleet.bid_price {
        validate_bid_price(price)?;
    }
    if config.build.num_topics == Some(0) {
        return Err(LdaError::Config("num_topics must be positive".into()));
    }
    if config.build.workers == Some(0) {
        return Err(LdaError::Config("workers must be positive".into()));
    }
    if let Some(b) = config.fleet.poll_backoff
        && b < 1.0
    {
        return Err(LdaError::Config(format!("poll_backoff {b} must be >= 1.0")));
    }
    if config.store.kind == StoreKind::Http && config.store.endpoint.is_none() {
        return Err(LdaError::Config("store.endpoint is required for kind = \"http\"".into()));
    }
    for (i, svc) in config.services.iter().enumerate() {
        if svc.kind.trim().is_empty() {
            return Err(LdaError::Config(format!("services[{i}] ({}) has no kind", svc.name)));
        }
    }
    Ok(())
}

fn validate_bid_price(price: &str) -> Result<(), LdaError> {
    match price.parse::<f64>() {
        Ok(p) if p > 0.0 && p.is_finite() => Ok(()),
        _ => Err(LdaError::Config(format!("bid price {price:?} is not a positive decimal"))),
    }
}

/// Short hash of HEAD in the enclosing git repository.
pub fn detect_code_revision() -> Option<String> {
    let repo = git2::Repository::discover(".").ok()?;
    let commit = repo.head().ok()?.peel_to_commit().ok()?;
    let id = commit.id().to_string();
    Some(id[..7].to_string())
}

fn default_model_prefix() -> String {
    chrono::Local::now().format("%Y-%m-%d-%H-%M").to_string()
}

/// Merge command line, config file and defaults (in that order of precedence).
pub fn resolve_build_settings(config: &LdaConfig, args: &BuildArgs) -> Result<BuildSettings, LdaError> {
    let b = &config.build;
    let f = &config.fleet;

    let partition = args
        .partition
        .clone()
        .or_else(|| b.partition.clone())
        .ok_or_else(|| LdaError::Config("partition id is required (--partition or [build] partition)".into()))?;

    let num_topics = args.num_topics.or(b.num_topics).unwrap_or(999);
    let workers = args.workers.or(b.workers).unwrap_or(8);
    if num_topics == 0 || workers == 0 {
        return Err(LdaError::Config("num_topics and workers must be positive".into()));
    }

    let bid_price = args
        .bid_price
        .clone()
        .or_else(|| f.bid_price.clone())
        .unwrap_or_else(|| "0.80".into());
    validate_bid_price(&bid_price)?;

    let code_revision = args
        .code_revision
        .clone()
        .or_else(|| b.code_revision.clone())
        .or_else(detect_code_revision)
        .unwrap_or_else(|| "master".into());

    let interval = Duration::from_secs(f.poll_interval_secs.unwrap_or(15));
    let policy = PollPolicy {
        interval,
        backoff: f.poll_backoff.unwrap_or(1.0),
        max_interval: f
            .max_poll_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(interval),
        deadline: f.poll_deadline_secs.map(Duration::from_secs),
    };

    let instance = InstanceSpec {
        image_id: args
            .image_id
            .clone()
            .or_else(|| f.image_id.clone())
            .unwrap_or_else(|| "ami-40701570".into()),
        instance_type: f.instance_type.clone().unwrap_or_else(|| "m2.4xlarge".into()),
        key_name: f.key_name.clone().unwrap_or_else(|| "LDA Node".into()),
        subnet_id: f.subnet_id.clone().unwrap_or_else(|| "subnet-e4d087a2".into()),
        security_group_ids: f
            .security_group_ids
            .clone()
            .unwrap_or_else(|| vec!["sg-72190a10".into()]),
    };

    Ok(BuildSettings {
        partition,
        num_topics,
        max_topic_frequency: args.max_topic_frequency.or(b.max_topic_frequency).unwrap_or(500),
        workers,
        model_prefix: args
            .model_prefix
            .clone()
            .or_else(|| b.model_prefix.clone())
            .unwrap_or_else(default_model_prefix),
        local_prefix: args
            .local_prefix
            .clone()
            .or_else(|| b.local_prefix.clone())
            .unwrap_or_else(|| "/mnt/".into()),
        remote_prefix: args
            .remote_prefix
            .clone()
            .or_else(|| b.remote_prefix.clone())
            .unwrap_or_else(|| "models/page/".into()),
        bucket: b.bucket.clone().unwrap_or_else(|| "nlp-data".into()),
        code_revision,
        stopword_count: args
            .stopword_count
            .or(b.stopword_count)
            .unwrap_or(crate::stopwords::DEFAULT_STOPWORD_COUNT),
        grace: Duration::from_secs(args.grace_secs.or(b.grace_secs).unwrap_or(300)),
        terminate_on_complete: !args.no_terminate_on_complete
            && b.terminate_on_complete.unwrap_or(true),
        terminate_on_failure: args.terminate_on_failure || b.terminate_on_failure.unwrap_or(false),
        fleet: FleetSettings {
            auto_launch: args.auto_launch.or(f.auto_launch).unwrap_or(true),
            instance_count: args.instance_count.or(f.instance_count).unwrap_or(20),
            bid_price,
            instance,
            policy,
        },
    })
}
