use crate::LdaError;
use crate::config::{StoreConfig, StoreKind};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Model artifacts run well past ureq's default body limit.
const MAX_OBJECT_BYTES: u64 = 8 << 30;

/// Durable object storage, addressed by bucket and key.
pub trait ObjectStore: Send + Sync {
    /// `Ok(None)` when the key does not exist.
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, LdaError>;
    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), LdaError>;
}

pub fn open_store(config: &StoreConfig) -> Result<Box<dyn ObjectStore>, LdaError> {
    match config.kind {
        StoreKind::Fs => Ok(Box::new(FsObjectStore::new(&config.root))),
        StoreKind::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| LdaError::Config("store.endpoint is not set".into()))?;
            Ok(Box::new(HttpObjectStore::new(
                endpoint,
                Duration::from_secs(config.timeout_secs),
            )))
        }
    }
}

/// Buckets are directories under `root`; keys are relative paths.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, bucket: &str, key: &str) -> Result<PathBuf, LdaError> {
        let rel = Path::new(bucket).join(key);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(LdaError::Config(format!("invalid object key {bucket}/{key}")));
        }
        Ok(self.root.join(rel))
    }
}

impl ObjectStore for FsObjectStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, LdaError> {
        match std::fs::read(self.path(bucket, key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), LdaError> {
        let path = self.path(bucket, key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // write then rename so readers never see a half-written object
        let tmp = path.with_extension("partial");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Path-style `GET`/`PUT {endpoint}/{bucket}/{key}`.
pub struct HttpObjectStore {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpObjectStore {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let agent = ureq::Agent::new_with_config(
            ureq::config::Config::builder()
                .timeout_global(Some(timeout))
                .build(),
        );
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            agent,
        }
    }

    fn url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{bucket}/{}", self.endpoint, key.trim_start_matches('/'))
    }
}

impl ObjectStore for HttpObjectStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, LdaError> {
        match self.agent.get(&self.url(bucket, key)).call() {
            Ok(mut resp) => Ok(Some(
                resp.body_mut().with_config().limit(MAX_OBJECT_BYTES).read_to_vec()?,
            )),
            Err(ureq::Error::StatusCode(404)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), LdaError> {
        self.agent
            .put(&self.url(bucket, key))
            .header("Content-Type", "application/octet-stream")
            .send(bytes)?;
        Ok(())
    }
}
