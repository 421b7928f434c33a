//! Term extraction services and corpus gathering.
//!
//! Services are listed in configuration by `kind`; a registry maps each kind
//! to a typed builder. Gathering fans document-id chunks out to a fixed-size
//! worker pool, merges every source's terms per document in registry order
//! and normalizes them.

use crate::LdaError;
use crate::cancel::CancelToken;
use crate::config::ServiceConfig;
use crate::corpus::Corpus;
use crate::normalize::normalize_terms;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

/// Document ids fetched per request.
pub const CHUNK_SIZE: usize = 50;

pub trait TermSource: Send + Sync {
    fn document_ids(&self, partition: &str) -> Result<Vec<String>, LdaError>;
    /// Raw candidate terms for the given documents. Documents the source
    /// knows nothing about may be omitted.
    fn fetch(&self, partition: &str, doc_ids: &[String]) -> Result<Vec<(String, Vec<String>)>, LdaError>;
}

/// `GET {endpoint}/partitions/{p}/documents` and
/// `GET {endpoint}/partitions/{p}/terms?ids=a|b|c`.
pub struct HttpTermSource {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpTermSource {
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

    fn from_config(config: &ServiceConfig) -> Result<Box<dyn TermSource>, LdaError> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            LdaError::Config(format!("service {} needs an endpoint", config.name))
        })?;
        Ok(Box::new(Self::new(endpoint, Duration::from_secs(config.timeout_secs))))
    }
}

impl TermSource for HttpTermSource {
    fn document_ids(&self, partition: &str) -> Result<Vec<String>, LdaError> {
        let ids: Vec<String> = self
            .agent
            .get(&format!("{}/partitions/{partition}/documents", self.endpoint))
            .call()?
            .body_mut()
            .read_json()?;
        Ok(ids)
    }

    fn fetch(&self, partition: &str, doc_ids: &[String]) -> Result<Vec<(String, Vec<String>)>, LdaError> {
        let terms: BTreeMap<String, Vec<String>> = self
            .agent
            .get(&format!("{}/partitions/{partition}/terms", self.endpoint))
            .query("ids", doc_ids.join("|"))
            .call()?
            .body_mut()
            .read_json()?;
        Ok(terms.into_iter().collect())
    }
}

/// Reads `{dir}/{partition}.json` holding `{doc_id: [terms]}`.
pub struct FileTermSource {
    dir: PathBuf,
}

impl FileTermSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn from_config(config: &ServiceConfig) -> Result<Box<dyn TermSource>, LdaError> {
        let path = config
            .path
            .clone()
            .ok_or_else(|| LdaError::Config(format!("service {} needs a path", config.name)))?;
        Ok(Box::new(Self::new(path)))
    }

    fn load(&self, partition: &str) -> Result<BTreeMap<String, Vec<String>>, LdaError> {
        let path = self.dir.join(format!("{partition}.json"));
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl TermSource for FileTermSource {
    fn document_ids(&self, partition: &str) -> Result<Vec<String>, LdaError> {
        Ok(self.load(partition)?.into_keys().collect())
    }

    fn fetch(&self, partition: &str, doc_ids: &[String]) -> Result<Vec<(String, Vec<String>)>, LdaError> {
        let mut all = self.load(partition)?;
        Ok(doc_ids
            .iter()
            .filter_map(|id| all.remove_entry(id))
            .collect())
    }
}

type Builder = fn(&ServiceConfig) -> Result<Box<dyn TermSource>, LdaError>;

/// Maps a service kind to the builder for its typed source.
pub struct ServiceRegistry {
    builders: HashMap<&'static str, Builder>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        let mut registry = Self {
            builders: HashMap::new(),
        };
        registry.register("http", HttpTermSource::from_config);
        registry.register("file", FileTermSource::from_config);
        registry
    }
}

impl ServiceRegistry {
    pub fn register(&mut self, kind: &'static str, builder: Builder) {
        self.builders.insert(kind, builder);
    }

    /// Instantiate the configured services in order.
    pub fn build(&self, configs: &[ServiceConfig]) -> Result<TermSources, LdaError> {
        let mut sources = TermSources::default();
        for config in configs {
            let builder = self.builders.get(config.kind.as_str()).ok_or_else(|| {
                LdaError::Config(format!("service {}: unknown kind {:?}", config.name, config.kind))
            })?;
            sources.push(config.name.clone(), builder(config)?);
        }
        Ok(sources)
    }
}

/// Ordered, named term sources for one build run.
#[derive(Default)]
pub struct TermSources {
    sources: Vec<(String, Box<dyn TermSource>)>,
}

struct Job<'a> {
    source: usize,
    ids: &'a [String],
}

impl TermSources {
    pub fn push(&mut self, name: String, source: Box<dyn TermSource>) {
        self.sources.push((name, source));
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Collect, merge and normalize the partition's terms.
    ///
    /// A failing source or chunk only costs the terms it would have
    /// contributed. Documents left with no terms are dropped.
    pub fn gather(&self, partition: &str, workers: usize, cancel: &CancelToken) -> Result<Corpus, LdaError> {
        if self.sources.is_empty() {
            return Err(LdaError::Config("no term services configured".into()));
        }

        let mut doc_ids: BTreeSet<String> = BTreeSet::new();
        for (name, source) in &self.sources {
            match source.document_ids(partition) {
                Ok(ids) => doc_ids.extend(ids),
                Err(e) => log::warn!("services: {name} listed no documents for {partition}: {e}"),
            }
        }
        if doc_ids.is_empty() {
            return Err(LdaError::Corpus(format!("no documents found for partition {partition}")));
        }
        let doc_ids: Vec<String> = doc_ids.into_iter().collect();
        log::info!("services: {} documents in partition {partition}", doc_ids.len());

        let jobs: Vec<Job> = (0..self.sources.len())
            .flat_map(|source| {
                doc_ids
                    .chunks(CHUNK_SIZE)
                    .map(move |ids| Job { source, ids })
            })
            .collect();

        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel();
        std::thread::scope(|s| {
            for _ in 0..workers.clamp(1, jobs.len()) {
                let tx = tx.clone();
                let next = &next;
                let jobs = &jobs;
                s.spawn(move || {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let j = next.fetch_add(1, Ordering::SeqCst);
                        let Some(job) = jobs.get(j) else { break };
                        let (name, source) = &self.sources[job.source];
                        match source.fetch(partition, job.ids) {
                            Ok(rows) => {
                                let _ = tx.send((j, rows));
                            }
                            Err(e) => log::warn!(
                                "services: {name} failed for {} documents: {e}",
                                job.ids.len()
                            ),
                        }
                    }
                });
            }
        });
        drop(tx);
        cancel.check()?;

        let mut results: Vec<(usize, Vec<(String, Vec<String>)>)> = rx.into_iter().collect();
        results.sort_by_key(|(j, _)| *j);

        let mut raw: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (_, rows) in results {
            for (id, terms) in rows {
                raw.entry(id).or_default().extend(terms);
            }
        }

        let mut corpus = Corpus::new();
        let mut dropped = 0;
        for id in doc_ids {
            let terms = normalize_terms(raw.remove(&id).unwrap_or_default());
            if terms.is_empty() {
                dropped += 1;
            } else {
                corpus.insert(id, terms);
            }
        }
        if dropped > 0 {
            log::warn!("services: dropped {dropped} documents with no usable terms");
        }
        if corpus.is_empty() {
            return Err(LdaError::Corpus(format!("no terms found for partition {partition}")));
        }
        Ok(corpus)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory source; any fetch containing an id in `fail_on` fails.
    pub(crate) struct StaticSource {
        pub docs: BTreeMap<String, Vec<String>>,
        pub fail_on: Vec<String>,
        pub fetches: Mutex<usize>,
    }

    impl StaticSource {
        pub(crate) fn new(docs: &[(&str, &[&str])]) -> Self {
            Self {
                docs: docs
                    .iter()
                    .map(|(id, terms)| (id.to_string(), terms.iter().map(|t| t.to_string()).collect()))
                    .collect(),
                fail_on: Vec::new(),
                fetches: Mutex::new(0),
            }
        }
    }

    impl TermSource for StaticSource {
        fn document_ids(&self, _partition: &str) -> Result<Vec<String>, LdaError> {
            Ok(self.docs.keys().cloned().collect())
        }

        fn fetch(&self, _partition: &str, doc_ids: &[String]) -> Result<Vec<(String, Vec<String>)>, LdaError> {
            *self.fetches.lock().unwrap() += 1;
            if doc_ids.iter().any(|id| self.fail_on.contains(id)) {
                return Err(LdaError::Http("upstream 503".into()));
            }
            Ok(doc_ids
                .iter()
                .filter_map(|id| self.docs.get(id).map(|t| (id.clone(), t.clone())))
                .collect())
        }
    }

    fn sources(list: Vec<StaticSource>) -> TermSources {
        let mut s = TermSources::default();
        for (i, src) in list.into_iter().enumerate() {
            s.push(format!("src{i}"), Box::new(src));
        }
        s
    }

    #[test]
    fn merges_sources_in_order_and_normalizes() {
        let heads = StaticSource::new(&[("1", &["Wolves"]), ("2", &["The Moon"])]);
        let entities = StaticSource::new(&[("1", &["full moon"]), ("3", &["tides"])]);
        let corpus = sources(vec![heads, entities])
            .gather("831", 4, &CancelToken::new())
            .unwrap();
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus["1"], vec!["wolv", "full_moon"]);
        assert_eq!(corpus["2"], vec!["moon"]);
        assert_eq!(corpus["3"], vec!["tide"]);
    }

    const TERM: &[&str] = &["term"];

    #[test]
    fn chunks_across_worker_pool() {
        let ids: Vec<String> = (0..120).map(|i| format!("{i:03}")).collect();
        let docs: Vec<(&str, &[&str])> = ids.iter().map(|i| (i.as_str(), TERM)).collect();
        let src = StaticSource::new(&docs);
        let s = sources(vec![src]);
        let corpus = s.gather("p", 8, &CancelToken::new()).unwrap();
        assert_eq!(corpus.len(), 120);
    }

    #[test]
    fn failed_chunk_degrades_without_failing() {
        let ids: Vec<String> = (0..60).map(|i| format!("{i:03}")).collect();
        let docs: Vec<(&str, &[&str])> = ids.iter().map(|i| (i.as_str(), TERM)).collect();
        let mut src = StaticSource::new(&docs);
        // second chunk holds ids 050..059
        src.fail_on = vec!["055".into()];
        let corpus = sources(vec![src]).gather("p", 2, &CancelToken::new()).unwrap();
        assert_eq!(corpus.len(), 50);
        assert!(!corpus.contains_key("055"));
    }

    #[test]
    fn documents_without_terms_are_dropped() {
        let src = StaticSource::new(&[("1", &["the", "of"]), ("2", &["moon"])]);
        let corpus = sources(vec![src]).gather("p", 1, &CancelToken::new()).unwrap();
        assert_eq!(corpus.keys().collect::<Vec<_>>(), vec!["2"]);
    }

    #[test]
    fn empty_partition_is_an_error() {
        let src = StaticSource::new(&[]);
        let err = sources(vec![src]).gather("p", 1, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, LdaError::Corpus(_)));
    }

    #[test]
    fn cancelled_gather_is_interrupted() {
        let src = StaticSource::new(&[("1", &["moon"])]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = sources(vec![src]).gather("p", 1, &cancel).unwrap_err();
        assert!(matches!(err, LdaError::Interrupted));
    }

    #[test]
    fn file_source_reads_partition_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("831.json"),
            r#"{"10": ["Moon", "tides"], "11": ["wolves"]}"#,
        )
        .unwrap();
        let src = FileTermSource::new(dir.path());
        assert_eq!(src.document_ids("831").unwrap(), vec!["10", "11"]);
        let rows = src.fetch("831", &["11".into(), "99".into()]).unwrap();
        assert_eq!(rows, vec![("11".to_string(), vec!["wolves".to_string()])]);
    }

    #[test]
    fn registry_builds_configured_kinds() {
        let configs = vec![
            ServiceConfig {
                name: "heads".into(),
                kind: "http".into(),
                endpoint: Some("http://localhost:1".into()),
                path: None,
                timeout_secs: 1,
            },
            ServiceConfig {
                name: "fixtures".into(),
                kind: "file".into(),
                endpoint: None,
                path: Some("/tmp".into()),
                timeout_secs: 1,
            },
        ];
        let sources = ServiceRegistry::default().build(&configs).unwrap();
        assert_eq!(sources.len(), 2);
    }

    fn static_builder(_: &ServiceConfig) -> Result<Box<dyn TermSource>, LdaError> {
        Ok(Box::new(StaticSource::new(&[("1", &["moon"])])))
    }

    #[test]
    fn registered_kind_builds_without_config_changes() {
        let config = ServiceConfig {
            name: "canned".into(),
            kind: "static".into(),
            endpoint: None,
            path: None,
            timeout_secs: 1,
        };
        assert!(ServiceRegistry::default().build(std::slice::from_ref(&config)).is_err());

        let mut registry = ServiceRegistry::default();
        registry.register("static", static_builder);
        let sources = registry.build(&[config]).unwrap();
        assert_eq!(sources.len(), 1);
        let corpus = sources.gather("p", 1, &CancelToken::new()).unwrap();
        assert_eq!(corpus["1"], vec!["moon"]);
    }

    #[test]
    fn registry_rejects_unknown_kind_and_missing_fields() {
        let mut config = ServiceConfig {
            name: "x".into(),
            kind: "ftp".into(),
            endpoint: None,
            path: None,
            timeout_secs: 1,
        };
        let registry = ServiceRegistry::default();
        assert!(registry.build(std::slice::from_ref(&config)).is_err());
        config.kind = "http".into();
        assert!(registry.build(std::slice::from_ref(&config)).is_err());
    }
}
