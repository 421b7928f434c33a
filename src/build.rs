//! Build orchestration: local cache, remote cache, then fleet launch and
//! corpus preparation side by side, training, persisting and reporting.

use crate::LdaError;
use crate::cancel::CancelToken;
use crate::corpus::{BowCorpus, Dictionary};
use crate::fleet::{ComputeProvider, FleetController, InstanceSpec, NodeFleet, PollPolicy};
use crate::model::{TopicModel, Trainer, TrainingRequest};
use crate::report::{self, ReportArtifacts};
use crate::services::TermSources;
use crate::stopwords::VocabularyFilter;
use crate::store::ObjectStore;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FleetSettings {
    pub auto_launch: bool,
    pub instance_count: usize,
    pub bid_price: String,
    pub instance: InstanceSpec,
    pub policy: PollPolicy,
}

/// Fully resolved parameters of one build run.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub partition: String,
    pub num_topics: usize,
    pub max_topic_frequency: usize,
    pub workers: usize,
    pub model_prefix: String,
    /// Local directory prefix, joined to artifact names by concatenation.
    pub local_prefix: String,
    pub remote_prefix: String,
    pub bucket: String,
    pub code_revision: String,
    pub stopword_count: usize,
    /// Wait between fleet fulfillment and training, so nodes can boot.
    pub grace: Duration,
    pub terminate_on_complete: bool,
    pub terminate_on_failure: bool,
    pub fleet: FleetSettings,
}

impl BuildSettings {
    pub fn model_name(&self) -> String {
        format!(
            "{}-{}-page-lda-wid-{}-{}topics.model",
            self.code_revision, self.model_prefix, self.partition, self.num_topics
        )
    }

    pub fn local_path(&self, artifact: &str) -> PathBuf {
        PathBuf::from(format!("{}{artifact}", self.local_prefix))
    }

    pub fn remote_key(&self, artifact: &str) -> String {
        format!("{}{artifact}", self.remote_prefix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    CheckLocal,
    CheckRemote,
    Building,
    Persisting,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSource {
    Local,
    Remote,
    Built,
}

impl ModelSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSource::Local => "local",
            ModelSource::Remote => "remote",
            ModelSource::Built => "built",
        }
    }
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub model_name: String,
    pub source: ModelSource,
    pub model: Option<TopicModel>,
    pub reports: Option<ReportArtifacts>,
    pub states: Vec<BuildState>,
    pub failure: Option<String>,
    /// Instances still running when the run ended.
    pub orphaned_instances: Vec<String>,
    /// Capacity requests submitted but never resolved to instances.
    pub outstanding_requests: Vec<String>,
    pub fleet_wait: Option<Duration>,
}

impl BuildOutcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Runs one build against its collaborators. Holds no state between runs.
pub struct Orchestrator<'a> {
    settings: &'a BuildSettings,
    store: &'a dyn ObjectStore,
    sources: &'a TermSources,
    provider: &'a dyn ComputeProvider,
    trainer: &'a dyn Trainer,
    states: Vec<BuildState>,
    fleet_wait: Option<Duration>,
    outstanding_requests: Vec<String>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        settings: &'a BuildSettings,
        store: &'a dyn ObjectStore,
        sources: &'a TermSources,
        provider: &'a dyn ComputeProvider,
        trainer: &'a dyn Trainer,
    ) -> Self {
        Self {
            settings,
            store,
            sources,
            provider,
            trainer,
            states: Vec::new(),
            fleet_wait: None,
            outstanding_requests: Vec::new(),
        }
    }

    /// Produce the model for the configured partition.
    ///
    /// Build failures come back as an outcome carrying `failure`; only an
    /// interrupt is returned as an error.
    pub fn run(mut self, cancel: &CancelToken) -> Result<BuildOutcome, LdaError> {
        let name = self.settings.model_name();
        log::info!("build: {name}");

        self.enter(BuildState::CheckLocal);
        if let Some(model) = self.check_local(&name) {
            return Ok(self.done(name, ModelSource::Local, model, None));
        }
        cancel.check()?;

        self.enter(BuildState::CheckRemote);
        if let Some(model) = self.check_remote(&name) {
            return Ok(self.done(name, ModelSource::Remote, model, None));
        }
        cancel.check()?;

        self.enter(BuildState::Building);
        let controller = FleetController::new(self.provider, self.settings.fleet.policy.clone());
        let mut fleet = NodeFleet::default();
        let (model, bow) = match self.train(&controller, &mut fleet, cancel) {
            Ok(trained) => trained,
            Err(e) if e.is_interrupted() => return Err(LdaError::Interrupted),
            Err(e) => return Ok(self.fail(name, &controller, &mut fleet, e)),
        };

        self.enter(BuildState::Persisting);
        let reports = match self.persist(&name, &model, &bow) {
            Ok(reports) => reports,
            Err(e) => {
                self.discard_local(&name);
                return Ok(self.fail(name, &controller, &mut fleet, e));
            }
        };

        if self.settings.terminate_on_complete {
            if let Err(e) = controller.terminate(&mut fleet) {
                log::warn!(
                    "build: model persisted but fleet teardown failed, terminate with: pagelda terminate {}: {e}",
                    fleet.instance_ids().join(" ")
                );
            }
        } else if !fleet.is_empty() {
            log::info!("build: leaving {} instances running", fleet.len());
        }
        let mut outcome = self.done(name, ModelSource::Built, model, Some(reports));
        outcome.orphaned_instances = fleet.instance_ids().to_vec();
        Ok(outcome)
    }

    fn enter(&mut self, state: BuildState) {
        log::info!("build: -> {state:?}");
        self.states.push(state);
    }

    fn check_local(&self, name: &str) -> Option<TopicModel> {
        let path = self.settings.local_path(name);
        if !path.exists() {
            return None;
        }
        match TopicModel::load(&path) {
            Ok(model) => {
                log::info!("build: found {} locally", path.display());
                Some(model)
            }
            Err(e) => {
                log::warn!("build: ignoring corrupt cached model {}: {e}", path.display());
                None
            }
        }
    }

    fn check_remote(&self, name: &str) -> Option<TopicModel> {
        let s = self.settings;
        let key = s.remote_key(name);
        let bytes = match self.store.get(&s.bucket, &key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("build: remote lookup of {}/{key} failed: {e}", s.bucket);
                return None;
            }
        };
        let model = match TopicModel::from_slice(&bytes) {
            Ok(model) => model,
            Err(e) => {
                log::warn!("build: ignoring corrupt remote model {}/{key}: {e}", s.bucket);
                return None;
            }
        };
        log::info!("build: found {}/{key} remotely", s.bucket);
        let local = s.local_path(name);
        if let Err(e) = model.save(&local) {
            log::warn!("build: could not cache {} locally: {e}", local.display());
        }
        Some(model)
    }

    /// Launch the fleet while the corpus is gathered and filtered, then train.
    fn train(
        &mut self,
        controller: &FleetController<'_>,
        fleet: &mut NodeFleet,
        cancel: &CancelToken,
    ) -> Result<(TopicModel, BowCorpus), LdaError> {
        let s = self.settings;
        let launch_cancel = cancel.child();

        let (launched, prepared) = std::thread::scope(|scope| {
            let launcher = s.fleet.auto_launch.then(|| {
                scope.spawn(|| {
                    let started = Instant::now();
                    controller
                        .launch(
                            s.fleet.instance_count,
                            &s.fleet.bid_price,
                            &s.fleet.instance,
                            &launch_cancel,
                        )
                        .map(|f| (f, started.elapsed()))
                })
            });

            let prepared = self.prepare_corpus(cancel);
            if prepared.is_err() {
                launch_cancel.cancel();
            }
            let launched = launcher.map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(LdaError::Fleet("launch thread panicked".into())))
            });
            (launched, prepared)
        });

        let mut launch_error = None;
        match launched {
            Some(Ok((launched, wait))) => {
                *fleet = launched;
                self.fleet_wait = Some(wait);
            }
            Some(Err(e)) => {
                if let LdaError::Abandoned { request_ids, .. } = &e {
                    self.outstanding_requests = request_ids.clone();
                }
                launch_error = Some(e);
            }
            None => {}
        }
        let (dct, bow) = prepared?;
        if let Some(e) = launch_error {
            return Err(e);
        }

        if !fleet.is_empty() {
            log::info!("build: waiting {}s for nodes to boot", s.grace.as_secs());
            cancel.sleep(s.grace)?;
        }

        let request = TrainingRequest {
            num_topics: s.num_topics,
            distributed: s.fleet.auto_launch,
            id2word: dct.id2token(),
            corpus: bow.values().collect(),
        };
        let model = self.trainer.train(&request)?;
        cancel.check()?;
        Ok((model, bow))
    }

    fn prepare_corpus(&self, cancel: &CancelToken) -> Result<(Dictionary, BowCorpus), LdaError> {
        let s = self.settings;
        let corpus = self.sources.gather(&s.partition, s.workers, cancel)?;
        cancel.check()?;
        VocabularyFilter::new(s.stopword_count).build(&corpus)
    }

    /// Save locally, write the reports, then upload all three artifacts.
    fn persist(&self, name: &str, model: &TopicModel, bow: &BowCorpus) -> Result<ReportArtifacts, LdaError> {
        let s = self.settings;
        let local = s.local_path(name);
        model.save(&local)?;

        let dir = local.parent().unwrap_or(Path::new("."));
        let reports = report::write(bow, model, s.max_topic_frequency, dir, name)?;

        self.store.put(&s.bucket, &s.remote_key(name), &model.to_vec()?)?;
        for (artifact, path) in [
            (&reports.sparse_name, &reports.sparse_path),
            (&reports.summary_name, &reports.summary_path),
        ] {
            self.store.put(&s.bucket, &s.remote_key(artifact), &std::fs::read(path)?)?;
        }
        log::info!("build: uploaded {name} to {}/{}", s.bucket, s.remote_prefix);
        Ok(reports)
    }

    /// Remove local artifacts of a run that did not finish persisting, so the
    /// next run does not take them for a complete cached build.
    fn discard_local(&self, name: &str) {
        let s = self.settings;
        for artifact in [name.to_string(), report::sparse_name(name), report::summary_name(name)] {
            let path = s.local_path(&artifact);
            match std::fs::remove_file(&path) {
                Ok(()) => log::info!("build: discarded {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("build: could not discard {}: {e}", path.display()),
            }
        }
    }

    fn done(
        mut self,
        model_name: String,
        source: ModelSource,
        model: TopicModel,
        reports: Option<ReportArtifacts>,
    ) -> BuildOutcome {
        self.enter(BuildState::Done);
        log::info!("build: {model_name} ready ({})", source.as_str());
        BuildOutcome {
            model_name,
            source,
            model: Some(model),
            reports,
            states: self.states,
            failure: None,
            orphaned_instances: Vec::new(),
            outstanding_requests: Vec::new(),
            fleet_wait: self.fleet_wait,
        }
    }

    fn fail(
        mut self,
        model_name: String,
        controller: &FleetController<'_>,
        fleet: &mut NodeFleet,
        error: LdaError,
    ) -> BuildOutcome {
        log::error!("build: {model_name} failed: {error}");
        self.enter(BuildState::Failed);

        if !fleet.is_empty() {
            if self.settings.terminate_on_failure {
                if let Err(e) = controller.terminate(fleet) {
                    log::error!("build: terminate after failure: {e}");
                }
            } else {
                log::warn!(
                    "build: fleet left running, terminate with: pagelda terminate {}",
                    fleet.instance_ids().join(" ")
                );
            }
        }

        BuildOutcome {
            model_name,
            source: ModelSource::Built,
            model: None,
            reports: None,
            states: self.states,
            failure: Some(error.to_string()),
            orphaned_instances: fleet.instance_ids().to_vec(),
            outstanding_requests: self.outstanding_requests,
            fleet_wait: self.fleet_wait,
        }
    }
}
