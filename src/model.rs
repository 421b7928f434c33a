use crate::LdaError;
use crate::corpus::BowDocument;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command as ProcessCommand, Stdio};

fn default_minimum_probability() -> f64 {
    0.01
}

/// Trained topic model as produced by the external trainer.
///
/// `topics[k][w]` is the probability of term `w` under topic `k`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicModel {
    pub num_topics: usize,
    pub id2word: Vec<String>,
    pub topics: Vec<Vec<f64>>,
    /// Topic weights below this are dropped when projecting a document.
    #[serde(default = "default_minimum_probability")]
    pub minimum_probability: f64,
}

impl TopicModel {
    /// Reject artifacts whose shape does not add up.
    pub fn validate(&self) -> Result<(), LdaError> {
        if self.num_topics == 0 {
            return Err(LdaError::Model("model has no topics".into()));
        }
        if self.topics.len() != self.num_topics {
            return Err(LdaError::Model(format!(
                "expected {} topic rows, found {}",
                self.num_topics,
                self.topics.len()
            )));
        }
        let vocab = self.id2word.len();
        if let Some((k, row)) = self.topics.iter().enumerate().find(|(_, r)| r.len() != vocab) {
            return Err(LdaError::Model(format!(
                "topic {k} has {} weights for a vocabulary of {vocab}",
                row.len()
            )));
        }
        Ok(())
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, LdaError> {
        let model: TopicModel = serde_json::from_slice(bytes)?;
        model.validate()?;
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self, LdaError> {
        Self::from_slice(&std::fs::read(path)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, LdaError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), LdaError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_vec()?)?;
        Ok(())
    }

    /// Project a bag-of-words vector onto the topics: each topic's weight is
    /// proportional to a uniform prior plus the count-weighted term
    /// probabilities. Returns `(topic, weight)` pairs at or above
    /// `minimum_probability`, ascending by topic.
    pub fn infer(&self, bow: &BowDocument) -> Vec<(usize, f64)> {
        let prior = 1.0 / self.num_topics as f64;
        let raw: Vec<f64> = self
            .topics
            .iter()
            .map(|row| {
                prior
                    + bow
                        .iter()
                        .map(|&(id, count)| {
                            count as f64 * row.get(id as usize).copied().unwrap_or(0.0)
                        })
                        .sum::<f64>()
            })
            .collect();
        let total: f64 = raw.iter().sum();
        raw.into_iter()
            .map(|w| w / total)
            .enumerate()
            .filter(|&(_, w)| w > 0.0 && w >= self.minimum_probability)
            .collect()
    }

    /// The `topn` most probable terms of `topic`, highest first.
    pub fn top_terms(&self, topic: usize, topn: usize) -> Vec<(&str, f64)> {
        let Some(row) = self.topics.get(topic) else {
            return Vec::new();
        };
        let mut ranked: Vec<(usize, f64)> = row.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
            .into_iter()
            .take(topn)
            .map(|(id, w)| (self.id2word[id].as_str(), w))
            .collect()
    }

    /// One line per topic: `0.052*moon + 0.031*tide + ...`.
    pub fn show_topics(&self, topn: usize) -> Vec<String> {
        (0..self.num_topics)
            .map(|k| {
                self.top_terms(k, topn)
                    .iter()
                    .map(|(term, w)| format!("{w:.3}*{term}"))
                    .collect::<Vec<_>>()
                    .join(" + ")
            })
            .collect()
    }
}

/// Input handed to a trainer.
#[derive(Debug, Serialize)]
pub struct TrainingRequest<'a> {
    pub num_topics: usize,
    pub distributed: bool,
    pub id2word: &'a [String],
    pub corpus: Vec<&'a BowDocument>,
}

pub trait Trainer: Send + Sync {
    fn train(&self, request: &TrainingRequest<'_>) -> Result<TopicModel, LdaError>;
}

/// Runs `{program} {args..} --input <request.json> --output <model.json>`
/// and loads the model it writes.
pub struct CommandTrainer {
    program: String,
    args: Vec<String>,
}

impl CommandTrainer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Trainer for CommandTrainer {
    fn train(&self, request: &TrainingRequest<'_>) -> Result<TopicModel, LdaError> {
        let dir = tempfile::TempDir::new()?;
        let input = dir.path().join("request.json");
        let output = dir.path().join("model.json");
        std::fs::write(&input, serde_json::to_vec(request)?)?;

        log::info!(
            "trainer: {} documents, {} topics, distributed={}",
            request.corpus.len(),
            request.num_topics,
            request.distributed
        );
        let status = ProcessCommand::new(&self.program)
            .args(&self.args)
            .arg("--input")
            .arg(&input)
            .arg("--output")
            .arg(&output)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| LdaError::Trainer(format!("cannot run {}: {e}", self.program)))?;
        if !status.success() {
            return Err(LdaError::Trainer(format!(
                "{} exited with {status}",
                self.program
            )));
        }

        let model = TopicModel::load(&output)
            .map_err(|e| LdaError::Trainer(format!("unreadable model from {}: {e}", self.program)))?;
        if model.num_topics != request.num_topics || model.id2word.len() != request.id2word.len() {
            return Err(LdaError::Trainer(format!(
                "model shape {}x{} does not match request {}x{}",
                model.num_topics,
                model.id2word.len(),
                request.num_topics,
                request.id2word.len()
            )));
        }
        Ok(model)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two topics over `[moon, tide, wolf, howl]`.
    pub(crate) fn sample_model() -> TopicModel {
        TopicModel {
            num_topics: 2,
            id2word: vec!["moon".into(), "tide".into(), "wolf".into(), "howl".into()],
            topics: vec![vec![0.5, 0.4, 0.05, 0.05], vec![0.05, 0.05, 0.5, 0.4]],
            minimum_probability: 0.01,
        }
    }

    #[test]
    fn infer_prefers_matching_topic() {
        let model = sample_model();
        let dist = model.infer(&vec![(0, 3), (1, 1)]);
        assert_eq!(dist.len(), 2);
        assert!(dist[0].1 > dist[1].1);
        let total: f64 = dist.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn infer_drops_negligible_topics() {
        let mut model = sample_model();
        model.topics = vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 0.0, 0.0, 1.0]];
        model.minimum_probability = 0.2;
        let dist = model.infer(&vec![(0, 50)]);
        assert_eq!(dist.len(), 1);
        assert_eq!(dist[0].0, 0);
    }

    #[test]
    fn show_topics_formats_top_terms() {
        let lines = sample_model().show_topics(2);
        assert_eq!(lines, vec!["0.500*moon + 0.400*tide", "0.500*wolf + 0.400*howl"]);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sub/x.model");
        let model = sample_model();
        model.save(&path).unwrap();
        assert_eq!(TopicModel::load(&path).unwrap(), model);
    }

    #[test]
    fn corrupt_artifacts_rejected() {
        assert!(TopicModel::from_slice(b"not json").is_err());
        let mut model = sample_model();
        model.topics.pop();
        let bytes = serde_json::to_vec(&model).unwrap();
        assert!(matches!(
            TopicModel::from_slice(&bytes).unwrap_err(),
            LdaError::Model(_)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn command_trainer_reads_output() {
        let model = TopicModel {
            num_topics: 1,
            id2word: vec!["a".into()],
            topics: vec![vec![1.0]],
            minimum_probability: 0.01,
        };
        let json = serde_json::to_string(&model).unwrap();
        // $4 is the --output path
        let trainer = CommandTrainer::new(
            "sh",
            vec!["-c".into(), format!("printf '%s' '{json}' > \"$4\""), "trainer".into()],
        );
        let id2word = vec!["a".to_string()];
        let doc: BowDocument = vec![(0, 2)];
        let request = TrainingRequest {
            num_topics: 1,
            distributed: false,
            id2word: &id2word,
            corpus: vec![&doc],
        };
        assert_eq!(trainer.train(&request).unwrap(), model);
    }

    #[cfg(unix)]
    #[test]
    fn command_trainer_failure_is_reported() {
        let trainer = CommandTrainer::new("sh", vec!["-c".into(), "exit 3".into()]);
        let id2word: Vec<String> = Vec::new();
        let request = TrainingRequest {
            num_topics: 1,
            distributed: false,
            id2word: &id2word,
            corpus: Vec::new(),
        };
        let err = trainer.train(&request).unwrap_err();
        assert!(matches!(err, LdaError::Trainer(_)));
    }

    #[test]
    fn missing_trainer_binary() {
        let trainer = CommandTrainer::new("/nonexistent/pagelda-train", Vec::new());
        let id2word: Vec<String> = Vec::new();
        let request = TrainingRequest {
            num_topics: 1,
            distributed: false,
            id2word: &id2word,
            corpus: Vec::new(),
        };
        assert!(trainer.train(&request).unwrap_err().to_string().contains("cannot run"));
    }
}
