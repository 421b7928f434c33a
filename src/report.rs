use crate::LdaError;
use crate::corpus::BowCorpus;
use crate::model::TopicModel;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Terms listed per topic in the summary file.
pub const SUMMARY_TOP_TERMS: usize = 15;

/// Topic id → number of documents the topic appears in.
pub type TopicFrequencyTally = BTreeMap<usize, usize>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifacts {
    pub sparse_name: String,
    pub sparse_path: PathBuf,
    pub summary_name: String,
    pub summary_path: PathBuf,
}

pub fn sparse_name(model_name: &str) -> String {
    model_name.replace(".model", "-sparse-topics.csv")
}

pub fn summary_name(model_name: &str) -> String {
    model_name.replace(".model", "-topic-features.csv")
}

pub fn topic_tally(bow: &BowCorpus, model: &TopicModel) -> TopicFrequencyTally {
    let mut tally = TopicFrequencyTally::new();
    for vec in bow.values() {
        for (topic, _) in model.infer(vec) {
            *tally.entry(topic).or_insert(0) += 1;
        }
    }
    tally
}

/// One row per document: the id, then `topic-weight` for every topic seen
/// in fewer than `max_topic_frequency` documents.
pub fn sparse_rows(
    bow: &BowCorpus,
    model: &TopicModel,
    tally: &TopicFrequencyTally,
    max_topic_frequency: usize,
) -> String {
    let eligible: Vec<usize> = (0..model.num_topics)
        .filter(|t| tally.get(t).copied().unwrap_or(0) < max_topic_frequency)
        .collect();

    let mut out = String::new();
    for (name, vec) in bow {
        let weights: BTreeMap<usize, f64> = model.infer(vec).into_iter().collect();
        out.push_str(name);
        for t in &eligible {
            let _ = write!(out, ",{t}-{:.8}", weights.get(t).copied().unwrap_or(0.0));
        }
        out.push('\n');
    }
    out
}

/// Write the sparse topic export and topic summary under `dir`.
pub fn write(
    bow: &BowCorpus,
    model: &TopicModel,
    max_topic_frequency: usize,
    dir: &Path,
    model_name: &str,
) -> Result<ReportArtifacts, LdaError> {
    std::fs::create_dir_all(dir)?;

    let tally = topic_tally(bow, model);
    let suppressed = (0..model.num_topics)
        .filter(|t| tally.get(t).copied().unwrap_or(0) >= max_topic_frequency)
        .count();
    log::info!(
        "report: {} documents, {suppressed} of {} topics over frequency {max_topic_frequency}",
        bow.len(),
        model.num_topics
    );

    let sparse_name = sparse_name(model_name);
    let sparse_path = dir.join(&sparse_name);
    std::fs::write(&sparse_path, sparse_rows(bow, model, &tally, max_topic_frequency))?;

    let summary_name = summary_name(model_name);
    let summary_path = dir.join(&summary_name);
    std::fs::write(&summary_path, model.show_topics(SUMMARY_TOP_TERMS).join("\n"))?;

    Ok(ReportArtifacts {
        sparse_name,
        sparse_path,
        summary_name,
        summary_path,
    })
}
