use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pagelda", version, about = "Build per-partition LDA topic models of wiki pages")]
pub struct Cli {
    /// Config file (default ~/.pagelda/config.toml)
    #[arg(long, env = "PAGELDA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build (or fetch from cache) the topic model for a partition
    Build(BuildArgs),
    /// Rank and print the stopword tokens of a JSON corpus
    Stopwords(StopwordsArgs),
    /// Terminate instances left running after a failed build
    Terminate(TerminateArgs),
}

/// Every flag overrides the matching `[build]`/`[fleet]` config value.
#[derive(Parser, Debug, Default)]
pub struct BuildArgs {
    /// Partition (wiki) id
    #[arg(long, env = "PAGELDA_PARTITION")]
    pub partition: Option<String>,

    /// Number of topics (default 999)
    #[arg(long, env = "PAGELDA_NUM_TOPICS")]
    pub num_topics: Option<usize>,

    /// Topics seen in this many documents or more are left out of the
    /// sparse export (default 500)
    #[arg(long, env = "PAGELDA_MAX_TOPIC_FREQUENCY")]
    pub max_topic_frequency: Option<usize>,

    /// Term extraction worker threads (default 8)
    #[arg(long, env = "PAGELDA_WORKERS")]
    pub workers: Option<usize>,

    /// Model name prefix (default: current time, %Y-%m-%d-%H-%M)
    #[arg(long, env = "PAGELDA_MODEL_PREFIX")]
    pub model_prefix: Option<String>,

    /// Local artifact directory (default /mnt/)
    #[arg(long, env = "PAGELDA_LOCAL_PREFIX")]
    pub local_prefix: Option<String>,

    /// Remote key prefix (default models/page/)
    #[arg(long, env = "PAGELDA_REMOTE_PREFIX")]
    pub remote_prefix: Option<String>,

    /// Launch a compute fleet before training (default true)
    #[arg(long, env = "PAGELDA_AUTO_LAUNCH")]
    pub auto_launch: Option<bool>,

    /// Instances to request (default 20)
    #[arg(long, env = "PAGELDA_INSTANCE_COUNT")]
    pub instance_count: Option<usize>,

    /// Bid price per instance-hour (default 0.80)
    #[arg(long, env = "PAGELDA_BID_PRICE")]
    pub bid_price: Option<String>,

    /// Machine image for fleet nodes
    #[arg(long, env = "PAGELDA_IMAGE_ID")]
    pub image_id: Option<String>,

    /// Code revision stamped into the model name (default: git HEAD)
    #[arg(long, env = "PAGELDA_CODE_REVISION")]
    pub code_revision: Option<String>,

    /// Stopword tokens removed from the vocabulary (default 300)
    #[arg(long, env = "PAGELDA_STOPWORD_COUNT")]
    pub stopword_count: Option<usize>,

    /// Seconds to wait for fleet nodes to boot before training (default 300)
    #[arg(long, env = "PAGELDA_GRACE_SECS")]
    pub grace_secs: Option<u64>,

    /// Keep the fleet running after a successful build
    #[arg(long)]
    pub no_terminate_on_complete: bool,

    /// Terminate the fleet when the build fails
    #[arg(long)]
    pub terminate_on_failure: bool,
}

#[derive(Parser, Debug)]
pub struct StopwordsArgs {
    /// JSON object mapping document id to its list of terms
    pub corpus: PathBuf,

    /// Number of tokens to remove
    #[arg(long, default_value_t = crate::stopwords::DEFAULT_STOPWORD_COUNT)]
    pub count: usize,

    /// Normalize raw terms (stopword removal, stemming) first
    #[arg(long)]
    pub normalize: bool,

    /// Print every token's scores, not only the removed ones
    #[arg(long)]
    pub all: bool,
}

#[derive(Parser, Debug)]
pub struct TerminateArgs {
    /// Instance ids to terminate
    #[arg(required = true)]
    pub instance_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn build_flags_parse() {
        let cli = Cli::try_parse_from([
            "pagelda",
            "build",
            "--partition",
            "831",
            "--num-topics",
            "50",
            "--auto-launch",
            "false",
            "--no-terminate-on-complete",
        ])
        .unwrap();
        let Command::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.partition.as_deref(), Some("831"));
        assert_eq!(args.num_topics, Some(50));
        assert_eq!(args.auto_launch, Some(false));
        assert!(args.no_terminate_on_complete);
        assert!(!args.terminate_on_failure);
    }

    #[test]
    fn terminate_requires_ids() {
        assert!(Cli::try_parse_from(["pagelda", "terminate"]).is_err());
    }
}
