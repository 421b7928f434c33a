use clap::Parser;
use pagelda::LdaError;
use pagelda::build::Orchestrator;
use pagelda::cancel::CancelToken;
use pagelda::cli::{BuildArgs, Cli, Command, StopwordsArgs, TerminateArgs};
use pagelda::config::{self, LdaConfig};
use pagelda::corpus::{Corpus, Dictionary};
use pagelda::fleet::{FleetController, HttpComputeProvider, NodeFleet};
use pagelda::model::CommandTrainer;
use pagelda::services::ServiceRegistry;
use pagelda::{metrics, normalize, stopwords, store};
use std::path::Path;
use std::process::ExitCode;
use std::time::{Duration, Instant};

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Cancel `cancel` on Ctrl-C. The listener lives on its own thread so the
/// build itself stays synchronous.
fn install_interrupt_handler(cancel: CancelToken) {
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                log::warn!("signal runtime: {e}");
                return;
            }
        };
        rt.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupt received, stopping");
                cancel.cancel();
            }
        });
    });
}

fn load(path: Option<&Path>) -> Result<LdaConfig, LdaError> {
    match path {
        Some(p) => config::load_config_from(p),
        None => config::load_config(),
    }
}

fn handle_build(config: &LdaConfig, args: &BuildArgs, cancel: &CancelToken) -> Result<ExitCode, LdaError> {
    let settings = config::resolve_build_settings(config, args)?;
    let store = store::open_store(&config.store)?;
    let sources = ServiceRegistry::default().build(&config.services)?;
    let provider = HttpComputeProvider::new(&config.fleet.endpoint, PROVIDER_TIMEOUT);
    let trainer = CommandTrainer::new(config.trainer.program.clone(), config.trainer.args.clone());

    let started = Instant::now();
    let outcome = Orchestrator::new(&settings, store.as_ref(), &sources, &provider, &trainer).run(cancel)?;
    metrics::record_build(&config.metrics, &outcome, &settings.partition, started.elapsed());

    if !outcome.orphaned_instances.is_empty() {
        eprintln!(
            "pagelda: instances still running: {}",
            outcome.orphaned_instances.join(" ")
        );
    }
    if !outcome.outstanding_requests.is_empty() {
        eprintln!(
            "pagelda: capacity requests possibly still open: {}",
            outcome.outstanding_requests.join(" ")
        );
    }
    if let Some(reason) = &outcome.failure {
        eprintln!("pagelda: build of {} failed: {reason}", outcome.model_name);
        return Ok(ExitCode::from(2));
    }
    println!("{}", outcome.model_name);
    Ok(ExitCode::SUCCESS)
}

fn handle_stopwords(args: &StopwordsArgs) -> Result<ExitCode, LdaError> {
    let content = std::fs::read_to_string(&args.corpus)?;
    let mut corpus: Corpus = serde_json::from_str(&content)?;
    if args.normalize {
        corpus = corpus
            .into_iter()
            .map(|(id, terms)| (id, normalize::normalize_terms(terms)))
            .filter(|(_, terms)| !terms.is_empty())
            .collect();
    }

    let dct = Dictionary::from_documents(corpus.values());
    let ranking = stopwords::rank_stopwords(&corpus, &dct)?;
    let shown = if args.all { ranking.len() } else { args.count.min(ranking.len()) };

    println!("token\tcombined\tvalue_rank\tentropy_rank\tstatistical_value\tentropy\tdoc_freq");
    for score in &ranking[..shown] {
        println!(
            "{}\t{}\t{}\t{}\t{:.6}\t{:.6}\t{}",
            dct.token(score.id).unwrap_or("?"),
            score.combined(),
            score.value_rank,
            score.entropy_rank,
            score.statistical_value,
            score.entropy,
            dct.doc_freq(score.id).unwrap_or(0)
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_terminate(config: &LdaConfig, args: &TerminateArgs) -> Result<ExitCode, LdaError> {
    let provider = HttpComputeProvider::new(&config.fleet.endpoint, PROVIDER_TIMEOUT);
    let controller = FleetController::new(&provider, Default::default());
    let mut fleet = NodeFleet::new(args.instance_ids.clone());
    controller.terminate(&mut fleet)?;
    Ok(ExitCode::SUCCESS)
}

fn run() -> Result<ExitCode, LdaError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Build(args) => {
            let config = load(cli.config.as_deref())?;
            let cancel = CancelToken::new();
            install_interrupt_handler(cancel.clone());
            handle_build(&config, &args, &cancel)
        }
        Command::Stopwords(args) => handle_stopwords(&args),
        Command::Terminate(args) => {
            let config = load(cli.config.as_deref())?;
            handle_terminate(&config, &args)
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(code) => code,
        Err(e) if e.is_interrupted() => {
            eprintln!("pagelda: interrupted");
            ExitCode::from(130)
        }
        Err(e) => {
            eprintln!("pagelda: {e}");
            ExitCode::from(1)
        }
    }
}
