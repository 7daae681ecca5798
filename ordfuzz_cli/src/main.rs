use ordfuzz_core::campaign::CampaignGenerator;
use ordfuzz_core::config::{OrdfuzzConfig, ReaderKind, SpaceSettings};
use ordfuzz_core::executor::{CommandRunner, CommandRunnerConfig};
use ordfuzz_core::fuzzer::Fuzzer;
use ordfuzz_core::job::Benchmark;
use ordfuzz_core::oracle::ViolationEngine;
use ordfuzz_core::reader::{GroundTruth, JsonValueReader, LineReader, Reader};
use ordfuzz_core::report::ViolationStore;
use ordfuzz_core::seed::{CommandSeedSource, RandomSeedSource, SeedSource};
use ordfuzz_core::tool::Tool;

use anyhow::{Context, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "ordfuzz.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Configuration-space JSON artifact.
    #[clap(short, long)]
    space: Option<PathBuf>,
    /// Benchmark target; repeat to give several. Replaces the configured list.
    #[clap(short, long = "target")]
    targets: Vec<String>,
    #[clap(short = 'r', long)]
    max_rounds: Option<u64>,
    #[clap(short = 'j', long)]
    threads: Option<usize>,
    #[clap(long)]
    rng_seed: Option<u64>,
    #[clap(short, long)]
    output_dir: Option<PathBuf>,
    #[clap(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<OrdfuzzConfig, anyhow::Error> {
    match &cli.config_file {
        Some(config_path) => {
            info!(path = ?config_path, "Loading configuration");
            OrdfuzzConfig::load_from_file(config_path)
        }
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                info!(path = ?default_config_path, "Loading default configuration file");
                OrdfuzzConfig::load_from_file(&default_config_path)
            } else {
                info!("No configuration file found, using built-in defaults");
                Ok(OrdfuzzConfig::default())
            }
        }
    }
}

fn apply_overrides(cli: Cli, config: &mut OrdfuzzConfig) {
    if let Some(path) = cli.space {
        config.space = Some(SpaceSettings { path });
    }
    if !cli.targets.is_empty() {
        config.benchmarks.targets = cli.targets;
    }
    let fuzzer = config.fuzzer.get_or_insert_with(Default::default);
    if let Some(max_rounds) = cli.max_rounds {
        fuzzer.max_rounds = Some(max_rounds);
    }
    if let Some(threads) = cli.threads {
        fuzzer.threads = threads;
    }
    if let Some(rng_seed) = cli.rng_seed {
        fuzzer.rng_seed = rng_seed;
    }
    if let Some(output_dir) = cli.output_dir {
        config.runner.output_dir = output_dir;
    }
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = load_config(&cli)?;
    apply_overrides(cli, &mut config);
    info!(?config, "Effective configuration");

    let space = config
        .space
        .as_ref()
        .context("No configuration space given: set [space] path or pass --space")?;
    let tool = Arc::new(
        Tool::load_from_file(&space.path)
            .with_context(|| format!("Failed to load configuration space {:?}", space.path))?,
    );
    let benchmarks: Vec<Benchmark> = config
        .benchmarks
        .targets
        .iter()
        .map(Benchmark::new)
        .collect();

    let seeds: Box<dyn SeedSource> = match &config.seeds.command {
        Some(command) => Box::new(CommandSeedSource::new(
            command.clone(),
            config.runner.working_dir.clone(),
        )),
        None => Box::new(
            RandomSeedSource::new(tool.clone())
                .with_option_probability(config.seeds.option_probability),
        ),
    };

    let fuzzer_settings = config.fuzzer_settings();
    let generator = CampaignGenerator::new(
        tool.clone(),
        seeds,
        benchmarks.clone(),
        config.campaign.clone(),
        fuzzer_settings.rng_seed,
    )?;

    if config.runner.command.is_empty() {
        bail!("No runner command configured: set [runner] command");
    }
    let runner = CommandRunner::new(
        CommandRunnerConfig {
            command: config.runner.command.clone(),
            timeout: Duration::from_secs(config.runner.timeout_minutes * 60),
            working_dir: config.runner.working_dir.clone(),
        },
        tool.clone(),
    );

    let reader: Arc<dyn Reader<String>> = match config.report.reader {
        ReaderKind::Lines => Arc::new(LineReader),
        ReaderKind::Json => Arc::new(JsonValueReader),
    };
    let mut engine = ViolationEngine::new(tool, reader.clone());
    if let Some(dir) = &config.report.ground_truth_dir {
        let truth = GroundTruth::load(reader.as_ref(), dir, &benchmarks)
            .with_context(|| format!("Failed to load ground truth from {dir:?}"))?;
        engine = engine.with_ground_truth(Arc::new(truth));
    }

    let mut fuzzer = Fuzzer::new(
        generator,
        Box::new(runner),
        engine,
        config.runner.output_dir.clone(),
        fuzzer_settings.threads,
    )?
    .with_store(ViolationStore::new(config.report.violations_dir.clone()))
    .with_max_rounds(fuzzer_settings.max_rounds);

    let stats = fuzzer.run()?;
    println!("Campaign loop finished in {:.2?}.", stats.elapsed);
    println!(
        "Rounds: {}, Jobs: {} ({} failed), Comparisons: {}, Violations: {} ({} transitive)",
        stats.rounds,
        stats.jobs_run,
        stats.failed_jobs,
        stats.comparisons,
        stats.violations,
        stats.transitive_violations
    );
    if let Some(reason) = stats.stop_reason {
        println!("Stopped: {reason:?}");
    }

    Ok(())
}
