use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    /// Stop after this many rounds even if partial orders remain.
    #[serde(default)]
    pub max_rounds: Option<u64>,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub rng_seed: u64,
}

pub fn default_threads() -> usize {
    1
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            max_rounds: None,
            threads: default_threads(),
            rng_seed: 0,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CampaignSettings {
    #[serde(default = "default_orders_per_round")]
    pub orders_per_round: usize,
    #[serde(default = "default_benchmarks_per_round")]
    pub benchmarks_per_round: usize,
}

pub fn default_orders_per_round() -> usize {
    2
}

pub fn default_benchmarks_per_round() -> usize {
    4
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            orders_per_round: default_orders_per_round(),
            benchmarks_per_round: default_benchmarks_per_round(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RunnerSettings {
    /// Program and arguments. `{target}`, `{output}` and `{config}` are
    /// substituted per job; `{config}` expands to the non-default options.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_timeout_minutes() -> u64 {
    30
}

pub fn default_output_dir() -> PathBuf {
    PathBuf::from("./.ordfuzz/results")
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_minutes: default_timeout_minutes(),
            working_dir: None,
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SpaceSettings {
    pub path: PathBuf,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct BenchmarkSettings {
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SeedSettings {
    /// External generator; without one, seeds are drawn from the space itself.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default = "default_option_probability")]
    pub option_probability: f64,
}

fn default_option_probability() -> f64 {
    0.5
}

impl Default for SeedSettings {
    fn default() -> Self {
        Self {
            command: None,
            option_probability: default_option_probability(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReaderKind {
    #[default]
    Lines,
    Json,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ReportSettings {
    #[serde(default = "default_violations_dir")]
    pub violations_dir: PathBuf,
    #[serde(default)]
    pub ground_truth_dir: Option<PathBuf>,
    #[serde(default)]
    pub reader: ReaderKind,
}

pub fn default_violations_dir() -> PathBuf {
    PathBuf::from("./.ordfuzz/violations")
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            violations_dir: default_violations_dir(),
            ground_truth_dir: None,
            reader: ReaderKind::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct OrdfuzzConfig {
    #[serde(default)]
    pub fuzzer: Option<FuzzerSettings>,
    #[serde(default)]
    pub campaign: CampaignSettings,
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub space: Option<SpaceSettings>,
    #[serde(default)]
    pub benchmarks: BenchmarkSettings,
    #[serde(default)]
    pub seeds: SeedSettings,
    #[serde(default)]
    pub report: ReportSettings,
}

impl OrdfuzzConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: OrdfuzzConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid config file {:?}: {}", path, e))?;
        Ok(config)
    }

    /// Rejects values that would stall the campaign loop or break sampling.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.campaign.orders_per_round == 0 {
            anyhow::bail!("campaign.orders-per-round must be at least 1");
        }
        if self.campaign.benchmarks_per_round == 0 {
            anyhow::bail!("campaign.benchmarks-per-round must be at least 1");
        }
        let probability = self.seeds.option_probability;
        if !(0.0..=1.0).contains(&probability) {
            anyhow::bail!("seeds.option-probability must be within [0, 1], got {probability}");
        }
        Ok(())
    }

    pub fn fuzzer_settings(&self) -> FuzzerSettings {
        self.fuzzer.clone().unwrap_or_default()
    }
}
