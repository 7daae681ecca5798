use crate::configuration::FLAG_VALUE;
use crate::tool::Tool;
use anyhow::{Context, anyhow};
use rand::Rng;
use rand::seq::IndexedRandom;
use rand_core::RngCore;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

/// Probability that [`RandomSeedSource`] sets any given option.
const DEFAULT_OPTION_PROBABILITY: f64 = 0.5;

/// Produces syntactically valid `--option value --flag ...` strings on demand.
///
/// An `Err` is a fatal collaborator failure and ends the campaign loop; a
/// string the parser rejects is not an error here.
pub trait SeedSource: Send {
    fn next_seed(&mut self, rng: &mut dyn RngCore) -> Result<String, anyhow::Error>;
}

/// Runs an external generator command and takes its stdout as the seed string.
#[derive(Debug, Clone)]
pub struct CommandSeedSource {
    command: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandSeedSource {
    pub fn new(command: Vec<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            command,
            working_dir,
        }
    }
}

impl SeedSource for CommandSeedSource {
    fn next_seed(&mut self, _rng: &mut dyn RngCore) -> Result<String, anyhow::Error> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("Seed generator command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = &self.working_dir {
            cmd.current_dir(cwd);
        }
        let output = cmd
            .output()
            .with_context(|| format!("Failed to spawn seed generator {:?}", self.command))?;
        if !output.status.success() {
            return Err(anyhow!(
                "Seed generator {:?} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let seed = String::from_utf8(output.stdout)
            .context("Seed generator produced non UTF-8 output")?;
        Ok(seed.trim().to_string())
    }
}

/// Builds random seed strings straight from the configuration space: each
/// option is set with some probability to a registered level or, for
/// integer options, to a value drawn from the range.
#[derive(Debug, Clone)]
pub struct RandomSeedSource {
    tool: Arc<Tool>,
    option_probability: f64,
}

impl RandomSeedSource {
    pub fn new(tool: Arc<Tool>) -> Self {
        Self {
            tool,
            option_probability: DEFAULT_OPTION_PROBABILITY,
        }
    }

    pub fn with_option_probability(mut self, probability: f64) -> Self {
        if probability.is_finite() {
            self.option_probability = probability.clamp(0.0, 1.0);
        }
        self
    }
}

impl SeedSource for RandomSeedSource {
    fn next_seed(&mut self, rng: &mut dyn RngCore) -> Result<String, anyhow::Error> {
        let mut parts: Vec<String> = Vec::new();
        for option in self.tool.options() {
            if !rng.random_bool(self.option_probability) {
                continue;
            }
            let value = if option.is_integer() {
                option.sample_value(rng).map(|v| v.to_string())
            } else {
                let candidates: Vec<_> = option
                    .levels()
                    .iter()
                    .filter(|l| !l.is_sentinel())
                    .collect();
                candidates.choose(rng).map(|l| l.level_name.clone())
            };
            let Some(value) = value else {
                continue;
            };
            parts.push(format!("--{}", option.name));
            if value != FLAG_VALUE {
                parts.push(value);
            }
        }
        Ok(parts.join(" "))
    }
}
