use crate::configuration::Configuration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Extension of raw tool output files.
pub const OUTPUT_EXTENSION: &str = "out";

/// Hex digits of the name digest appended to a benchmark slug.
const SLUG_DIGEST_LEN: usize = 8;

/// A benchmark program the analysis tool is run against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Benchmark {
    pub name: String,
}

impl Benchmark {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// A folder name for this target: the name with unsafe characters
    /// replaced, followed by a short digest of the exact name, so distinct
    /// names never share a folder.
    pub fn slug(&self) -> String {
        let readable: String = self
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let digest = format!("{:x}", md5::compute(self.name.as_bytes()));
        format!("{readable}-{}", &digest[..SLUG_DIGEST_LEN])
    }
}

impl fmt::Display for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A configuration bound to the benchmark it runs on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuzzingJob {
    pub configuration: Configuration,
    pub target: Benchmark,
}

impl FuzzingJob {
    pub fn new(configuration: Configuration, target: Benchmark) -> Self {
        Self {
            configuration,
            target,
        }
    }

    pub fn option_under_investigation(&self) -> Option<&str> {
        self.configuration.option_under_investigation.as_deref()
    }

    /// Where this job's raw output lives under `output_folder`. The name is
    /// derived from the configuration fingerprint, so it is the same every
    /// time the same configuration runs on the same target.
    pub fn output_path(&self, output_folder: &Path) -> PathBuf {
        output_folder
            .join(self.target.slug())
            .join(format!("{}.{}", self.configuration.fingerprint(), OUTPUT_EXTENSION))
    }
}

/// The outcome of running a [`FuzzingJob`].
///
/// `result` is `None` when the run failed beyond recovery; such jobs never
/// take part in comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedFuzzingJob {
    pub job: FuzzingJob,
    pub elapsed: Duration,
    pub result: Option<PathBuf>,
}

impl FinishedFuzzingJob {
    pub fn new(job: FuzzingJob, elapsed: Duration, result: Option<PathBuf>) -> Self {
        Self {
            job,
            elapsed,
            result,
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.job.configuration
    }

    pub fn target(&self) -> &Benchmark {
        &self.job.target
    }
}
