use crate::job::FinishedFuzzingJob;
use crate::violation::PotentialViolation;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::hash::Hash;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while persisting or loading violation records.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Violation store I/O error: {0}")]
    Io(String),

    #[error("Violation store serialization error: {0}")]
    Serialization(String),

    #[error("Violation store deserialization error: {0}")]
    Deserialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// One side of a persisted violation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub configuration: BTreeMap<String, String>,
    pub option_under_investigation: Option<String>,
    pub fingerprint: String,
    pub result: Option<PathBuf>,
    pub elapsed_ms: u64,
}

impl From<&FinishedFuzzingJob> for JobRecord {
    fn from(finished: &FinishedFuzzingJob) -> Self {
        let configuration = finished.configuration();
        Self {
            configuration: configuration.to_string_map(),
            option_under_investigation: configuration.option_under_investigation.clone(),
            fingerprint: configuration.fingerprint(),
            result: finished.result.clone(),
            elapsed_ms: u64::try_from(finished.elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// The audit record of one [`PotentialViolation`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ViolationRecord {
    pub target: String,
    pub option: String,
    pub violated: bool,
    pub explicit: bool,
    pub transitive: bool,
    pub partial_orders: Vec<String>,
    pub job1: JobRecord,
    pub job2: JobRecord,
    pub job1_minus_job2: Vec<serde_json::Value>,
    pub job2_minus_job1: Vec<serde_json::Value>,
}

/// Serializes a difference set in a stable order.
fn sorted_values<T: Serialize>(set: &HashSet<T>) -> Result<Vec<serde_json::Value>, StoreError> {
    let mut values = set
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    values.sort_by_cached_key(|v| v.to_string());
    Ok(values)
}

impl ViolationRecord {
    pub fn from_violation<T>(violation: &PotentialViolation<T>) -> Result<Self, StoreError>
    where
        T: Eq + Hash + Clone + Serialize,
    {
        Ok(Self {
            target: violation.target().name.clone(),
            option: violation.option_name.clone(),
            violated: violation.violated(),
            explicit: violation.is_explicit(),
            transitive: violation.is_transitive(),
            partial_orders: violation
                .partial_orders
                .iter()
                .map(|o| o.to_string())
                .collect(),
            job1: JobRecord::from(&violation.job1),
            job2: JobRecord::from(&violation.job2),
            job1_minus_job2: sorted_values(violation.job1_minus_job2())?,
            job2_minus_job1: sorted_values(violation.job2_minus_job1())?,
        })
    }
}

/// Persists one JSON record per violation below a root folder.
///
/// The path is `<root>/<option>/<target-slug>/<fingerprint1>_<fingerprint2>.json`,
/// so the same pair always lands on the same file and is written once.
#[derive(Debug, Clone)]
pub struct ViolationStore {
    root: PathBuf,
}

impl ViolationStore {
    pub const RECORD_EXTENSION: &'static str = "json";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for<T: Eq + Hash>(&self, violation: &PotentialViolation<T>) -> PathBuf {
        self.root
            .join(&violation.option_name)
            .join(violation.job1.target().slug())
            .join(format!(
                "{}_{}.{}",
                violation.job1.configuration().fingerprint(),
                violation.job2.configuration().fingerprint(),
                Self::RECORD_EXTENSION
            ))
    }

    /// Writes the record unless one already exists. Returns its path and
    /// whether it was freshly written.
    pub fn persist<T>(&self, violation: &PotentialViolation<T>) -> Result<(PathBuf, bool), StoreError>
    where
        T: Eq + Hash + Clone + Serialize,
    {
        let path = self.path_for(violation);
        if path.is_file() {
            debug!(path = ?path, "Violation already recorded");
            return Ok((path, false));
        }
        let folder = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(folder).map_err(|e| {
            StoreError::Io(format!("Failed to create directory {:?}: {}", folder, e))
        })?;
        let record = ViolationRecord::from_violation(violation)?;
        // Staged beside the final path and renamed, so a record on disk is never partial.
        let mut staged = NamedTempFile::new_in(folder).map_err(|e| {
            StoreError::Io(format!("Failed to stage record in {:?}: {}", folder, e))
        })?;
        let mut writer = BufWriter::new(staged.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, &record).map_err(|e| {
            StoreError::Serialization(format!(
                "Failed to serialize violation record to JSON for {:?}: {}",
                path, e
            ))
        })?;
        writer.flush()?;
        drop(writer);
        staged.persist(&path).map_err(|e| {
            StoreError::Io(format!("Failed to move record into {:?}: {}", path, e.error))
        })?;
        if record.violated {
            info!(path = ?path, orders = ?record.partial_orders, "Recorded violation");
        }
        Ok((path, true))
    }

    pub fn load(&self, path: &Path) -> Result<ViolationRecord, StoreError> {
        let file = File::open(path)
            .map_err(|e| StoreError::Io(format!("Failed to open record {:?}: {}", path, e)))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            StoreError::Deserialization(format!(
                "Failed to parse JSON from record {:?}: {}. The file might be corrupted.",
                path, e
            ))
        })
    }
}

/// Minimizes confirmed violations. It only consumes core data and keeps its
/// own logs.
///
/// `still_violated` re-judges a violation rebuilt from re-executed jobs.
pub trait DeltaDebugger<T: Eq + Hash>: Send {
    fn minimize(
        &mut self,
        violation: &PotentialViolation<T>,
        still_violated: &dyn Fn(&PotentialViolation<T>) -> bool,
    ) -> Result<(), anyhow::Error>;
}

/// Hands nothing off; logs what would have been minimized.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpDeltaDebugger;

impl<T: Eq + Hash> DeltaDebugger<T> for NoOpDeltaDebugger {
    fn minimize(
        &mut self,
        violation: &PotentialViolation<T>,
        _still_violated: &dyn Fn(&PotentialViolation<T>) -> bool,
    ) -> Result<(), anyhow::Error> {
        debug!(violation = %violation, "Skipping minimization");
        Ok(())
    }
}

/// Violations worth minimizing: violated and anchored on explicit edges,
/// directly declared orders ahead of transitive ones.
pub fn delta_debugging_queue<T>(violations: &[PotentialViolation<T>]) -> Vec<&PotentialViolation<T>>
where
    T: Eq + Hash + Clone,
{
    let mut queue: Vec<&PotentialViolation<T>> = violations
        .iter()
        .filter(|v| v.violated() && v.is_explicit())
        .collect();
    queue.sort_by_key(|v| v.is_transitive());
    queue
}
