use crate::job::Benchmark;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::hash::Hash;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Extension of per-benchmark ground-truth files.
pub const GROUND_TRUTH_EXTENSION: &str = "truth";

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Failed to read output {path:?}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("Malformed output {path:?}: {message}")]
    Malformed { path: PathBuf, message: String },
}

/// Parses a tool's raw output into a comparable set of results.
///
/// Absent or empty output must yield an empty set, not an error.
pub trait Reader<T>: Send + Sync {
    fn read(&self, path: &Path) -> Result<HashSet<T>, ReadError>;
}

/// Reads `path`, degrading a parse failure to an empty set with a warning.
pub fn read_or_empty<T>(reader: &dyn Reader<T>, path: &Path) -> HashSet<T> {
    match reader.read(path) {
        Ok(results) => results,
        Err(e) => {
            warn!(error = %e, "Treating unreadable output as empty");
            HashSet::new()
        }
    }
}

fn read_text(path: &Path) -> Result<Option<String>, ReadError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ReadError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

/// One result per non-empty line, surrounding whitespace trimmed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineReader;

impl Reader<String> for LineReader {
    fn read(&self, path: &Path) -> Result<HashSet<String>, ReadError> {
        let Some(content) = read_text(path)? else {
            return Ok(HashSet::new());
        };
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Reads a JSON array of results.
#[derive(Debug)]
pub struct JsonReader<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonReader<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonReader<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned + Eq + Hash> Reader<T> for JsonReader<T> {
    fn read(&self, path: &Path) -> Result<HashSet<T>, ReadError> {
        let Some(content) = read_text(path)? else {
            return Ok(HashSet::new());
        };
        if content.trim().is_empty() {
            return Ok(HashSet::new());
        }
        let items: Vec<T> = serde_json::from_str(&content).map_err(|e| ReadError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(items.into_iter().collect())
    }
}

/// Reads a JSON array of arbitrary values, each kept as its compact JSON
/// text. Object keys serialize sorted, so equal values compare equal.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonValueReader;

impl Reader<String> for JsonValueReader {
    fn read(&self, path: &Path) -> Result<HashSet<String>, ReadError> {
        let Some(content) = read_text(path)? else {
            return Ok(HashSet::new());
        };
        if content.trim().is_empty() {
            return Ok(HashSet::new());
        }
        let items: Vec<serde_json::Value> =
            serde_json::from_str(&content).map_err(|e| ReadError::Malformed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Ok(items.iter().map(|v| v.to_string()).collect())
    }
}

/// Results split against a ground truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified<T: Eq + Hash> {
    pub true_positives: HashSet<T>,
    pub false_positives: HashSet<T>,
}

/// Known true results per benchmark. Anything a tool reports that is not a
/// known true result counts as a false positive.
#[derive(Debug, Clone)]
pub struct GroundTruth<T: Eq + Hash> {
    true_positives: HashMap<Benchmark, HashSet<T>>,
}

impl<T: Eq + Hash + Clone> GroundTruth<T> {
    pub fn new() -> Self {
        Self {
            true_positives: HashMap::new(),
        }
    }

    pub fn insert(&mut self, target: Benchmark, true_positives: HashSet<T>) {
        self.true_positives.insert(target, true_positives);
    }

    /// Loads `<dir>/<target-slug>.truth` for every target that has one.
    pub fn load(reader: &dyn Reader<T>, dir: &Path, targets: &[Benchmark]) -> Result<Self, ReadError> {
        let mut truth = Self::new();
        for target in targets {
            let path = dir.join(format!("{}.{}", target.slug(), GROUND_TRUTH_EXTENSION));
            if path.is_file() {
                truth.insert(target.clone(), reader.read(&path)?);
            }
        }
        Ok(truth)
    }

    pub fn covers(&self, target: &Benchmark) -> bool {
        self.true_positives.contains_key(target)
    }

    /// Splits `results` for `target`. Without ground truth for the target
    /// both halves are the unfiltered results.
    pub fn classify(&self, target: &Benchmark, results: &HashSet<T>) -> Classified<T> {
        match self.true_positives.get(target) {
            Some(known) => {
                let (true_positives, false_positives) =
                    results.iter().cloned().partition(|r| known.contains(r));
                Classified {
                    true_positives,
                    false_positives,
                }
            }
            None => Classified {
                true_positives: results.clone(),
                false_positives: results.clone(),
            },
        }
    }
}

impl<T: Eq + Hash + Clone> Default for GroundTruth<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[test]
    fn line_reader_trims_and_skips_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("edges.out");
        fs::write(&path, "a -> b\n\n  b -> c  \na -> b\n").unwrap();
        let results = LineReader.read(&path).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.contains("b -> c"));
    }

    #[test]
    fn absent_output_reads_as_empty_set() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("never-written.out");
        assert!(LineReader.read(&missing).unwrap().is_empty());
        assert!(JsonReader::<String>::new().read(&missing).unwrap().is_empty());
    }

    #[derive(Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
    struct Flow {
        source: String,
        sink: String,
    }

    #[test]
    fn json_reader_parses_structured_results() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flows.out");
        fs::write(
            &path,
            r#"[{"source": "getIMEI", "sink": "sendSMS"}, {"source": "getIMEI", "sink": "log"}]"#,
        )
        .unwrap();
        let flows = JsonReader::<Flow>::new().read(&path).unwrap();
        assert_eq!(flows.len(), 2);
        assert!(flows.iter().all(|f| f.source == "getIMEI"));
        assert!(flows.iter().any(|f| f.sink == "log"));
    }

    #[test]
    fn malformed_output_degrades_to_empty_set() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.out");
        fs::write(&path, "{not json").unwrap();
        let reader = JsonReader::<Flow>::new();
        assert!(matches!(reader.read(&path), Err(ReadError::Malformed { .. })));
        assert!(read_or_empty(&reader, &path).is_empty());
    }

    #[test]
    fn json_value_reader_canonicalizes_objects() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flows.out");
        fs::write(
            &path,
            r#"[{"sink": "log", "source": "getIMEI"}, {"source": "getIMEI", "sink": "log"}, 3]"#,
        )
        .unwrap();
        let results = JsonValueReader.read(&path).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.contains(r#"{"sink":"log","source":"getIMEI"}"#));
        assert!(results.contains("3"));
    }

    #[test]
    fn ground_truth_splits_results() {
        let target = Benchmark::new("droidbench/Loop1");
        let mut truth = GroundTruth::new();
        truth.insert(target.clone(), HashSet::from(["leak".to_string()]));
        let results = HashSet::from(["leak".to_string(), "noise".to_string()]);

        let classified = truth.classify(&target, &results);
        assert_eq!(classified.true_positives, HashSet::from(["leak".to_string()]));
        assert_eq!(classified.false_positives, HashSet::from(["noise".to_string()]));

        let unknown = truth.classify(&Benchmark::new("other"), &results);
        assert_eq!(unknown.true_positives, results);
    }

    #[test]
    fn ground_truth_loads_per_target_files() {
        let dir = tempdir().unwrap();
        let covered = Benchmark::new("app-one");
        fs::write(
            dir.path().join(format!("{}.{}", covered.slug(), GROUND_TRUTH_EXTENSION)),
            "leak\n",
        )
        .unwrap();
        let truth = GroundTruth::<String>::load(
            &LineReader,
            dir.path(),
            &[covered.clone(), Benchmark::new("app-two")],
        )
        .unwrap();
        assert!(truth.covers(&covered));
        assert!(!truth.covers(&Benchmark::new("app-two")));
    }
}
