use crate::job::FinishedFuzzingJob;
use crate::option::SpaceError;
use crate::order::OrderType;
use crate::reader::{GroundTruth, Reader};
use crate::tool::Tool;
use crate::violation::PotentialViolation;
use rayon::prelude::*;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// Pairs finished jobs up along the configuration space's partial orders
/// and turns every comparable pair into a [`PotentialViolation`].
///
/// Pairs are independent of each other and are compared on the ambient
/// rayon pool; the configuration space is only read.
pub struct ViolationEngine<T: Eq + Hash> {
    tool: Arc<Tool>,
    reader: Arc<dyn Reader<T>>,
    ground_truth: Option<Arc<GroundTruth<T>>>,
}

impl<T> ViolationEngine<T>
where
    T: Eq + Hash + Clone + Send + Sync,
{
    pub fn new(tool: Arc<Tool>, reader: Arc<dyn Reader<T>>) -> Self {
        Self {
            tool,
            reader,
            ground_truth: None,
        }
    }

    /// Restricts comparisons to true positives (soundness) and false
    /// positives (precision).
    pub fn with_ground_truth(mut self, ground_truth: Arc<GroundTruth<T>>) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    /// Candidate pairs: same target, and the second job either investigates
    /// the same option or is a baseline. Failed jobs never take part.
    fn candidate_pairs<'a>(
        finished: &'a [FinishedFuzzingJob],
    ) -> Vec<(&'a FinishedFuzzingJob, &'a FinishedFuzzingJob)> {
        let comparable: Vec<&FinishedFuzzingJob> =
            finished.iter().filter(|j| j.result.is_some()).collect();
        let mut pairs = Vec::new();
        for (i, job1) in comparable.iter().enumerate() {
            for (k, job2) in comparable.iter().enumerate() {
                if i == k || job1.target() != job2.target() {
                    continue;
                }
                let option1 = job1.job.option_under_investigation();
                let option2 = job2.job.option_under_investigation();
                if option2.is_none() || option1 == option2 {
                    pairs.push((*job1, *job2));
                }
            }
        }
        pairs
    }

    pub fn check(
        &self,
        finished: &[FinishedFuzzingJob],
    ) -> Result<Vec<PotentialViolation<T>>, SpaceError> {
        let pairs = Self::candidate_pairs(finished);
        debug!(jobs = finished.len(), pairs = pairs.len(), "Comparing finished jobs");
        let compared: Vec<Option<PotentialViolation<T>>> = pairs
            .into_par_iter()
            .map(|(job1, job2)| self.compare(job1, job2))
            .collect::<Result<_, _>>()?;
        Ok(compared.into_iter().flatten().collect())
    }

    /// Relates one pair. `Ok(None)` means there is nothing to report: the
    /// shared option has the same level, the levels are unrelated, or the
    /// only relation found is purely implicit.
    pub fn compare(
        &self,
        job1: &FinishedFuzzingJob,
        job2: &FinishedFuzzingJob,
    ) -> Result<Option<PotentialViolation<T>>, SpaceError> {
        let Some(option_name) = job1
            .job
            .option_under_investigation()
            .or(job2.job.option_under_investigation())
        else {
            return Ok(None);
        };
        let option = self.tool.get_option(option_name)?;
        let (Some(l1), Some(l2)) = (
            job1.configuration().get(option_name),
            job2.configuration().get(option_name),
        ) else {
            return Ok(None);
        };
        if l1 == l2 {
            return Ok(None);
        }
        if job1.configuration().differing_options(job2.configuration()) != [option_name] {
            debug!(option = option_name, "Skipping pair that differs in more than one option");
            return Ok(None);
        }

        let orders = if option.is_more_sound(l1, l2, true)? && option.is_more_precise(l2, l1, true)? {
            [
                option.order(OrderType::MoreSoundThan, l1, l2)?,
                option.order(OrderType::MorePreciseThan, l2, l1)?,
            ]
        } else if option.is_more_sound(l2, l1, true)? && option.is_more_precise(l1, l2, true)? {
            [
                option.order(OrderType::MoreSoundThan, l2, l1)?,
                option.order(OrderType::MorePreciseThan, l1, l2)?,
            ]
        } else {
            return Ok(None);
        };
        let orders: Vec<_> = orders.into_iter().flatten().collect();

        let anchored = orders
            .iter()
            .find(|o| o.matches(l1, l2))
            .is_some_and(|o| o.is_explicit());
        if !anchored {
            return Ok(None);
        }

        Ok(Some(PotentialViolation::new(
            job1.clone(),
            job2.clone(),
            option_name.to_string(),
            orders,
            self.reader.clone(),
            self.ground_truth.clone(),
        )))
    }

    /// Forces the lazy evidence of every violation in parallel and returns
    /// how many are actually violated.
    pub fn evaluate(&self, violations: &[PotentialViolation<T>]) -> usize {
        violations.par_iter().filter(|v| v.violated()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Configuration;
    use crate::job::{Benchmark, FuzzingJob};
    use crate::level::Level;
    use crate::reader::LineReader;
    use crate::tool::tests::sample_tool;
    use crate::violation::tests::finished;
    use std::time::Duration;
    use tempfile::tempdir;

    fn engine() -> (Arc<Tool>, ViolationEngine<String>) {
        let tool = Arc::new(sample_tool());
        let engine = ViolationEngine::new(tool.clone(), Arc::new(LineReader));
        (tool, engine)
    }

    #[test]
    fn identical_outputs_never_violate() {
        let dir = tempdir().unwrap();
        let (tool, engine) = engine();
        let seed = Configuration::default_for(&tool).unwrap();
        let jobs = vec![
            finished(dir.path(), seed.clone(), "app", &["e1", "e2"]),
            finished(dir.path(), seed.mutated(Level::new("cg", "RTA")), "app", &["e1", "e2"]),
            finished(dir.path(), seed.mutated(Level::new("cg", "VTA")), "app", &["e1", "e2"]),
            finished(dir.path(), seed.mutated(Level::new("k", "3")), "app", &["e1", "e2"]),
            finished(dir.path(), seed.mutated(Level::new("reflection", "TRUE")), "app", &["e1", "e2"]),
        ];
        let violations = engine.check(&jobs).unwrap();
        assert!(!violations.is_empty());
        assert_eq!(engine.evaluate(&violations), 0);
    }

    #[test]
    fn soundness_violation_is_reported_once() {
        let dir = tempdir().unwrap();
        let (tool, engine) = engine();
        // The seed runs VTA; the RTA mutant is declared more sound but finds less.
        let seed = Configuration::parse(&tool, "--cg VTA").unwrap();
        let jobs = vec![
            finished(dir.path(), seed.clone(), "app", &["e1", "e2"]),
            finished(dir.path(), seed.mutated(Level::new("cg", "RTA")), "app", &["e1"]),
        ];
        let violations = engine.check(&jobs).unwrap();
        assert_eq!(violations.len(), 1);
        let pv = &violations[0];
        assert!(pv.violated());
        assert!(!pv.is_transitive());
        assert_eq!(pv.main_order().unwrap().order_type, OrderType::MoreSoundThan);
        assert_eq!(pv.job1_level().unwrap().level_name, "RTA");
    }

    #[test]
    fn precision_violation_is_reported_once() {
        let dir = tempdir().unwrap();
        let (tool, engine) = engine();
        let seed = Configuration::default_for(&tool).unwrap();
        let more_precise = seed.mutated(Level::new("k", "4"));
        let less_precise = seed.mutated(Level::new("k", "2"));
        let jobs = vec![
            finished(dir.path(), more_precise, "app", &["alarm1", "alarm2"]),
            finished(dir.path(), less_precise, "app", &["alarm1"]),
        ];
        let violations = engine.check(&jobs).unwrap();
        assert_eq!(violations.len(), 1);
        let pv = &violations[0];
        assert_eq!(pv.main_order().unwrap().order_type, OrderType::MorePreciseThan);
        assert_eq!(pv.job1_level().unwrap().level_name, "4");
        assert!(pv.violated());
        assert_eq!(pv.job1_minus_job2().len(), 1);
    }

    #[test]
    fn transitive_orders_are_reported_and_flagged() {
        let dir = tempdir().unwrap();
        let (tool, engine) = engine();
        let seed = Configuration::default_for(&tool).unwrap();
        let jobs = vec![
            finished(dir.path(), seed.mutated(Level::new("cg", "CHA")), "app", &["e1"]),
            finished(dir.path(), seed.mutated(Level::new("cg", "VTA")), "app", &["e1", "e9"]),
        ];
        let violations = engine.check(&jobs).unwrap();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].is_transitive());
        assert!(violations[0].violated());
    }

    #[test]
    fn pairs_are_confined_to_one_target_and_one_option() {
        let dir = tempdir().unwrap();
        let (tool, engine) = engine();
        let seed = Configuration::default_for(&tool).unwrap();
        let jobs = vec![
            finished(dir.path(), seed.mutated(Level::new("cg", "RTA")), "app-a", &["x"]),
            finished(dir.path(), seed.mutated(Level::new("cg", "VTA")), "app-b", &[]),
            finished(dir.path(), seed.mutated(Level::new("k", "4")), "app-a", &[]),
        ];
        assert!(engine.check(&jobs).unwrap().is_empty());
    }

    #[test]
    fn failed_jobs_are_excluded() {
        let dir = tempdir().unwrap();
        let (tool, engine) = engine();
        let seed = Configuration::default_for(&tool).unwrap();
        let failed = FinishedFuzzingJob::new(
            FuzzingJob::new(seed.mutated(Level::new("cg", "RTA")), Benchmark::new("app")),
            Duration::from_secs(60),
            None,
        );
        let jobs = vec![finished(dir.path(), seed, "app", &["e1"]), failed];
        assert!(engine.check(&jobs).unwrap().is_empty());
    }

    #[test]
    fn baselines_alone_are_not_compared() {
        let dir = tempdir().unwrap();
        let (tool, engine) = engine();
        let seed = Configuration::default_for(&tool).unwrap();
        let other = Configuration::parse(&tool, "--cg RTA").unwrap();
        let jobs = vec![
            finished(dir.path(), seed, "app", &["e1"]),
            finished(dir.path(), other, "app", &[]),
        ];
        assert!(engine.check(&jobs).unwrap().is_empty());
    }
}
