use crate::job::{Benchmark, FinishedFuzzingJob};
use crate::level::Level;
use crate::order::{OrderType, PartialOrder};
use crate::reader::{GroundTruth, Reader, read_or_empty};
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// The two output differences of a compared pair.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Evidence<T: Eq + Hash> {
    job1_minus_job2: HashSet<T>,
    job2_minus_job1: HashSet<T>,
}

/// Two finished jobs that differ in exactly one option, together with the
/// orders that should hold between their levels.
///
/// The outputs are parsed and diffed lazily, at most once, the first time
/// any of the derived properties is requested. After that the cached
/// evidence is shared by every reader, from any thread.
pub struct PotentialViolation<T: Eq + Hash> {
    pub job1: FinishedFuzzingJob,
    pub job2: FinishedFuzzingJob,
    pub option_name: String,
    /// The order read literally as `job1 <relation> job2` comes first.
    pub partial_orders: Vec<PartialOrder>,
    reader: Arc<dyn Reader<T>>,
    ground_truth: Option<Arc<GroundTruth<T>>>,
    evidence: OnceCell<Evidence<T>>,
    violated: OnceCell<bool>,
}

impl<T: Eq + Hash + Clone> PotentialViolation<T> {
    pub fn new(
        job1: FinishedFuzzingJob,
        job2: FinishedFuzzingJob,
        option_name: String,
        mut partial_orders: Vec<PartialOrder>,
        reader: Arc<dyn Reader<T>>,
        ground_truth: Option<Arc<GroundTruth<T>>>,
    ) -> Self {
        let level1 = job1.configuration().get(&option_name).cloned();
        let level2 = job2.configuration().get(&option_name).cloned();
        if let (Some(l1), Some(l2)) = (&level1, &level2) {
            if let Some(index) = partial_orders.iter().position(|o| o.matches(l1, l2)) {
                partial_orders.swap(0, index);
            }
        }
        Self {
            job1,
            job2,
            option_name,
            partial_orders,
            reader,
            ground_truth,
            evidence: OnceCell::new(),
            violated: OnceCell::new(),
        }
    }

    pub fn target(&self) -> &Benchmark {
        self.job1.target()
    }

    pub fn job1_level(&self) -> Option<&Level> {
        self.job1.configuration().get(&self.option_name)
    }

    pub fn job2_level(&self) -> Option<&Level> {
        self.job2.configuration().get(&self.option_name)
    }

    /// The order whose `left`/`right` are job1's/job2's levels, in that order.
    pub fn main_order(&self) -> Option<&PartialOrder> {
        let (l1, l2) = (self.job1_level()?, self.job2_level()?);
        self.partial_orders.iter().find(|o| o.matches(l1, l2))
    }

    pub fn is_transitive(&self) -> bool {
        self.main_order().is_some_and(PartialOrder::is_transitive)
    }

    pub fn is_explicit(&self) -> bool {
        self.main_order().is_some_and(PartialOrder::is_explicit)
    }

    fn read(&self, job: &FinishedFuzzingJob) -> HashSet<T> {
        match &job.result {
            Some(path) => read_or_empty(self.reader.as_ref(), path),
            None => HashSet::new(),
        }
    }

    fn evidence(&self) -> &Evidence<T> {
        self.evidence.get_or_init(|| {
            let results1 = self.read(&self.job1);
            let results2 = self.read(&self.job2);
            let (set1, set2) = match &self.ground_truth {
                None => (results1, results2),
                Some(truth) => {
                    let c1 = truth.classify(self.target(), &results1);
                    let c2 = truth.classify(self.target(), &results2);
                    match self.main_order().map(|o| o.order_type) {
                        Some(OrderType::MorePreciseThan) => (c1.false_positives, c2.false_positives),
                        _ => (c1.true_positives, c2.true_positives),
                    }
                }
            };
            Evidence {
                job1_minus_job2: set1.difference(&set2).cloned().collect(),
                job2_minus_job1: set2.difference(&set1).cloned().collect(),
            }
        })
    }

    /// Results job1 reported that job2 did not.
    pub fn job1_minus_job2(&self) -> &HashSet<T> {
        &self.evidence().job1_minus_job2
    }

    /// Results job2 reported that job1 did not.
    pub fn job2_minus_job1(&self) -> &HashSet<T> {
        &self.evidence().job2_minus_job1
    }

    /// The difference the main order allows: a more sound job1 may find
    /// more, a more precise job1 may report less.
    pub fn expected_diffs(&self) -> &HashSet<T> {
        match self.main_order().map(|o| o.order_type) {
            Some(OrderType::MorePreciseThan) => self.job2_minus_job1(),
            _ => self.job1_minus_job2(),
        }
    }

    /// Whether the outputs contradict the main order.
    ///
    /// `job1 MORE_SOUND_THAN job2` breaks when job2 found something job1
    /// missed; `job1 MORE_PRECISE_THAN job2` breaks when job1 reported
    /// something job2 did not.
    pub fn violated(&self) -> bool {
        *self.violated.get_or_init(|| match self.main_order().map(|o| o.order_type) {
            Some(OrderType::MoreSoundThan) => !self.job2_minus_job1().is_empty(),
            Some(OrderType::MorePreciseThan) => !self.job1_minus_job2().is_empty(),
            None => false,
        })
    }

    /// True once the outputs have been read and diffed.
    pub fn is_evaluated(&self) -> bool {
        self.evidence.get().is_some()
    }
}

impl<T: Eq + Hash> fmt::Debug for PotentialViolation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PotentialViolation")
            .field("target", &self.job1.job.target)
            .field("option", &self.option_name)
            .field("partial_orders", &self.partial_orders)
            .field("job1", &self.job1.job.configuration.to_string())
            .field("job2", &self.job2.job.configuration.to_string())
            .field("violated", &self.violated.get())
            .finish()
    }
}

impl<T: Eq + Hash> fmt::Display for PotentialViolation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let orders: Vec<String> = self.partial_orders.iter().map(|o| o.to_string()).collect();
        write!(f, "[{}] on {}", orders.join(", "), self.job1.job.target)
    }
}
