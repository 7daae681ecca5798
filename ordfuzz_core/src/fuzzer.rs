use crate::campaign::{CampaignError, CampaignGenerator};
use crate::executor::Runner;
use crate::job::{FinishedFuzzingJob, FuzzingJob};
use crate::oracle::ViolationEngine;
use crate::report::{DeltaDebugger, NoOpDeltaDebugger, ViolationStore, delta_debugging_queue};
use crate::violation::PotentialViolation;
use anyhow::Context;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::hash::Hash;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every partial order was retired.
    Exhausted,
    RoundLimit,
}

/// What one round did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub round: u64,
    pub jobs: usize,
    pub failed_jobs: usize,
    pub comparisons: usize,
    pub violations: usize,
    pub transitive_violations: usize,
    pub retired_orders: usize,
    pub records_written: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FuzzerStats {
    pub rounds: u64,
    pub jobs_run: usize,
    pub failed_jobs: usize,
    pub comparisons: usize,
    pub violations: usize,
    pub transitive_violations: usize,
    pub records_written: usize,
    pub elapsed: Duration,
    pub stop_reason: Option<StopReason>,
}

impl FuzzerStats {
    fn absorb(&mut self, report: &RoundReport) {
        self.rounds += 1;
        self.jobs_run += report.jobs;
        self.failed_jobs += report.failed_jobs;
        self.comparisons += report.comparisons;
        self.violations += report.violations;
        self.transitive_violations += report.transitive_violations;
        self.records_written += report.records_written;
    }
}

/// The campaign loop: generate, execute, compare, persist, hand off, feed back.
pub struct Fuzzer<T: Eq + Hash> {
    generator: CampaignGenerator,
    runner: Box<dyn Runner>,
    engine: ViolationEngine<T>,
    store: Option<ViolationStore>,
    debugger: Box<dyn DeltaDebugger<T>>,
    output_dir: PathBuf,
    max_rounds: Option<u64>,
    pool: ThreadPool,
}

impl<T> Fuzzer<T>
where
    T: Eq + Hash + Clone + Send + Sync + Serialize + 'static,
{
    pub fn new(
        generator: CampaignGenerator,
        runner: Box<dyn Runner>,
        engine: ViolationEngine<T>,
        output_dir: PathBuf,
        threads: usize,
    ) -> Result<Self, anyhow::Error> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()
            .context("Failed to build worker pool")?;
        Ok(Self {
            generator,
            runner,
            engine,
            store: None,
            debugger: Box::new(NoOpDeltaDebugger),
            output_dir,
            max_rounds: None,
            pool,
        })
    }

    pub fn with_store(mut self, store: ViolationStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_debugger(mut self, debugger: Box<dyn DeltaDebugger<T>>) -> Self {
        self.debugger = debugger;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: Option<u64>) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn generator(&self) -> &CampaignGenerator {
        &self.generator
    }

    fn execute(&self, jobs: &[FuzzingJob]) -> Result<Vec<FinishedFuzzingJob>, anyhow::Error> {
        let runner = &self.runner;
        let output_dir = &self.output_dir;
        let finished = self.pool.install(|| {
            jobs.par_iter()
                .map(|job| runner.run(job, output_dir))
                .collect::<Result<Vec<_>, _>>()
        })?;
        Ok(finished)
    }

    fn persist(&self, violations: &[PotentialViolation<T>]) -> Result<usize, anyhow::Error> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let mut written = 0;
        for violation in violations {
            let (_, fresh) = store.persist(violation)?;
            if fresh {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Runs one round. `Ok(None)` once every partial order is retired.
    pub fn run_round(&mut self) -> Result<Option<RoundReport>, anyhow::Error> {
        let campaign = match self.generator.generate() {
            Ok(campaign) => campaign,
            Err(CampaignError::PartialOrdersExhausted) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let finished = self.execute(&campaign.jobs)?;
        let failed_jobs = finished.iter().filter(|f| f.result.is_none()).count();
        if failed_jobs > 0 {
            warn!(round = campaign.round, failed_jobs, "Some jobs produced no result");
        }

        let engine = &self.engine;
        let violations = self.pool.install(|| engine.check(&finished))?;
        let violated = self.pool.install(|| engine.evaluate(&violations));
        let transitive_violations = violations
            .iter()
            .filter(|v| v.violated() && v.is_transitive())
            .count();

        let records_written = self.persist(&violations)?;

        for violation in delta_debugging_queue(&violations) {
            self.debugger
                .minimize(violation, &|v: &PotentialViolation<T>| v.violated())?;
        }

        let retired_orders = self.generator.feedback(&violations);

        let report = RoundReport {
            round: campaign.round,
            jobs: campaign.jobs.len(),
            failed_jobs,
            comparisons: violations.len(),
            violations: violated,
            transitive_violations,
            retired_orders,
            records_written,
        };
        info!(
            round = report.round,
            jobs = report.jobs,
            comparisons = report.comparisons,
            violations = report.violations,
            retired = report.retired_orders,
            remaining = self.generator.remaining_orders().count(),
            "Round finished"
        );
        Ok(Some(report))
    }

    /// Runs rounds until the partial orders are exhausted or the round limit
    /// is hit. Collaborator failures end the loop with an error.
    pub fn run(&mut self) -> Result<FuzzerStats, anyhow::Error> {
        let start = Instant::now();
        let mut stats = FuzzerStats::default();
        loop {
            if self.max_rounds.is_some_and(|max| stats.rounds >= max) {
                stats.stop_reason = Some(StopReason::RoundLimit);
                break;
            }
            match self.run_round()? {
                Some(report) => stats.absorb(&report),
                None => {
                    stats.stop_reason = Some(StopReason::Exhausted);
                    break;
                }
            }
        }
        stats.elapsed = start.elapsed();
        info!(
            rounds = stats.rounds,
            jobs = stats.jobs_run,
            violations = stats.violations,
            stop = ?stats.stop_reason,
            elapsed = ?stats.elapsed,
            "Campaign loop finished"
        );
        Ok(stats)
    }
}
