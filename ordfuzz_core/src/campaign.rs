use crate::config::CampaignSettings;
use crate::configuration::Configuration;
use crate::job::{Benchmark, FuzzingJob};
use crate::mutator::{Mutator, PartialOrderMutator};
use crate::option::SpaceError;
use crate::order::PartialOrder;
use crate::scheduler::WeightedPool;
use crate::seed::SeedSource;
use crate::tool::Tool;
use crate::violation::PotentialViolation;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Weight added to a benchmark on which a violation was confirmed.
const VIOLATION_BENCHMARK_BOOST: u32 = 10;

#[derive(Error, Debug)]
pub enum CampaignError {
    /// Terminal signal: every partial order has been retired.
    #[error("Every partial order has been explored, nothing left to test")]
    PartialOrdersExhausted,
    #[error("No benchmark targets were configured")]
    NoBenchmarks,
    #[error("Seed source failed: {0:#}")]
    SeedSource(anyhow::Error),
    #[error(transparent)]
    Space(#[from] SpaceError),
}

/// One batch of jobs, generated, executed and fed back together.
#[derive(Debug, Clone)]
pub struct FuzzingCampaign {
    pub round: u64,
    pub seed: Configuration,
    pub orders: Vec<PartialOrder>,
    pub jobs: Vec<FuzzingJob>,
}

/// Builds campaigns round after round and adapts to the violations found.
///
/// The generator is strictly sequential: round `i + 1` must only be
/// generated once the feedback of round `i` has been applied.
pub struct CampaignGenerator {
    tool: Arc<Tool>,
    seeds: Box<dyn SeedSource>,
    mutator: PartialOrderMutator,
    orders: WeightedPool<PartialOrder>,
    benchmarks: WeightedPool<Benchmark>,
    settings: CampaignSettings,
    rng: ChaCha8Rng,
    first_run: bool,
    round: u64,
    selected: Vec<PartialOrder>,
    discarded_seeds: u64,
}

impl CampaignGenerator {
    pub fn new(
        tool: Arc<Tool>,
        seeds: Box<dyn SeedSource>,
        benchmarks: Vec<Benchmark>,
        settings: CampaignSettings,
        rng_seed: u64,
    ) -> Result<Self, CampaignError> {
        if benchmarks.is_empty() {
            return Err(CampaignError::NoBenchmarks);
        }
        let orders = WeightedPool::new(tool.partial_orders());
        info!(
            tool = %tool.name,
            orders = orders.len(),
            benchmarks = benchmarks.len(),
            "Campaign generator ready"
        );
        Ok(Self {
            mutator: PartialOrderMutator::new(tool.clone()),
            tool,
            seeds,
            orders,
            benchmarks: WeightedPool::new(benchmarks),
            settings,
            rng: ChaCha8Rng::seed_from_u64(rng_seed),
            first_run: true,
            round: 0,
            selected: Vec::new(),
            discarded_seeds: 0,
        })
    }

    pub fn tool(&self) -> &Arc<Tool> {
        &self.tool
    }

    /// Rounds generated so far.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn is_exhausted(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn remaining_orders(&self) -> impl Iterator<Item = &PartialOrder> {
        self.orders.items()
    }

    pub fn order_weight(&self, order: &PartialOrder) -> Option<u32> {
        self.orders.weight(order)
    }

    pub fn benchmark_weight(&self, benchmark: &Benchmark) -> Option<u32> {
        self.benchmarks.weight(benchmark)
    }

    /// Seed strings the parser rejected so far.
    pub fn discarded_seeds(&self) -> u64 {
        self.discarded_seeds
    }

    /// Asks the seed source until it yields a string that parses. Only a
    /// failure of the source itself ends the loop early.
    fn next_seed(&mut self) -> Result<Configuration, CampaignError> {
        loop {
            let raw = self
                .seeds
                .next_seed(&mut self.rng)
                .map_err(CampaignError::SeedSource)?;
            match Configuration::parse(&self.tool, &raw) {
                Ok(seed) => return Ok(seed),
                Err(e) => {
                    self.discarded_seeds += 1;
                    warn!(seed = %raw, error = %e, "Discarding unparsable seed");
                }
            }
        }
    }

    pub fn generate(&mut self) -> Result<FuzzingCampaign, CampaignError> {
        if self.orders.is_empty() {
            return Err(CampaignError::PartialOrdersExhausted);
        }

        let (seed, orders, targets) = if self.first_run {
            (
                Configuration::default_for(&self.tool)?,
                self.orders.items().cloned().collect::<Vec<_>>(),
                self.benchmarks.items().cloned().collect::<Vec<_>>(),
            )
        } else {
            let seed = self.next_seed()?;
            let orders = self
                .orders
                .sample(self.settings.orders_per_round, &mut self.rng)
                .map_err(|_| CampaignError::PartialOrdersExhausted)?;
            let targets = self
                .benchmarks
                .sample(self.settings.benchmarks_per_round, &mut self.rng)
                .map_err(|_| CampaignError::NoBenchmarks)?;
            (seed, orders, targets)
        };

        let mut configurations = vec![seed.clone()];
        for order in &orders {
            for mutant in self.mutator.mutate(&seed, order, &mut self.rng)? {
                if !configurations.contains(&mutant) {
                    configurations.push(mutant);
                }
            }
        }

        let jobs: Vec<FuzzingJob> = targets
            .iter()
            .flat_map(|target| {
                configurations
                    .iter()
                    .map(move |c| FuzzingJob::new(c.clone(), target.clone()))
            })
            .collect();

        self.first_run = false;
        self.round += 1;
        self.selected = orders.clone();
        info!(
            round = self.round,
            seed = %seed,
            orders = orders.len(),
            targets = targets.len(),
            jobs = jobs.len(),
            "Generated campaign"
        );
        Ok(FuzzingCampaign {
            round: self.round,
            seed,
            orders,
            jobs,
        })
    }

    /// Applies the outcome of the last round.
    ///
    /// Confirmed, directly declared violations retire their orders: all of
    /// the option's orders for integer options, exactly the implicated ones
    /// otherwise. Orders left out of the round gain weight; benchmarks that
    /// showed a violation are boosted and all others decay. Returns the
    /// number of retired orders.
    pub fn feedback<T>(&mut self, violations: &[PotentialViolation<T>]) -> usize
    where
        T: Eq + Hash + Clone,
    {
        let mut retired = 0;
        let mut implicated: HashSet<Benchmark> = HashSet::new();
        for violation in violations {
            if !violation.violated() || violation.is_transitive() {
                continue;
            }
            implicated.insert(violation.target().clone());
            let integer = match self.tool.get_option(&violation.option_name) {
                Ok(option) => option.is_integer(),
                Err(e) => {
                    warn!(error = %e, "Violation refers to an unknown option");
                    continue;
                }
            };
            retired += if integer {
                self.orders
                    .remove_where(|o| o.option_name == violation.option_name)
            } else {
                self.orders
                    .remove_where(|o| violation.partial_orders.contains(o))
            };
        }

        let selected = std::mem::take(&mut self.selected);
        self.orders.reweight(|order, weight| {
            if selected.contains(order) {
                weight
            } else {
                weight + 1
            }
        });
        self.benchmarks.reweight(|benchmark, weight| {
            if implicated.contains(benchmark) {
                weight + VIOLATION_BENCHMARK_BOOST
            } else {
                weight.saturating_sub(1)
            }
        });

        debug!(
            retired,
            implicated = implicated.len(),
            remaining = self.orders.len(),
            "Applied campaign feedback"
        );
        retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use crate::oracle::ViolationEngine;
    use crate::reader::LineReader;
    use crate::seed::RandomSeedSource;
    use crate::tool::tests::sample_tool;
    use crate::violation::tests::finished;
    use anyhow::anyhow;
    use rand_core::RngCore;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    struct ScriptedSeeds(VecDeque<String>);

    impl ScriptedSeeds {
        fn boxed(seeds: &[&str]) -> Box<dyn SeedSource> {
            Box::new(Self(seeds.iter().map(|s| s.to_string()).collect()))
        }
    }

    impl SeedSource for ScriptedSeeds {
        fn next_seed(&mut self, _rng: &mut dyn RngCore) -> Result<String, anyhow::Error> {
            self.0.pop_front().ok_or_else(|| anyhow!("grammar generator gone"))
        }
    }

    fn targets(names: &[&str]) -> Vec<Benchmark> {
        names.iter().map(|n| Benchmark::new(*n)).collect()
    }

    fn generator(tool: Arc<Tool>, benchmarks: &[&str]) -> CampaignGenerator {
        let seeds = Box::new(RandomSeedSource::new(tool.clone()));
        CampaignGenerator::new(tool, seeds, targets(benchmarks), CampaignSettings::default(), 7)
            .unwrap()
    }

    #[test]
    fn generator_requires_benchmarks() {
        let tool = Arc::new(sample_tool());
        let seeds = Box::new(RandomSeedSource::new(tool.clone()));
        let result = CampaignGenerator::new(tool, seeds, Vec::new(), CampaignSettings::default(), 0);
        assert!(matches!(result, Err(CampaignError::NoBenchmarks)));
    }

    #[test]
    fn first_campaign_sweeps_every_order_from_the_default_seed() {
        let tool = Arc::new(sample_tool());
        let mut generator = generator(tool.clone(), &["app-a", "app-b"]);
        let campaign = generator.generate().unwrap();

        let default = Configuration::default_for(&tool).unwrap();
        assert_eq!(campaign.round, 1);
        assert_eq!(campaign.seed, default);
        assert_eq!(campaign.orders.len(), 4);

        let per_target: Vec<&FuzzingJob> = campaign
            .jobs
            .iter()
            .filter(|j| j.target.name == "app-a")
            .collect();
        assert_eq!(campaign.jobs.len(), per_target.len() * 2);
        assert!(per_target.iter().any(|j| j.configuration == default));
        for job in &per_target {
            match job.option_under_investigation() {
                None => assert_eq!(job.configuration, default),
                Some(option) => {
                    assert_eq!(job.configuration.differing_options(&default), vec![option])
                }
            }
        }
        // RTA and VTA from the call-graph orders, TRUE for reflection.
        let cg_mutants = per_target
            .iter()
            .filter(|j| j.option_under_investigation() == Some("cg"))
            .count();
        assert_eq!(cg_mutants, 2);
        assert!(per_target.iter().any(|j| {
            j.configuration.get("reflection") == Some(&Level::new("reflection", "TRUE"))
        }));
    }

    #[test]
    fn later_campaigns_sample_bounded_orders_and_benchmarks() {
        let tool = Arc::new(sample_tool());
        let mut generator = generator(tool, &["b1", "b2", "b3", "b4", "b5", "b6"]);
        generator.generate().unwrap();
        generator.feedback::<String>(&[]);

        let campaign = generator.generate().unwrap();
        assert_eq!(campaign.round, 2);
        assert_eq!(campaign.orders.len(), 2);
        let distinct: HashSet<&Benchmark> = campaign.jobs.iter().map(|j| &j.target).collect();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn unparsable_seeds_are_retried() {
        let tool = Arc::new(sample_tool());
        let seeds = ScriptedSeeds::boxed(&["--bogus 1", "--k 99", "--k i", "--cg RTA"]);
        let mut generator =
            CampaignGenerator::new(tool, seeds, targets(&["app"]), CampaignSettings::default(), 1)
                .unwrap();
        generator.generate().unwrap();

        let campaign = generator.generate().unwrap();
        assert_eq!(campaign.seed.get("cg"), Some(&Level::new("cg", "RTA")));
        assert_eq!(campaign.seed.option_under_investigation, None);
        assert_eq!(generator.discarded_seeds(), 3);
    }

    #[test]
    fn seed_source_failure_is_propagated() {
        let tool = Arc::new(sample_tool());
        let mut generator = CampaignGenerator::new(
            tool,
            ScriptedSeeds::boxed(&[]),
            targets(&["app"]),
            CampaignSettings::default(),
            1,
        )
        .unwrap();
        generator.generate().expect("first run needs no seed string");
        assert!(matches!(generator.generate(), Err(CampaignError::SeedSource(_))));
    }

    #[test]
    fn unselected_orders_gain_weight() {
        let tool = Arc::new(sample_tool());
        let mut generator = generator(tool, &["app"]);
        generator.generate().unwrap();
        generator.feedback::<String>(&[]);
        assert!(generator.remaining_orders().all(|o| generator.order_weight(o) == Some(1)));

        let campaign = generator.generate().unwrap();
        generator.feedback::<String>(&[]);
        for order in generator.remaining_orders() {
            let expected = if campaign.orders.contains(order) { 1 } else { 2 };
            assert_eq!(generator.order_weight(order), Some(expected), "{order}");
        }
    }

    fn rta_vta_violation(
        tool: &Arc<Tool>,
        dir: &std::path::Path,
        target: &str,
    ) -> Vec<PotentialViolation<String>> {
        let engine = ViolationEngine::new(tool.clone(), Arc::new(LineReader));
        let seed = Configuration::parse(tool, "--cg VTA").unwrap();
        let jobs = vec![
            finished(dir, seed.clone(), target, &["e1", "e2"]),
            finished(dir, seed.mutated(Level::new("cg", "RTA")), target, &["e1"]),
        ];
        engine.check(&jobs).unwrap()
    }

    #[test]
    fn enum_violation_retires_only_the_implicated_order() {
        let dir = tempdir().unwrap();
        let tool = Arc::new(sample_tool());
        let mut generator = generator(tool.clone(), &["app", "other"]);
        generator.generate().unwrap();

        let violations = rta_vta_violation(&tool, dir.path(), "app");
        assert_eq!(generator.feedback(&violations), 1);

        let remaining: Vec<String> = generator.remaining_orders().map(|o| o.to_string()).collect();
        assert_eq!(remaining.len(), 3);
        assert!(!remaining.contains(&"cg=RTA MORE_SOUND_THAN cg=VTA".to_string()));
        assert!(remaining.contains(&"cg=CHA MORE_SOUND_THAN cg=RTA".to_string()));

        assert_eq!(generator.benchmark_weight(&Benchmark::new("app")), Some(11));
        assert_eq!(generator.benchmark_weight(&Benchmark::new("other")), Some(1));
    }

    #[test]
    fn integer_violation_retires_every_order_of_the_option() {
        let dir = tempdir().unwrap();
        let tool = Arc::new(sample_tool());
        let mut generator = generator(tool.clone(), &["app"]);
        generator.generate().unwrap();

        let engine = ViolationEngine::new(tool.clone(), Arc::new(LineReader));
        let seed = Configuration::default_for(&tool).unwrap();
        let jobs = vec![
            finished(dir.path(), seed.mutated(Level::new("k", "4")), "app", &["a1", "a2"]),
            finished(dir.path(), seed.mutated(Level::new("k", "2")), "app", &["a1"]),
        ];
        let violations = engine.check(&jobs).unwrap();
        assert_eq!(generator.feedback(&violations), 1);
        assert!(generator.remaining_orders().all(|o| o.option_name != "k"));
    }

    #[test]
    fn transitive_violations_keep_their_orders() {
        let dir = tempdir().unwrap();
        let tool = Arc::new(sample_tool());
        let mut generator = generator(tool.clone(), &["app"]);
        generator.generate().unwrap();

        let engine = ViolationEngine::new(tool.clone(), Arc::new(LineReader));
        let seed = Configuration::default_for(&tool).unwrap();
        let jobs = vec![
            finished(dir.path(), seed.mutated(Level::new("cg", "CHA")), "app", &["e1"]),
            finished(dir.path(), seed.mutated(Level::new("cg", "VTA")), "app", &["e1", "e2"]),
        ];
        let violations = engine.check(&jobs).unwrap();
        assert!(violations.iter().all(|v| v.violated() && v.is_transitive()));
        assert_eq!(generator.feedback(&violations), 0);
        assert_eq!(generator.remaining_orders().count(), 4);
        assert_eq!(generator.benchmark_weight(&Benchmark::new("app")), Some(1));
    }

    #[test]
    fn retiring_the_last_order_ends_the_campaign() {
        let dir = tempdir().unwrap();
        let artifact = r#"{"name": "mini", "options": [{
            "name": "cg", "type": "enum", "levels": ["RTA", "VTA"], "default": "VTA",
            "orders": [{"order": "MST", "left": "RTA", "right": "VTA"}]
        }]}"#;
        let tool = Arc::new(Tool::from_json(artifact).unwrap());
        let mut generator = generator(tool.clone(), &["app"]);
        let campaign = generator.generate().unwrap();
        assert_eq!(campaign.jobs.len(), 2);

        let violations = rta_vta_violation(&tool, dir.path(), "app");
        generator.feedback(&violations);
        assert!(generator.is_exhausted());
        assert!(matches!(
            generator.generate(),
            Err(CampaignError::PartialOrdersExhausted)
        ));
    }
}
