pub mod campaign;
pub mod config;
pub mod configuration;
pub mod executor;
pub mod fuzzer;
pub mod job;
pub mod level;
pub mod mutator;
pub mod option;
pub mod oracle;
pub mod order;
pub mod reader;
pub mod report;
pub mod scheduler;
pub mod seed;
pub mod tool;
pub mod violation;

pub use campaign::{CampaignError, CampaignGenerator, FuzzingCampaign};
pub use config::OrdfuzzConfig;
pub use configuration::{Configuration, SeedParseError};
pub use executor::{CommandRunner, CommandRunnerConfig, InProcessRunner, Runner, RunnerError};
pub use fuzzer::{Fuzzer, FuzzerStats, RoundReport, StopReason};
pub use job::{Benchmark, FinishedFuzzingJob, FuzzingJob};
pub use level::{Level, LevelRef};
pub use mutator::{Mutator, PartialOrderMutator};
pub use option::{ConfigOption, OptionType, SpaceError};
pub use oracle::ViolationEngine;
pub use order::{OrderType, PartialOrder};
pub use reader::{GroundTruth, JsonReader, JsonValueReader, LineReader, ReadError, Reader};
pub use report::{DeltaDebugger, NoOpDeltaDebugger, StoreError, ViolationRecord, ViolationStore};
pub use scheduler::{SchedulerError, WeightedPool};
pub use seed::{CommandSeedSource, RandomSeedSource, SeedSource};
pub use tool::Tool;
pub use violation::PotentialViolation;
