//! Core engine for lemmaloop: round controller and orchestration.
//!
//! This crate drives propose, verify and refine calls through a [`Gateway`]
//! and keeps the dependency memory of accepted lemmas. It does no terminal IO.

pub mod aggregator;
pub mod benchmark;
pub mod call;
pub mod config;
pub mod controller;
pub mod error;
pub mod parser;
pub mod prompts;
pub mod report;
pub mod state;
pub mod store;

// Re-export from crates for public API
pub use lemmaloop_providers::{self, Gateway, GatewayError, GatewayRequest};
pub use lemmaloop_types::{
    Budgets, Candidate, CandidateKind, FinalReport, Lemma, LemmaId, NonEmptyString, Role,
    RunStats, ScalingFactor, TerminationReason,
};

pub use aggregator::{Majority, PolicyKind, ReductionPolicy, Unanimous, VerificationAggregator};
pub use benchmark::{BenchmarkOptions, BenchmarkReport, Decision, run_benchmark};
pub use call::CallPolicy;
pub use config::{ConfigError, LemmaloopConfig};
pub use controller::{EngineSettings, RoundController};
pub use error::{DependencyError, EngineError, FatalError, MalformedOutput};
pub use prompts::PromptTemplates;
pub use report::{MemoryError, load_memory, write_report};
pub use state::{Node, WorkflowState};
pub use store::LemmaStore;
