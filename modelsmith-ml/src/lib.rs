//! # modelsmith-ml: adaptive model selection and ensembling
//!
//! Searches a space of model families and hyperparameters under k-fold
//! cross-validation and returns the best model fit on the whole dataset.
//!
//! ## Layers
//!
//! 1. **Capability contract**: every family implements [`Model`].
//! 2. **Registry**: maps a [`Family`] to a constructor, filtered by the
//!    backends compiled in.
//! 3. **Evaluator**: cross-validates one candidate; failures become
//!    penalized scores instead of errors.
//! 4. **Search**: sequential trials driven by a random or TPE sampler, with
//!    optional median pruning and a timeout.
//! 5. **Ensembles**: voting and out-of-fold stacking over any models.
//! 6. **Orchestrator**: [`AutoMl`] ties it together.

// Foundation
pub mod config;
pub mod error;
pub mod params;
pub mod seed;

// Data and scoring
pub mod data;
pub mod metrics;

// Model families
pub mod algorithms;
pub mod registry;

// Selection
pub mod evaluation;
pub mod search;

// Composition
pub mod automl;
pub mod ensemble;
pub mod report;

// Re-exports
pub use algorithms::Model;
pub use automl::{AutoMl, AutoMlOptions, BestConfig};
pub use config::{AutoMlConfig, SamplerKind};
pub use data::{ClassIndex, Dataset, TaskType};
pub use ensemble::{FailurePolicy, StackFeatures, StackingEnsemble, VotingEnsemble, VotingMode};
pub use error::{MlError, Result};
pub use evaluation::{CandidateEvaluator, Evaluation, PENALTY_SCORE};
pub use metrics::{Metric, Metrics};
pub use params::{HyperParams, ParamValue, hyper_params};
pub use registry::{Family, ModelFactory, ModelRegistry, available_families};
pub use report::SearchReport;
pub use search::{SearchOutcome, Trial, TrialLog, TrialStatus};
