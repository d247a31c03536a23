//! Configuration module for the few-shot segmentor.
//!
//! - `params`: the hyperparameter record and the model configuration, with validation
//! - `plan`: the explicit per-stage block configurations derived from them

mod params;
mod plan;

pub use params::{FewShotSegmentorConfig, ModelParams};
pub use plan::{BranchPlan, ConvBlockConfig, DecoderStageConfig, EncoderStageConfig, STAGES};
