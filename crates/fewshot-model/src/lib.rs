//! # Few-Shot Segmentor
//!
//! A Burn implementation of a two-branch network for few-shot segmentation of volumetric
//! images. A *conditioner* regresses a convolution kernel from a labelled support slice; a
//! *segmentor* uses that kernel as its final classification filter on an unlabelled query
//! slice.
//!
//! ## Modules
//!
//! - `config`: the hyperparameter record, validation and the per-stage block plans.
//! - `models`: the building blocks, both branches and the combined model.
//! - `data`: splitting a labelled volume into support and query inputs.
//! - `device`: device residency and host-to-device transfer.
//! - `snapshot`: the versioned on-disk format.
//!
//! ## Key Components
//!
//! - `FewShotSegmentor`: the combined model, with `forward`, `predict`, `save` and `load`.
//! - `FewShotSegmentorConfig`: the configuration that drives its construction.
//! - `FewShotError`: the enum for all possible errors.

mod config;
mod data;
mod device;
mod error;
pub mod models;
mod prediction;
pub mod snapshot;

#[doc(inline)]
pub use config::{
    BranchPlan, ConvBlockConfig, DecoderStageConfig, EncoderStageConfig, FewShotSegmentorConfig,
    ModelParams, STAGES,
};
#[doc(inline)]
pub use data::{HalfSplit, SupportQuerySplit, VolumeSplitter};
#[doc(inline)]
pub use device::{to_device, DeviceKind, DeviceTransfer};
#[doc(inline)]
pub use error::{FewShotError, FewShotResult};
#[doc(inline)]
pub use models::{
    Conditioner, FewShotSegmentor, FewShotSegmentorRecord, Segmentor, FOREGROUND_THRESHOLD,
};
#[doc(inline)]
pub use prediction::SegmentationMask;
#[doc(inline)]
pub use snapshot::{SnapshotManifest, SNAPSHOT_FORMAT_VERSION};

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use burn::backend::{ndarray::NdArray, Autodiff};

    pub type TestBackend = NdArray<f32>;

    pub type TestAutodiffBackend = Autodiff<TestBackend>;

    /// A per-process path under the system temp directory.
    pub fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fewshot-{}-{name}.model", std::process::id()))
    }
}
