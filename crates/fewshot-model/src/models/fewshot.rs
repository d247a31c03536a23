//! # Few-Shot Segmentor
//!
//! Couples a [`Conditioner`] and a [`Segmentor`]: the conditioner turns a support batch into a
//! classification kernel, the segmentor applies it to the query batch.
//!
//! Training and evaluation modes follow Burn's backend split. A model on an `Autodiff`
//! backend normalizes with batch statistics and drops channels; `model.valid()` gives the
//! evaluation model, whose dropout units only fire after [`FewShotSegmentor::enable_test_dropout`].

use std::path::Path;

use burn::{
    module::{AutodiffModule, Ignored},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use fewshot_extra_ops::ChannelDropout;

use super::{
    conditioner::{Conditioner, ConditionerConfig},
    segmentor::{Segmentor, SegmentorConfig},
};
use crate::{
    config::FewShotSegmentorConfig,
    data::{HalfSplit, VolumeSplitter},
    device::{to_device, DeviceKind},
    error::{FewShotError, FewShotResult},
    prediction::SegmentationMask,
    snapshot,
};

/// Probability above which a pixel is labelled foreground.
pub const FOREGROUND_THRESHOLD: f32 = 0.5;

impl FewShotSegmentorConfig {
    /// Initializes a `FewShotSegmentor` with this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> FewShotResult<FewShotSegmentor<B>> {
        self.validate()?;

        Ok(FewShotSegmentor {
            conditioner: ConditionerConfig::new(self.clone()).init(device)?,
            segmentor: SegmentorConfig::new(self.clone()).init(device)?,
            config: Ignored(self.clone()),
        })
    }
}

/// The combined conditioner/segmentor model.
#[derive(Module, Debug)]
pub struct FewShotSegmentor<B: Backend> {
    conditioner: Conditioner<B>,
    segmentor: Segmentor<B>,
    config: Ignored<FewShotSegmentorConfig>,
}

impl<B: Backend> FewShotSegmentor<B> {
    /// Segments `query` conditioned on `support`.
    ///
    /// # Shapes
    /// * `support` - `[support_batch, num_channels + 1, height, width]`
    /// * `query` - `[query_batch, num_channels, height, width]`
    /// * Returns - `[query_batch, 1, height, width]` foreground probabilities
    ///
    /// # Errors
    ///
    /// Returns `InvalidTensorShape` if either input has the wrong channel count or cannot be
    /// pooled four times.
    pub fn forward(
        &self,
        support: Tensor<B, 4>,
        query: Tensor<B, 4>,
    ) -> FewShotResult<Tensor<B, 4>> {
        let weights = self.conditioner.forward(support)?;
        self.segmentor.forward(query, Some(weights))
    }

    pub fn config(&self) -> &FewShotSegmentorConfig {
        &self.config.0
    }

    pub const fn conditioner(&self) -> &Conditioner<B> {
        &self.conditioner
    }

    pub const fn segmentor(&self) -> &Segmentor<B> {
        &self.segmentor
    }

    /// Forces the channel dropout of the four encoder and four decoder stages of both
    /// branches active, for Monte-Carlo sampling on an evaluation model.
    pub fn enable_test_dropout(&mut self) {
        self.set_test_time_dropout(true);
    }

    /// Sets the test-time flag of every encoder and decoder dropout unit.
    pub fn set_test_time_dropout(&mut self, active: bool) {
        self.conditioner.trunk_mut().set_test_time_dropout(active);
        self.segmentor.trunk_mut().set_test_time_dropout(active);
    }

    /// Every encoder and decoder dropout unit: conditioner stages 1..=4, then segmentor
    /// stages 1..=4, encoder before decoder within a stage.
    pub fn dropout_units(&self) -> Vec<&ChannelDropout<B>> {
        [self.conditioner.trunk(), self.segmentor.trunk()]
            .into_iter()
            .flat_map(|trunk| trunk.dropout_stages())
            .flat_map(|(encoder, decoder)| [encoder.dropout(), decoder.dropout()])
            .collect()
    }

    /// Test-time flags of [`FewShotSegmentor::dropout_units`], in the same order.
    pub fn test_time_dropout_states(&self) -> Vec<bool> {
        self.dropout_units()
            .into_iter()
            .map(ChannelDropout::test_time)
            .collect()
    }

    /// Whether the parameters live in accelerator memory.
    pub fn is_on_accelerator(&self) -> bool
    where
        Device<B>: DeviceKind,
    {
        self.devices()
            .first()
            .is_some_and(DeviceKind::is_accelerator)
    }

    /// Whether every parameter lives on `device`.
    pub fn is_resident_on(&self, device: &Device<B>) -> bool {
        self.devices().iter().all(|d| d == device)
    }

    /// Writes a versioned snapshot; see [`crate::snapshot`] for the layout.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotFailed` if either file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> FewShotResult<()> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "saving model");
        snapshot::save(self, path)
    }

    /// Rebuilds a model from a snapshot written by [`FewShotSegmentor::save`].
    ///
    /// # Errors
    ///
    /// Returns `SnapshotFailed` if the files cannot be read, `UnsupportedSnapshotVersion` for
    /// foreign formats and `InvalidConfiguration` if the stored configuration is invalid.
    pub fn load(path: impl AsRef<Path>, device: &Device<B>) -> FewShotResult<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "loading model");
        snapshot::load(path, device)
    }

    /// Segments the query half of a labelled volume, conditioned on its support half.
    ///
    /// Uses [`HalfSplit`]; see [`FewShotSegmentor::predict_with`].
    pub fn predict(
        &self,
        volume: Tensor<B, 4>,
        labels: Tensor<B, 3, Int>,
        query_label: i64,
        device: &Device<B>,
        enable_dropout: bool,
    ) -> FewShotResult<SegmentationMask> {
        self.predict_with(&HalfSplit, volume, labels, query_label, device, enable_dropout)
    }

    /// Splits `volume` and `labels` with `splitter`, moves the inputs to `device`, runs the
    /// forward pass and thresholds the probabilities at [`FOREGROUND_THRESHOLD`].
    ///
    /// Only evaluation models are accepted: call it on `model.valid()`, or use
    /// [`FewShotSegmentor::predict_no_grad`]. With `enable_dropout` the pass runs on a copy
    /// with test-time dropout enabled; `self` is not modified.
    ///
    /// # Errors
    ///
    /// - `GradientTrackingEnabled` on an autodiff backend.
    /// - `DeviceMismatch` if the parameters are not on `device`.
    /// - Any error of the splitter or of [`FewShotSegmentor::forward`].
    pub fn predict_with<S: VolumeSplitter<B>>(
        &self,
        splitter: &S,
        volume: Tensor<B, 4>,
        labels: Tensor<B, 3, Int>,
        query_label: i64,
        device: &Device<B>,
        enable_dropout: bool,
    ) -> FewShotResult<SegmentationMask> {
        if B::ad_enabled() {
            return Err(FewShotError::GradientTrackingEnabled {
                operation: "predict",
            });
        }
        if !self.is_resident_on(device) {
            return Err(FewShotError::DeviceMismatch {
                expected: format!("{device:?}"),
                actual: format!("{:?}", self.devices()),
            });
        }

        let split = splitter.split(volume, labels, query_label)?;
        let support: Tensor<B, 4> = to_device(split.support, device)?;
        let query: Tensor<B, 4> = to_device(split.query, device)?;
        // Moved with the inputs so the whole split lives on `device`; the forward pass does
        // not read the query labels.
        let _query_labels: Tensor<B, 3, Int> = to_device(split.query_labels, device)?;

        tracing::debug!(
            query_label,
            enable_dropout,
            support = ?support.dims(),
            query = ?query.dims(),
            "running prediction",
        );

        let probabilities = if enable_dropout {
            let mut sampler = self.clone();
            sampler.enable_test_dropout();
            sampler.forward(support, query)?
        } else {
            self.forward(support, query)?
        };

        SegmentationMask::from_tensor(probabilities.greater_elem(FOREGROUND_THRESHOLD))
    }
}

impl<B: AutodiffBackend> FewShotSegmentor<B> {
    /// Runs [`FewShotSegmentor::predict`] on the evaluation model, so batch-norm uses its
    /// running statistics and no gradient graph is built.
    pub fn predict_no_grad(
        &self,
        volume: Tensor<B, 4>,
        labels: Tensor<B, 3, Int>,
        query_label: i64,
        device: &Device<B>,
        enable_dropout: bool,
    ) -> FewShotResult<SegmentationMask> {
        self.valid().predict(
            volume.inner(),
            labels.inner(),
            query_label,
            device,
            enable_dropout,
        )
    }
}
