//! # Conditioner
//!
//! Regresses the segmentor's classification kernel from a support batch. The support image
//! is stacked with its binary mask, passed through an encoder-decoder without skip features,
//! averaged over space and over the batch, and projected to the kernel length.

use burn::{
    nn::{Linear, LinearConfig},
    prelude::*,
};

use super::encoder_decoder::{Encoded, EncoderDecoder};
use crate::{
    config::FewShotSegmentorConfig,
    error::{FewShotError, FewShotResult},
};

/// Configuration for the `Conditioner` branch.
#[derive(Config, Debug)]
pub struct ConditionerConfig {
    model: FewShotSegmentorConfig,
}

impl ConditionerConfig {
    /// Initializes a `Conditioner` with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the model configuration is invalid.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> FewShotResult<Conditioner<B>> {
        self.model.validate()?;
        let plan = self.model.conditioner_plan();

        Ok(Conditioner {
            trunk: plan.init(device),
            projection: LinearConfig::new(plan.out_channels(), self.model.weight_len())
                .with_bias(true)
                .init(device),
            in_channels: plan.in_channels(),
        })
    }
}

/// Conditioner branch.
///
/// # Shapes
///   - input: `[batch_size, num_channels + 1, height, width]`
///   - output: `[num_filters]`, one vector for the whole batch
#[derive(Module, Debug)]
pub struct Conditioner<B: Backend> {
    trunk: EncoderDecoder<B>,
    projection: Linear<B>,
    in_channels: usize,
}

impl<B: Backend> Conditioner<B> {
    /// Regresses the classification kernel from a support batch.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTensorShape` if the input channel count is wrong or the spatial size
    /// cannot be pooled four times.
    pub fn forward(&self, support: Tensor<B, 4>) -> FewShotResult<Tensor<B, 1>> {
        let Encoded {
            deepest, indices, ..
        } = self.encode(support)?;
        let decoded = self.trunk.decode(deepest, indices, None)?;

        let [batch_size, channels, _, _] = decoded.dims();
        let per_sample = decoded
            .mean_dim(3)
            .mean_dim(2)
            .reshape([batch_size, channels]);
        // Every support sample of the batch contributes to the same kernel.
        let shared = per_sample.mean_dim(0);
        let weights = self.projection.forward(shared);

        let [_, weight_len] = weights.dims();
        Ok(weights.reshape([weight_len]))
    }

    /// Runs only the encoder stages.
    pub fn encode(&self, support: Tensor<B, 4>) -> FewShotResult<Encoded<B>> {
        let dims = support.dims();
        if dims[1] != self.in_channels {
            return Err(FewShotError::shape(
                "conditioner",
                format!("[batch, {}, height, width]", self.in_channels),
                dims,
            ));
        }
        self.trunk.encode(support)
    }

    pub const fn trunk(&self) -> &EncoderDecoder<B> {
        &self.trunk
    }

    pub fn trunk_mut(&mut self) -> &mut EncoderDecoder<B> {
        &mut self.trunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ModelParams, tests::TestBackend};
    use burn::tensor::Distribution;

    fn small_config() -> FewShotSegmentorConfig {
        FewShotSegmentorConfig::new()
            .with_params(
                ModelParams::new()
                    .with_num_filters(8)
                    .with_kernel_h(3)
                    .with_kernel_w(3),
            )
            .with_conditioner_filters(4)
    }

    #[test]
    fn test_weight_length_independent_of_input_size() {
        let device = Default::default();
        let conditioner = ConditionerConfig::new(small_config())
            .init::<TestBackend>(&device)
            .unwrap();

        for [batch_size, height, width] in [[1, 16, 16], [3, 32, 16], [2, 48, 64]] {
            let support = Tensor::<TestBackend, 4>::random(
                [batch_size, 2, height, width],
                Distribution::Default,
                &device,
            );
            let weights = conditioner.forward(support).unwrap();
            assert_eq!(weights.dims(), [8]);
        }
    }

    #[test]
    fn test_default_weight_length_is_64() {
        let device = Default::default();
        let config = FewShotSegmentorConfig::new().with_params(
            ModelParams::new().with_kernel_h(1).with_kernel_w(1),
        );
        let conditioner = ConditionerConfig::new(config)
            .init::<TestBackend>(&device)
            .unwrap();
        let support = Tensor::<TestBackend, 4>::random([1, 2, 16, 16], Distribution::Default, &device);

        assert_eq!(conditioner.forward(support).unwrap().dims(), [64]);
    }

    #[test]
    fn test_batch_shares_one_weight_vector() {
        let device = Default::default();
        let conditioner = ConditionerConfig::new(small_config())
            .init::<TestBackend>(&device)
            .unwrap();
        let sample = Tensor::<TestBackend, 4>::random([1, 2, 16, 16], Distribution::Default, &device);

        // A batch of identical samples averages to the single-sample kernel.
        let single = conditioner.forward(sample.clone()).unwrap();
        let repeated = conditioner
            .forward(Tensor::cat(vec![sample.clone(), sample], 0))
            .unwrap();
        let diff = (single - repeated).abs().max().into_scalar();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_rejects_query_shaped_input() {
        let device = Default::default();
        let conditioner = ConditionerConfig::new(small_config())
            .init::<TestBackend>(&device)
            .unwrap();
        let query = Tensor::<TestBackend, 4>::zeros([1, 1, 16, 16], &device);

        assert!(matches!(
            conditioner.forward(query),
            Err(FewShotError::InvalidTensorShape {
                operation: "conditioner",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_too_small_input() {
        let device = Default::default();
        let conditioner = ConditionerConfig::new(small_config())
            .init::<TestBackend>(&device)
            .unwrap();
        let support = Tensor::<TestBackend, 4>::zeros([1, 2, 8, 8], &device);

        assert!(conditioner.forward(support).is_err());
    }
}
