//! # Segmentor
//!
//! Segments a query image with a classification kernel supplied at call time. The encoder
//! and decoder are learned; the final 1x1 convolution is not. Its kernel is the conditioner's
//! output, passed to [`Segmentor::forward`] as a runtime argument.

use burn::{
    prelude::*,
    tensor::{activation::sigmoid, module::conv2d, ops::ConvOptions},
};

use super::encoder_decoder::{Encoded, EncoderDecoder};
use crate::{
    config::FewShotSegmentorConfig,
    error::{FewShotError, FewShotResult},
};

/// Configuration for the `Segmentor` branch.
#[derive(Config, Debug)]
pub struct SegmentorConfig {
    model: FewShotSegmentorConfig,
}

impl SegmentorConfig {
    /// Initializes a `Segmentor` with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the model configuration is invalid.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> FewShotResult<Segmentor<B>> {
        self.model.validate()?;
        let plan = self.model.segmentor_plan();

        Ok(Segmentor {
            trunk: plan.init(device),
            in_channels: plan.in_channels(),
            out_channels: plan.out_channels(),
        })
    }
}

/// Segmentor branch.
///
/// # Shapes
///   - query: `[batch_size, num_channels, height, width]`
///   - weights: `[num_filters]`
///   - output: `[batch_size, 1, height, width]`, foreground probabilities
#[derive(Module, Debug)]
pub struct Segmentor<B: Backend> {
    trunk: EncoderDecoder<B>,
    in_channels: usize,
    out_channels: usize,
}

impl<B: Backend> Segmentor<B> {
    /// Segments `query` with the classification kernel `weights`.
    ///
    /// # Errors
    ///
    /// - `MissingParameter` if `weights` is `None`; the final convolution has no kernel of its
    ///   own.
    /// - `InvalidTensorShape` if the query channel count is wrong, its spatial size cannot be
    ///   pooled four times, or `weights` does not have one entry per final feature channel.
    pub fn forward(
        &self,
        query: Tensor<B, 4>,
        weights: Option<Tensor<B, 1>>,
    ) -> FewShotResult<Tensor<B, 4>> {
        let weights = weights.ok_or(FewShotError::MissingParameter {
            operation: "segmentor classifier",
            parameter: "weights",
        })?;
        let [weight_len] = weights.dims();
        if weight_len != self.out_channels {
            return Err(FewShotError::shape(
                "segmentor classifier",
                format!("[{}]", self.out_channels),
                [weight_len],
            ));
        }

        let features = self.features(query)?;
        let kernel = weights.reshape([1, weight_len, 1, 1]);
        let logits = conv2d(
            features,
            kernel,
            None,
            ConvOptions::new([1, 1], [0, 0], [1, 1], 1),
        );

        Ok(sigmoid(logits))
    }

    /// Runs the encoder and decoder, returning the final feature map the dynamic kernel is
    /// applied to.
    ///
    /// # Shapes
    /// * Returns - `[batch_size, num_filters, height, width]`
    pub fn features(&self, query: Tensor<B, 4>) -> FewShotResult<Tensor<B, 4>> {
        let Encoded {
            deepest,
            features,
            indices,
        } = self.encode(query)?;
        let [_, _, _, deep_skip] = features;

        self.trunk.decode(deepest, indices, Some(deep_skip))
    }

    /// Runs only the encoder stages.
    pub fn encode(&self, query: Tensor<B, 4>) -> FewShotResult<Encoded<B>> {
        let dims = query.dims();
        if dims[1] != self.in_channels {
            return Err(FewShotError::shape(
                "segmentor",
                format!("[batch, {}, height, width]", self.in_channels),
                dims,
            ));
        }
        self.trunk.encode(query)
    }

    /// Length of the kernel `forward` expects.
    pub const fn weight_len(&self) -> usize {
        self.out_channels
    }

    pub const fn trunk(&self) -> &EncoderDecoder<B> {
        &self.trunk
    }

    pub fn trunk_mut(&mut self) -> &mut EncoderDecoder<B> {
        &mut self.trunk
    }
}
