//! Convolutional building blocks shared by the conditioner and the segmentor.
//!
//! - `ConvBlock`: conv -> PReLU -> batch-norm, the unit every other block wraps. Used alone
//!   as the bottleneck.
//! - `EncoderBlock`: conv unit, optional squeeze-excite, channel dropout, then max-pooling
//!   that records its indices.
//! - `DecoderBlock`: max-unpooling with the mirrored encoder's indices, optional skip
//!   concatenation, then the same post-processing as the encoder.

use burn::{
    module::Ignored,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PRelu, PReluConfig, PaddingConfig2d,
    },
    prelude::*,
    tensor::module::max_pool2d_with_indices,
};
use fewshot_extra_ops::{ChannelDropout, ChannelDropoutConfig, TensorExtraOps};

use super::squeeze_excite::{ChannelSpatialSe, ChannelSpatialSeConfig};
use crate::{
    config::{ConvBlockConfig, DecoderStageConfig, EncoderStageConfig},
    error::{FewShotError, FewShotResult},
};

impl ConvBlockConfig {
    /// Creates a new `ConvBlock` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ConvBlock<B> {
        let [pad_h, pad_w] = self.padding();
        ConvBlock {
            conv: Conv2dConfig::new([self.in_channels, self.out_channels], self.kernel_size)
                .with_stride([self.stride, self.stride])
                .with_padding(PaddingConfig2d::Explicit(pad_h, pad_w))
                .init(device),
            prelu: PReluConfig::new().init(device),
            norm: BatchNormConfig::new(self.out_channels).init(device),
            in_channels: self.in_channels,
        }
    }
}

/// Conv -> PReLU -> batch-norm unit.
///
/// # Shapes
///   - input: `[batch_size, in_channels, height, width]`
///   - output: `[batch_size, out_channels, height, width]`
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    prelu: PRelu<B>,
    norm: BatchNorm<B, 2>,
    in_channels: usize,
}

impl<B: Backend> ConvBlock<B> {
    /// # Errors
    ///
    /// Returns `InvalidTensorShape` if the input does not have `in_channels` channels.
    pub fn forward(&self, x: Tensor<B, 4>) -> FewShotResult<Tensor<B, 4>> {
        let dims = x.dims();
        if dims[1] != self.in_channels {
            return Err(FewShotError::shape(
                "conv block",
                format!("[_, {}, _, _]", self.in_channels),
                dims,
            ));
        }
        let x = self.conv.forward(x);
        let x = self.prelu.forward(x);
        Ok(self.norm.forward(x))
    }
}

/// Indices recorded by an encoder's max-pooling, together with the pooling geometry and the
/// size of the map they index into.
#[derive(Debug, Clone)]
pub struct PoolingIndices<B: Backend> {
    pub indices: Tensor<B, 4, Int>,
    pub kernel_size: [usize; 2],
    pub stride: [usize; 2],
    pub input_size: [usize; 2],
}

impl<B: Backend> PoolingIndices<B> {
    /// Whether the recorded windows cover `input_size` exactly.
    fn tiles_input(&self) -> bool {
        let [_, _, height, width] = self.indices.dims();
        let tiles = |pooled: usize, kernel: usize, stride: usize, size: usize| {
            pooled > 0 && (pooled - 1) * stride + kernel == size
        };
        tiles(height, self.kernel_size[0], self.stride[0], self.input_size[0])
            && tiles(width, self.kernel_size[1], self.stride[1], self.input_size[1])
    }
}

/// Outputs of one encoder stage.
#[derive(Debug, Clone)]
pub struct EncoderOutput<B: Backend> {
    /// The pooled map passed to the next stage.
    pub pooled: Tensor<B, 4>,
    /// The pre-pool map, available as a skip connection.
    pub features: Tensor<B, 4>,
    pub indices: PoolingIndices<B>,
}

impl EncoderStageConfig {
    /// Creates a new `EncoderBlock` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> EncoderBlock<B> {
        EncoderBlock {
            block: self.block.init(device),
            se: self
                .block
                .se_block
                .then(|| ChannelSpatialSeConfig::new(self.block.out_channels).init(device)),
            dropout: ChannelDropoutConfig::new()
                .with_prob(self.block.drop_out)
                .init(device),
            pool: self.pool,
            stride_pool: self.stride_pool,
        }
    }
}

/// Encoder stage.
///
/// # Shapes
///   - input: `[batch_size, in_channels, height, width]`
///   - pooled: `[batch_size, out_channels, (height - pool) / stride_pool + 1, ...]`
///   - features: `[batch_size, out_channels, height, width]`
#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    block: ConvBlock<B>,
    se: Option<ChannelSpatialSe<B>>,
    dropout: ChannelDropout<B>,
    pool: usize,
    stride_pool: usize,
}

impl<B: Backend> EncoderBlock<B> {
    /// # Errors
    ///
    /// Returns `InvalidTensorShape` on a channel mismatch, or when the pooling windows do not
    /// tile the spatial dimensions exactly.
    pub fn forward(&self, x: Tensor<B, 4>) -> FewShotResult<EncoderOutput<B>> {
        let [_, _, height, width] = x.dims();
        for size in [height, width] {
            if size < self.pool || (size - self.pool) % self.stride_pool != 0 {
                return Err(FewShotError::shape(
                    "encoder pooling",
                    format!(
                        "spatial size >= {} and tiled by pool {} / stride {}",
                        self.pool, self.pool, self.stride_pool
                    ),
                    [height, width],
                ));
            }
        }

        let features = self.block.forward(x)?;
        let features = match &self.se {
            Some(se) => se.forward(features),
            None => features,
        };
        let features = self.dropout.forward(features);

        let (pooled, indices) = max_pool2d_with_indices(
            features.clone(),
            [self.pool, self.pool],
            [self.stride_pool, self.stride_pool],
            [0, 0],
            [1, 1],
        );

        Ok(EncoderOutput {
            pooled,
            features,
            indices: PoolingIndices {
                indices,
                kernel_size: [self.pool, self.pool],
                stride: [self.stride_pool, self.stride_pool],
                input_size: [height, width],
            },
        })
    }

    pub const fn dropout(&self) -> &ChannelDropout<B> {
        &self.dropout
    }

    pub fn set_test_time_dropout(&mut self, active: bool) {
        self.dropout.set_test_time(active);
    }
}

impl DecoderStageConfig {
    /// Creates a new `DecoderBlock` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> DecoderBlock<B> {
        DecoderBlock {
            block: self.block.init(device),
            se: self
                .block
                .se_block
                .then(|| ChannelSpatialSeConfig::new(self.block.out_channels).init(device)),
            dropout: ChannelDropoutConfig::new()
                .with_prob(self.block.drop_out)
                .init(device),
            skip_channels: Ignored(self.skip_channels),
        }
    }
}

/// Decoder stage.
///
/// # Shapes
///   - input: `[batch_size, channels, pooled_height, pooled_width]`
///   - skip: `[batch_size, skip_channels, height, width]`
///   - output: `[batch_size, out_channels, height, width]`
#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    block: ConvBlock<B>,
    se: Option<ChannelSpatialSe<B>>,
    dropout: ChannelDropout<B>,
    skip_channels: Ignored<Option<usize>>,
}

impl<B: Backend> DecoderBlock<B> {
    /// Unpools `x` with `indices`, concatenates `skip` in front of it when this stage was
    /// built with a skip connection, and applies the conv unit.
    ///
    /// # Errors
    ///
    /// - `MissingParameter` if the stage expects skip features and none are given.
    /// - `InvalidTensorShape` if `x` does not match the indices, the skip map does not match
    ///   the unpooled map, or the stage has no skip connection but one is given.
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        skip: Option<Tensor<B, 4>>,
        indices: PoolingIndices<B>,
    ) -> FewShotResult<Tensor<B, 4>> {
        let dims = x.dims();
        let index_dims = indices.indices.dims();
        if dims != index_dims {
            return Err(FewShotError::shape(
                "decoder unpooling",
                format!("{index_dims:?} (pooling indices shape)"),
                dims,
            ));
        }
        if !indices.tiles_input() {
            return Err(FewShotError::shape(
                "decoder unpooling",
                format!(
                    "{:?} windows of {:?} with stride {:?}",
                    index_dims, indices.kernel_size, indices.stride
                ),
                indices.input_size,
            ));
        }

        let [batch_size, _, _, _] = dims;
        let [height, width] = indices.input_size;
        let unpooled = x.max_unpool2d(
            indices.indices,
            indices.kernel_size,
            indices.stride,
            indices.input_size,
        );

        let input = match (self.skip_channels.0, skip) {
            (Some(channels), Some(skip)) => {
                let skip_dims = skip.dims();
                if skip_dims != [batch_size, channels, height, width] {
                    return Err(FewShotError::shape(
                        "decoder skip connection",
                        format!("[{batch_size}, {channels}, {height}, {width}]"),
                        skip_dims,
                    ));
                }
                Tensor::cat(vec![skip, unpooled], 1)
            }
            (Some(_), None) => {
                return Err(FewShotError::MissingParameter {
                    operation: "decoder skip connection",
                    parameter: "skip",
                });
            }
            (None, Some(skip)) => {
                return Err(FewShotError::shape(
                    "decoder skip connection",
                    "no skip features",
                    skip.dims(),
                ));
            }
            (None, None) => unpooled,
        };

        let x = self.block.forward(input)?;
        let x = match &self.se {
            Some(se) => se.forward(x),
            None => x,
        };
        Ok(self.dropout.forward(x))
    }

    pub const fn dropout(&self) -> &ChannelDropout<B> {
        &self.dropout
    }

    pub fn set_test_time_dropout(&mut self, active: bool) {
        self.dropout.set_test_time(active);
    }
}
