//! Explicit per-stage block configurations.
//!
//! A [`BranchPlan`] is computed once from the hyperparameter record; each block of a branch
//! is then built from its own entry, so no block depends on the construction order of
//! another.

use burn::prelude::*;

use super::params::ModelParams;

/// Number of encoder (and decoder) stages per branch.
pub const STAGES: usize = 4;

/// Configuration of one conv -> PReLU -> batch-norm unit.
#[derive(Config, Debug, PartialEq)]
pub struct ConvBlockConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Number of output channels.
    pub out_channels: usize,
    /// Kernel size `[height, width]`.
    #[config(default = "[5, 5]")]
    pub kernel_size: [usize; 2],
    /// Convolution stride.
    #[config(default = "1")]
    pub stride: usize,
    /// Apply channel/spatial squeeze-excite after the unit.
    #[config(default = "false")]
    pub se_block: bool,
    /// Channel dropout probability after the unit.
    #[config(default = "0.0")]
    pub drop_out: f64,
}

impl ConvBlockConfig {
    /// Same padding for odd kernels.
    pub const fn padding(&self) -> [usize; 2] {
        [(self.kernel_size[0] - 1) / 2, (self.kernel_size[1] - 1) / 2]
    }

    fn from_params(params: &ModelParams, in_channels: usize, out_channels: usize) -> Self {
        Self::new(in_channels, out_channels)
            .with_kernel_size([params.kernel_h, params.kernel_w])
            .with_stride(params.stride_conv)
            .with_se_block(params.se_block)
            .with_drop_out(params.drop_out)
    }
}

/// Configuration of one encoder stage: a conv unit followed by max-pooling.
#[derive(Config, Debug, PartialEq)]
pub struct EncoderStageConfig {
    pub block: ConvBlockConfig,
    #[config(default = "2")]
    pub pool: usize,
    #[config(default = "2")]
    pub stride_pool: usize,
}

/// Configuration of one decoder stage: max-unpooling, optional skip concatenation, conv unit.
#[derive(Config, Debug, PartialEq)]
pub struct DecoderStageConfig {
    pub block: ConvBlockConfig,
    /// Channels of the skip feature map concatenated before the conv unit, if any.
    #[config(default = "None")]
    pub skip_channels: Option<usize>,
}

/// All block configurations of one encoder-decoder branch.
///
/// Index 0 of `encoders` and `decoders` is stage 1. Decoding runs from stage 4 down to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchPlan {
    pub encoders: [EncoderStageConfig; STAGES],
    pub bottleneck: ConvBlockConfig,
    pub decoders: [DecoderStageConfig; STAGES],
}

impl BranchPlan {
    /// Builds the plan of a branch whose first block reads `in_channels` and whose every block
    /// emits `filters` channels. `deep_skip` is the channel count of the encoder stage 4
    /// features concatenated in decoder stage 4.
    pub(crate) fn build(
        params: &ModelParams,
        in_channels: usize,
        filters: usize,
        deep_skip: Option<usize>,
    ) -> Self {
        let encoders = std::array::from_fn(|stage| {
            let input = if stage == 0 { in_channels } else { filters };
            EncoderStageConfig::new(ConvBlockConfig::from_params(params, input, filters))
                .with_pool(params.pool)
                .with_stride_pool(params.stride_pool)
        });

        let bottleneck = ConvBlockConfig::from_params(params, filters, filters)
            .with_se_block(false)
            .with_drop_out(0.0);

        let decoders = std::array::from_fn(|stage| {
            let skip_channels = if stage == STAGES - 1 { deep_skip } else { None };
            let input = filters + skip_channels.unwrap_or(0);
            DecoderStageConfig::new(ConvBlockConfig::from_params(params, input, filters))
                .with_skip_channels(skip_channels)
        });

        Self {
            encoders,
            bottleneck,
            decoders,
        }
    }

    /// Channels expected at the branch input.
    pub const fn in_channels(&self) -> usize {
        self.encoders[0].block.in_channels
    }

    /// Channels of the final decoder output.
    pub const fn out_channels(&self) -> usize {
        self.decoders[0].block.out_channels
    }
}
