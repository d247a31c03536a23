//! Core configuration structures for the few-shot segmentor.

use burn::prelude::*;

use super::plan::BranchPlan;
use crate::error::{FewShotError, FewShotResult};

/// Hyperparameters shared by every convolutional block of both branches.
///
/// `num_channels` and `num_filters` describe the segmentor branch: the query image channel
/// count and the per-block filter count. The conditioner derives its own channel counts from
/// them (see [`FewShotSegmentorConfig`]).
#[derive(Config, Debug, PartialEq)]
pub struct ModelParams {
    /// Channels of the query image.
    #[config(default = "1")]
    pub num_channels: usize,
    /// Filters of every segmentor block; also the length of the regressed weight vector.
    #[config(default = "64")]
    pub num_filters: usize,
    /// Convolution kernel height.
    #[config(default = "5")]
    pub kernel_h: usize,
    /// Convolution kernel width.
    #[config(default = "5")]
    pub kernel_w: usize,
    /// Convolution stride.
    #[config(default = "1")]
    pub stride_conv: usize,
    /// Max-pooling window.
    #[config(default = "2")]
    pub pool: usize,
    /// Max-pooling stride.
    #[config(default = "2")]
    pub stride_pool: usize,
    /// Number of output classes.
    #[config(default = "1")]
    pub num_classes: usize,
    /// Recalibrate encoder and decoder outputs with channel/spatial squeeze-excite.
    #[config(default = "false")]
    pub se_block: bool,
    /// Channel dropout probability of encoder and decoder blocks.
    #[config(default = "0.0")]
    pub drop_out: f64,
}

/// Configuration of the combined conditioner/segmentor model.
#[derive(Config, Debug, PartialEq)]
pub struct FewShotSegmentorConfig {
    /// Shared block hyperparameters.
    #[config(default = "ModelParams::new()")]
    pub params: ModelParams,
    /// Filters of every conditioner block.
    #[config(default = "16")]
    pub conditioner_filters: usize,
}

impl FewShotSegmentorConfig {
    /// Validate the configuration and return appropriate errors for invalid settings.
    ///
    /// # Errors
    ///
    /// Returns `Err(FewShotError::InvalidConfiguration)` if any validation rule is violated.
    pub fn validate(&self) -> FewShotResult<()> {
        let p = &self.params;
        let invalid = |reason: String| Err(FewShotError::InvalidConfiguration { reason });

        if p.num_channels == 0 || p.num_filters == 0 || self.conditioner_filters == 0 {
            return invalid(format!(
                "channel and filter counts must be non-zero, got num_channels={}, num_filters={}, conditioner_filters={}",
                p.num_channels, p.num_filters, self.conditioner_filters
            ));
        }

        // Same padding only exists for odd kernels.
        if p.kernel_h % 2 == 0 || p.kernel_w % 2 == 0 {
            return invalid(format!(
                "kernel size must be odd, got {}x{}",
                p.kernel_h, p.kernel_w
            ));
        }

        // Unpooling writes back into the pre-pool map, so convolutions must keep the size.
        if p.stride_conv != 1 {
            return invalid(format!(
                "stride_conv must be 1, got {}",
                p.stride_conv
            ));
        }

        if p.pool == 0 || p.stride_pool == 0 {
            return invalid(format!(
                "pool size and stride must be non-zero, got pool={}, stride_pool={}",
                p.pool, p.stride_pool
            ));
        }

        if p.num_classes != 1 {
            return invalid(format!(
                "the dynamic classifier emits one foreground channel, got num_classes={}",
                p.num_classes
            ));
        }

        if !(0.0..1.0).contains(&p.drop_out) {
            return invalid(format!("drop_out must be in [0, 1), got {}", p.drop_out));
        }

        Ok(())
    }

    /// Channels of the support input: the image channels plus one mask channel.
    pub const fn support_channels(&self) -> usize {
        self.params.num_channels + 1
    }

    /// Length of the weight vector the conditioner regresses.
    pub const fn weight_len(&self) -> usize {
        self.params.num_filters
    }

    /// Total pooling factor applied by the four encoder stages along one axis,
    /// assuming non-overlapping windows.
    pub fn downsampling_factor(&self) -> usize {
        self.params.stride_pool.pow(super::STAGES as u32)
    }

    /// Per-stage block configurations of the conditioner branch.
    ///
    /// Every decoder stage consumes only the unpooled map; no skip features are concatenated.
    pub fn conditioner_plan(&self) -> BranchPlan {
        BranchPlan::build(
            &self.params,
            self.support_channels(),
            self.conditioner_filters,
            None,
        )
    }

    /// Per-stage block configurations of the segmentor branch.
    ///
    /// Decoder stage 4 concatenates the pre-pool features of encoder stage 4 with the
    /// unpooled bottleneck output.
    pub fn segmentor_plan(&self) -> BranchPlan {
        BranchPlan::build(
            &self.params,
            self.params.num_channels,
            self.params.num_filters,
            Some(self.params.num_filters),
        )
    }
}
