//! Concurrent spatial and channel squeeze-excite.
//!
//! The channel branch rescales each feature map by a gate computed from its global average;
//! the spatial branch rescales each pixel by a gate computed across channels. The block keeps
//! the element-wise maximum of both recalibrations.

use burn::{
    nn::conv::{Conv2d, Conv2dConfig},
    prelude::*,
    tensor::activation::{relu, sigmoid},
};

/// Configuration for the `ChannelSpatialSe` module.
#[derive(Config, Debug)]
pub struct ChannelSpatialSeConfig {
    /// Number of channels of the recalibrated map.
    pub channels: usize,
    /// Channel reduction of the excitation bottleneck.
    #[config(default = "2")]
    pub reduction: usize,
}

impl ChannelSpatialSeConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ChannelSpatialSe<B> {
        let reduced = (self.channels / self.reduction).max(1);
        ChannelSpatialSe {
            squeeze: Conv2dConfig::new([self.channels, reduced], [1, 1]).init(device),
            excite: Conv2dConfig::new([reduced, self.channels], [1, 1]).init(device),
            spatial: Conv2dConfig::new([self.channels, 1], [1, 1]).init(device),
        }
    }
}

/// Channel/spatial squeeze-excite block.
///
/// # Shapes
///   - input: `[batch_size, channels, height, width]`
///   - output: `[batch_size, channels, height, width]`
#[derive(Module, Debug)]
pub struct ChannelSpatialSe<B: Backend> {
    squeeze: Conv2d<B>,
    excite: Conv2d<B>,
    spatial: Conv2d<B>,
}

impl<B: Backend> ChannelSpatialSe<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let pooled = x.clone().mean_dim(2).mean_dim(3);
        let gate = relu(self.squeeze.forward(pooled));
        let channel_gate = sigmoid(self.excite.forward(gate));
        let channel = x.clone() * channel_gate;

        let spatial_gate = sigmoid(self.spatial.forward(x.clone()));
        let spatial = x * spatial_gate;

        channel.max_pair(spatial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestBackend;
    use burn::tensor::Distribution;

    #[test]
    fn test_se_preserves_shape() {
        let device = Default::default();
        let se = ChannelSpatialSeConfig::new(8).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([2, 8, 6, 5], Distribution::Default, &device);

        assert_eq!(se.forward(x).dims(), [2, 8, 6, 5]);
    }

    #[test]
    fn test_se_single_channel_keeps_one_hidden_unit() {
        let device = Default::default();
        let se = ChannelSpatialSeConfig::new(1).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::ones([1, 1, 3, 3], &device);

        assert_eq!(se.forward(x).dims(), [1, 1, 3, 3]);
    }

    #[test]
    fn test_se_gates_bound_positive_input() {
        let device = Default::default();
        let se = ChannelSpatialSeConfig::new(4).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::ones([1, 4, 4, 4], &device);

        // Both gates are sigmoids, so a map of ones is scaled into (0, 1].
        let output = se.forward(x);
        assert!(output.clone().max().into_scalar() <= 1.0);
        assert!(output.min().into_scalar() > 0.0);
    }
}
