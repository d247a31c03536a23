//! Additional operations for the Burn deep learning framework
//!
//! This crate provides the operations an unpooling encoder-decoder needs but that are not
//! yet available in the core Burn framework.

use burn::prelude::*;

mod channel_dropout;
mod unpool;

// Convenient re-exports
pub use channel_dropout::{ChannelDropout, ChannelDropoutConfig};
pub use unpool::max_unpool2d;

/// Additional operations for Burn tensors
pub trait TensorExtraOps<B: Backend> {
    /// Invert a 2-D max-pooling using the indices it returned.
    fn max_unpool2d(
        self,
        indices: Tensor<B, 4, Int>,
        kernel_size: [usize; 2],
        stride: [usize; 2],
        output_size: [usize; 2],
    ) -> Self;
}

impl<B: Backend> TensorExtraOps<B> for Tensor<B, 4> {
    fn max_unpool2d(
        self,
        indices: Tensor<B, 4, Int>,
        kernel_size: [usize; 2],
        stride: [usize; 2],
        output_size: [usize; 2],
    ) -> Self {
        max_unpool2d(self, indices, kernel_size, stride, output_size)
    }
}
