//! # Channel Dropout
//!
//! Implements 2-D channel dropout: whole feature maps are zeroed at random and the surviving
//! ones are rescaled by the keep probability. Unlike `burn::nn::Dropout` the unit can be forced
//! active on an inference backend, which is what Monte-Carlo dropout needs at prediction time.

use burn::{prelude::*, tensor::Distribution};

/// Configuration for the `ChannelDropout` module.
#[derive(Config, Debug)]
pub struct ChannelDropoutConfig {
    /// The probability of zeroing a channel.
    #[config(default = "0.0")]
    pub prob: f64,
    /// Keep the unit active even when the backend does not track gradients.
    #[config(default = "false")]
    pub test_time: bool,
}

impl ChannelDropoutConfig {
    /// Initializes a new `ChannelDropout` module.
    pub const fn init<B: Backend>(&self, _device: &B::Device) -> ChannelDropout<B> {
        ChannelDropout {
            prob: self.prob,
            test_time: self.test_time,
            _phantom: std::marker::PhantomData,
        }
    }
}

/// ChannelDropout module.
#[derive(Module, Debug)]
pub struct ChannelDropout<B: Backend> {
    prob: f64,
    test_time: bool,
    _phantom: std::marker::PhantomData<B>,
}

impl<B: Backend> ChannelDropout<B> {
    /// Applies channel dropout to the input tensor.
    ///
    /// The unit is a no-op when `prob` is 0, or when the backend is not an autodiff backend and
    /// test-time dropout has not been forced on.
    ///
    /// # Shapes
    /// - input: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, channels, height, width]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        if !self.is_active() {
            return x;
        }
        let keep_prob = 1.0 - self.prob;
        let [batch_size, channels, _, _] = x.dims();

        let mask = Tensor::random(
            [batch_size, channels, 1, 1],
            Distribution::Bernoulli(keep_prob),
            &x.device(),
        );

        x * mask / keep_prob
    }

    /// Whether the next forward pass will drop channels.
    pub fn is_active(&self) -> bool {
        self.prob > 0.0 && (B::ad_enabled() || self.test_time)
    }

    /// Forces the unit on (or back to backend-driven behaviour) at inference time.
    pub fn set_test_time(&mut self, active: bool) {
        self.test_time = active;
    }

    /// Whether the unit has been forced on for inference.
    pub const fn test_time(&self) -> bool {
        self.test_time
    }

    /// The probability of zeroing a channel.
    pub const fn prob(&self) -> f64 {
        self.prob
    }
}
