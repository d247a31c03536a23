//! # Encoder-Decoder Trunk
//!
//! Four pooling encoder stages, a bottleneck and four unpooling decoder stages. Both branches
//! own one trunk built from their [`BranchPlan`]; what they feed back into decoder stage 4 and
//! what they do with the final feature map is decided by the branch.

use burn::prelude::*;

use super::modules::{ConvBlock, DecoderBlock, EncoderBlock, PoolingIndices};
use crate::{config::BranchPlan, error::FewShotResult};

impl BranchPlan {
    /// Initializes the trunk described by this plan.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> EncoderDecoder<B> {
        let [e1, e2, e3, e4] = &self.encoders;
        let [d1, d2, d3, d4] = &self.decoders;
        EncoderDecoder {
            encode1: e1.init(device),
            encode2: e2.init(device),
            encode3: e3.init(device),
            encode4: e4.init(device),
            bottleneck: self.bottleneck.init(device),
            decode1: d1.init(device),
            decode2: d2.init(device),
            decode3: d3.init(device),
            decode4: d4.init(device),
        }
    }
}

/// Result of running the four encoder stages.
#[derive(Debug, Clone)]
pub struct Encoded<B: Backend> {
    /// Pooled output of stage 4, the bottleneck input.
    pub deepest: Tensor<B, 4>,
    /// Pre-pool feature maps of stages 1..=4.
    pub features: [Tensor<B, 4>; 4],
    /// Pooling indices of stages 1..=4.
    pub indices: [PoolingIndices<B>; 4],
}

/// Encoder-decoder trunk shared in structure by the conditioner and the segmentor.
#[derive(Module, Debug)]
pub struct EncoderDecoder<B: Backend> {
    encode1: EncoderBlock<B>,
    encode2: EncoderBlock<B>,
    encode3: EncoderBlock<B>,
    encode4: EncoderBlock<B>,
    bottleneck: ConvBlock<B>,
    decode1: DecoderBlock<B>,
    decode2: DecoderBlock<B>,
    decode3: DecoderBlock<B>,
    decode4: DecoderBlock<B>,
}

impl<B: Backend> EncoderDecoder<B> {
    /// Runs the four encoder stages.
    ///
    /// # Shapes
    /// * `x` - `[batch_size, in_channels, height, width]`
    /// * `deepest` - `[batch_size, filters, height / 16, width / 16]` for 2x2 pooling
    pub fn encode(&self, x: Tensor<B, 4>) -> FewShotResult<Encoded<B>> {
        let e1 = self.encode1.forward(x)?;
        let e2 = self.encode2.forward(e1.pooled)?;
        let e3 = self.encode3.forward(e2.pooled)?;
        let e4 = self.encode4.forward(e3.pooled)?;

        Ok(Encoded {
            deepest: e4.pooled,
            features: [e1.features, e2.features, e3.features, e4.features],
            indices: [e1.indices, e2.indices, e3.indices, e4.indices],
        })
    }

    /// Runs the bottleneck and the decoder stages 4 down to 1.
    ///
    /// `deep_skip` is concatenated in decoder stage 4 only; the shallower stages receive
    /// nothing but pooling indices.
    pub fn decode(
        &self,
        deepest: Tensor<B, 4>,
        indices: [PoolingIndices<B>; 4],
        deep_skip: Option<Tensor<B, 4>>,
    ) -> FewShotResult<Tensor<B, 4>> {
        let [ind1, ind2, ind3, ind4] = indices;

        let bn = self.bottleneck.forward(deepest)?;
        let d4 = self.decode4.forward(bn, deep_skip, ind4)?;
        let d3 = self.decode3.forward(d4, None, ind3)?;
        let d2 = self.decode2.forward(d3, None, ind2)?;
        self.decode1.forward(d2, None, ind1)
    }

    /// The four (encoder, decoder) stage pairs, by stage number.
    pub fn dropout_stages(&self) -> [(&EncoderBlock<B>, &DecoderBlock<B>); 4] {
        [
            (&self.encode1, &self.decode1),
            (&self.encode2, &self.decode2),
            (&self.encode3, &self.decode3),
            (&self.encode4, &self.decode4),
        ]
    }

    /// Mutable access to the four (encoder, decoder) stage pairs, by stage number.
    pub fn dropout_stages_mut(&mut self) -> [(&mut EncoderBlock<B>, &mut DecoderBlock<B>); 4] {
        [
            (&mut self.encode1, &mut self.decode1),
            (&mut self.encode2, &mut self.decode2),
            (&mut self.encode3, &mut self.decode3),
            (&mut self.encode4, &mut self.decode4),
        ]
    }

    /// Forces the channel dropout of every encoder and decoder stage on or off at inference.
    pub fn set_test_time_dropout(&mut self, active: bool) {
        for (encoder, decoder) in self.dropout_stages_mut() {
            encoder.set_test_time_dropout(active);
            decoder.set_test_time_dropout(active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{FewShotSegmentorConfig, ModelParams},
        tests::TestBackend,
    };
    use burn::tensor::Distribution;

    fn small_config() -> FewShotSegmentorConfig {
        FewShotSegmentorConfig::new()
            .with_params(
                ModelParams::new()
                    .with_num_filters(6)
                    .with_kernel_h(3)
                    .with_kernel_w(3)
                    .with_drop_out(0.3),
            )
            .with_conditioner_filters(4)
    }

    #[test]
    fn test_bottleneck_input_is_4x4_for_64x64() {
        let device = Default::default();
        let trunk = small_config().conditioner_plan().init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([2, 2, 64, 64], Distribution::Default, &device);

        let encoded = trunk.encode(x).unwrap();
        assert_eq!(encoded.deepest.dims(), [2, 4, 4, 4]);
        assert_eq!(encoded.features[0].dims(), [2, 4, 64, 64]);
        assert_eq!(encoded.features[3].dims(), [2, 4, 8, 8]);
        assert_eq!(encoded.indices[3].input_size, [8, 8]);
    }

    #[test]
    fn test_round_trip_restores_input_resolution() {
        let device = Default::default();
        let trunk = small_config().segmentor_plan().init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([1, 1, 32, 48], Distribution::Default, &device);

        let Encoded {
            deepest,
            features,
            indices,
        } = trunk.encode(x).unwrap();
        let [_, _, _, skip] = features;
        let decoded = trunk.decode(deepest, indices, Some(skip)).unwrap();
        assert_eq!(decoded.dims(), [1, 6, 32, 48]);
    }

    #[test]
    fn test_segmentor_trunk_requires_deep_skip() {
        let device = Default::default();
        let trunk = small_config().segmentor_plan().init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([1, 1, 16, 16], Distribution::Default, &device);

        let encoded = trunk.encode(x).unwrap();
        assert!(trunk.decode(encoded.deepest, encoded.indices, None).is_err());
    }

    #[test]
    fn test_dropout_toggle_reaches_every_stage() {
        let device = Default::default();
        let mut trunk = small_config().conditioner_plan().init::<TestBackend>(&device);

        for (encoder, decoder) in trunk.dropout_stages() {
            assert!(!encoder.dropout().is_active());
            assert!(!decoder.dropout().is_active());
        }

        trunk.set_test_time_dropout(true);
        for (encoder, decoder) in trunk.dropout_stages() {
            assert!(encoder.dropout().is_active());
            assert!(decoder.dropout().is_active());
        }
    }
}
