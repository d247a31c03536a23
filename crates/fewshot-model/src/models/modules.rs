mod blocks;
mod squeeze_excite;

pub use blocks::{ConvBlock, DecoderBlock, EncoderBlock, EncoderOutput, PoolingIndices};
pub use squeeze_excite::{ChannelSpatialSe, ChannelSpatialSeConfig};
