pub mod conditioner;
pub mod encoder_decoder;
pub mod fewshot;
pub mod modules;
pub mod segmentor;

pub use conditioner::{Conditioner, ConditionerConfig};
pub use encoder_decoder::{Encoded, EncoderDecoder};
pub use fewshot::{FewShotSegmentor, FewShotSegmentorRecord, FOREGROUND_THRESHOLD};
pub use segmentor::{Segmentor, SegmentorConfig};
