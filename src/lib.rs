pub mod code_block;
pub mod context;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod mq_coder;
mod mq_table;

pub use code_block::{CodeBlockParams, STYLE_LAZY, STYLE_PTERM, STYLE_RESET, STYLE_SEGSYM, STYLE_TERMALL};
pub use context::{ContextSession, ContextState, Orientation};
pub use decoder::Tier1Decoder;
pub use encoder::{EncodedBlock, PassInfo, PassKind, Tier1Encoder};
pub use error::CodingError;
pub use mq_coder::{MqDecoder, MqEncoder};
