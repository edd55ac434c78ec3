#![deny(warnings)]

mod alphabet;
mod bpe;
mod config;
mod decode_stream;
mod encoding;
mod error;
mod pre_tokenizer;
mod tokeneer;
mod trainer;
mod vocab;

use std::ops::Range;

pub use alphabet::Alphabet;
pub use bpe::{Bpe, Iter, MergeState};
pub use config::{BpeBuilder, BpeConfig, TrainerBuilder, TrainerConfig, DEFAULT_CACHE_CAPACITY};
pub use decode_stream::DecodeStream;
pub use encoding::Encoding;
pub use error::{Error, Malformed, Result};
pub use pre_tokenizer::{
    ByteLevelSplit, Identity, Piece, PreTokenizer, Whitespace, WhitespaceSplit,
};
pub use tokeneer::Tokeneer;
pub use trainer::{StopReason, Trainer, Training};
pub use vocab::{MergeRule, Vocab};

/// `utok` for token id.
#[allow(non_camel_case_types)]
pub type utok = u32;

/// 分词方法。
///
/// 方法只处理一个片段的原始字节，特殊词的切分和预分词由 [`Tokeneer`] 完成。
pub trait Method {
    fn vocab_size(&self) -> usize;
    /// 原始字节的提取方式。
    fn alphabet(&self) -> Alphabet;
    /// 词表内置的特殊词及其序号。
    fn internal_special(&self) -> impl IntoIterator<Item = (&str, utok)>;
    /// 将一个片段的原始字节编码为 token 及其在 `bytes` 中的范围。
    fn encode(&self, bytes: &[u8]) -> Result<impl IntoIterator<Item = (utok, Range<usize>)> + '_>;
    /// token -> 可见符号串；特殊词返回其文本。
    fn decode(&self, token: utok) -> Option<&str>;
    fn is_special(&self, token: utok) -> bool;
}
