use crate::utok;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 分词、解码和训练过程中可能出现的错误。
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    /// 词表中没有某个原始字节对应的基础符号，词表不完整。
    #[error("byte 0x{0:02X} has no base symbol in the vocabulary")]
    UnmappedByte(u8),
    /// 字符不属于当前字节字母表。
    #[error("symbol {0:?} is not part of the byte-level alphabet")]
    UnmappedSymbol(char),
    /// 还原出的字节序列不是当前模式下的合法编码。
    #[error("malformed byte sequence: {0}")]
    MalformedByteSequence(#[from] Malformed),
    #[error("unknown token id {0}")]
    UnknownId(utok),
    #[error("symbol {0:?} not found in vocabulary")]
    SymbolNotFound(String),
    #[error("invalid vocabulary: {0}")]
    InvalidVocab(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// 预分词的正则匹配失败，例如回溯超限。
    #[error("pre-tokenization failed: {0}")]
    PreTokenize(String),
    #[error("invalid special token pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// 字节序列不合法的具体原因。
#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Malformed {
    /// utf-16 模式下字节数为奇数，最后一个字节无法组成码元。
    #[error("odd utf-16 byte count {0}")]
    OddLength(usize),
    /// 不成对的代理码元。
    #[error("unpaired utf-16 surrogate 0x{0:04X}")]
    UnpairedSurrogate(u16),
    /// 非法 utf-8，`valid_up_to` 之前的字节是合法的。
    #[error("invalid utf-8 after {valid_up_to} valid bytes")]
    InvalidUtf8 { valid_up_to: usize },
    /// 流式解码结束时仍有未完成的字节。
    #[error("{0} trailing bytes form no complete character")]
    Truncated(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        let e = Error::from(Malformed::OddLength(5));
        assert_eq!(e.to_string(), "malformed byte sequence: odd utf-16 byte count 5");
        assert_eq!(
            Malformed::UnpairedSurrogate(0xD83D).to_string(),
            "unpaired utf-16 surrogate 0xD83D"
        );
        assert_eq!(
            Malformed::InvalidUtf8 { valid_up_to: 3 }.to_string(),
            "invalid utf-8 after 3 valid bytes"
        );
        assert_eq!(
            Malformed::Truncated(1).to_string(),
            "1 trailing bytes form no complete character"
        );
        assert_eq!(
            Error::PreTokenize("backtrack limit".into()).to_string(),
            "pre-tokenization failed: backtrack limit"
        );
    }
}
