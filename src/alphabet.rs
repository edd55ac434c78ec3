//! 字节级字母表：在 256 个原始字节和 256 个可见字符之间建立双射。
//!
//! 可打印的 ASCII 和 Latin-1 字节映射到同值的码点，
//! 其余 68 个字节按字节序依次映射到 `U+0100` 开始的码点。
//! 这与 GPT-2 的字节映射完全一致，以保证词表在不同实现间通用。
//!
//! utf-8 模式直接取文本的 utf-8 字节；
//! utf-16 模式先将文本转换为小端序、无 BOM 的 utf-16 码元，再逐字节映射。

use crate::{Error, Malformed, Result};
use std::{borrow::Cow, collections::HashSet};

/// 字节提取方式，同时决定使用哪一张映射表。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Alphabet {
    #[default]
    Utf8,
    Utf16,
}

/// 映射后码点的上界（不含）。
const INVERSE_LEN: usize = 0x100 + 68;

const fn is_direct(b: u8) -> bool {
    matches!(b, 0x21..=0x7E | 0xA1..=0xAC | 0xAE..=0xFF)
}

const fn build_table() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut n = 0u32;
    let mut b = 0usize;
    while b < 256 {
        let code = if is_direct(b as u8) {
            b as u32
        } else {
            n += 1;
            0x100 + n - 1
        };
        table[b] = match char::from_u32(code) {
            Some(c) => c,
            None => unreachable!(),
        };
        b += 1;
    }
    table
}

const fn build_inverse(table: &[char; 256]) -> [Option<u8>; INVERSE_LEN] {
    let mut inverse = [None; INVERSE_LEN];
    let mut b = 0usize;
    while b < 256 {
        inverse[table[b] as usize] = Some(b as u8);
        b += 1;
    }
    inverse
}

const TABLE: [char; 256] = build_table();

// 两种模式各持有一份独立的表
static UTF8_SYMBOLS: [char; 256] = TABLE;
static UTF8_BYTES: [Option<u8>; INVERSE_LEN] = build_inverse(&TABLE);
static UTF16_SYMBOLS: [char; 256] = TABLE;
static UTF16_BYTES: [Option<u8>; INVERSE_LEN] = build_inverse(&TABLE);

#[inline(always)]
const fn is_high_surrogate(unit: u16) -> bool {
    matches!(unit, 0xD800..=0xDBFF)
}

impl Alphabet {
    /// 字节 -> 可见字符，按字节序排列。
    #[inline]
    pub fn symbols(self) -> &'static [char; 256] {
        match self {
            Self::Utf8 => &UTF8_SYMBOLS,
            Self::Utf16 => &UTF16_SYMBOLS,
        }
    }

    #[inline]
    fn inverse(self) -> &'static [Option<u8>; INVERSE_LEN] {
        match self {
            Self::Utf8 => &UTF8_BYTES,
            Self::Utf16 => &UTF16_BYTES,
        }
    }

    /// 字母表中全部 256 个可见字符，训练器用它初始化词表。
    pub fn alphabet(self) -> HashSet<char> {
        self.symbols().iter().copied().collect()
    }

    #[inline]
    pub fn byte_to_symbol(self, byte: u8) -> char {
        self.symbols()[byte as usize]
    }

    #[inline]
    pub fn symbol_to_byte(self, symbol: char) -> Option<u8> {
        self.inverse().get(symbol as usize).copied().flatten()
    }

    /// 按模式提取文本的原始字节。
    pub fn extract(self, text: &str) -> Cow<'_, [u8]> {
        match self {
            Self::Utf8 => Cow::Borrowed(text.as_bytes()),
            Self::Utf16 => Cow::Owned(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
        }
    }

    /// [`extract`](Self::extract) 将产生的字节数，不实际分配。
    pub fn byte_len(self, text: &str) -> usize {
        match self {
            Self::Utf8 => text.len(),
            Self::Utf16 => text.chars().map(char::len_utf16).sum::<usize>() * 2,
        }
    }

    pub fn bytes_to_symbols(self, text: &str) -> String {
        let table = self.symbols();
        self.extract(text)
            .iter()
            .map(|&b| table[b as usize])
            .collect()
    }

    /// 将可见字符串逆映射为原始字节追加到 `buf`，不检查编码合法性。
    pub fn push_bytes(self, symbols: &str, buf: &mut Vec<u8>) -> Result<()> {
        buf.reserve(symbols.len());
        for c in symbols.chars() {
            buf.push(self.symbol_to_byte(c).ok_or(Error::UnmappedSymbol(c))?);
        }
        Ok(())
    }

    /// 将可见字符串逆映射为原始字节，并确认它们在当前模式下是合法编码。
    pub fn symbols_to_bytes(self, symbols: &str) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.push_bytes(symbols, &mut bytes)?;
        self.validate(&bytes)?;
        Ok(bytes)
    }

    pub fn validate(self, bytes: &[u8]) -> Result<()> {
        match self {
            Self::Utf8 => std::str::from_utf8(bytes).map(|_| ()).map_err(|e| {
                Malformed::InvalidUtf8 {
                    valid_up_to: e.valid_up_to(),
                }
                .into()
            }),
            Self::Utf16 => decode_utf16(bytes).map(|_| ()),
        }
    }

    /// 将原始字节重组为文本。
    pub fn bytes_to_text(self, bytes: &[u8]) -> Result<String> {
        match self {
            Self::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|e| {
                    Malformed::InvalidUtf8 {
                        valid_up_to: e.valid_up_to(),
                    }
                    .into()
                }),
            Self::Utf16 => decode_utf16(bytes),
        }
    }

    /// 解码 `bytes` 中不会被后续字节改变的最长前缀，返回文本和消耗的字节数。
    ///
    /// 未完成的 utf-8 序列、utf-16 的奇数尾字节和末尾的高位代理被保留给下一次调用。
    pub fn split_complete(self, bytes: &[u8]) -> Result<(String, usize)> {
        match self {
            Self::Utf8 => match std::str::from_utf8(bytes) {
                Ok(s) => Ok((s.to_string(), bytes.len())),
                Err(e) if e.error_len().is_none() => {
                    let n = e.valid_up_to();
                    Ok((String::from_utf8_lossy(&bytes[..n]).into_owned(), n))
                }
                Err(e) => Err(Malformed::InvalidUtf8 {
                    valid_up_to: e.valid_up_to(),
                }
                .into()),
            },
            Self::Utf16 => {
                let mut n = bytes.len() / 2;
                if n > 0 && is_high_surrogate(unit_at(bytes, n - 1)) {
                    n -= 1;
                }
                let text = decode_utf16(&bytes[..n * 2])?;
                Ok((text, n * 2))
            }
        }
    }
}

#[inline(always)]
fn unit_at(bytes: &[u8], i: usize) -> u16 {
    u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]])
}

fn decode_utf16(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Malformed::OddLength(bytes.len()).into());
    }
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.map_err(|e| Error::from(Malformed::UnpairedSurrogate(e.unpaired_surrogate()))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpt2_table() {
        let a = Alphabet::Utf8;
        assert_eq!(a.byte_to_symbol(b'A'), 'A');
        assert_eq!(a.byte_to_symbol(b' '), '\u{0120}');
        assert_eq!(a.byte_to_symbol(b'\n'), '\u{010A}');
        assert_eq!(a.byte_to_symbol(0x00), '\u{0100}');
        assert_eq!(a.byte_to_symbol(0x7F), '\u{0121}');
        assert_eq!(a.byte_to_symbol(0xAD), '\u{0143}');
        assert_eq!(a.byte_to_symbol(0xFF), 'ÿ');
    }

    #[test]
    fn complete_bijection() {
        for a in [Alphabet::Utf8, Alphabet::Utf16] {
            assert_eq!(a.alphabet().len(), 256);
            for b in 0..=255u8 {
                assert_eq!(a.symbol_to_byte(a.byte_to_symbol(b)), Some(b));
            }
        }
        assert_eq!(Alphabet::Utf8.symbol_to_byte('가'), None);
        assert_eq!(Alphabet::Utf16.symbol_to_byte(' '), None);
    }

    #[test]
    fn utf16_extraction() {
        let a = Alphabet::Utf16;
        assert_eq!(
            &*a.extract("Hello"),
            &[0x48, 0x00, 0x65, 0x00, 0x6C, 0x00, 0x6C, 0x00, 0x6F, 0x00]
        );
        assert_eq!(&*a.extract("가나다"), &[0x00, 0xAC, 0x98, 0xB0, 0xE4, 0xB2]);
        assert_eq!(&*a.extract("😀"), &[0x3D, 0xD8, 0x00, 0xDE]);
        assert_eq!(a.byte_len("😀가"), 6);
        assert_eq!(Alphabet::Utf8.byte_len("😀가"), 7);
    }

    #[test]
    fn symbols_round_trip() {
        for a in [Alphabet::Utf8, Alphabet::Utf16] {
            for text in ["", "A", "Hello World", "안녕하세요", "你好世界", "🌍🚀💻", "\0\t\r\n\u{FEFF}"] {
                let symbols = a.bytes_to_symbols(text);
                let bytes = a.symbols_to_bytes(&symbols).unwrap();
                assert_eq!(a.bytes_to_text(&bytes).unwrap(), text);
            }
        }
    }

    #[test]
    fn utf16_malformed() {
        let a = Alphabet::Utf16;
        assert_eq!(
            a.symbols_to_bytes("Hello"),
            Err(Error::MalformedByteSequence(Malformed::OddLength(5)))
        );
        assert!(Alphabet::Utf8.symbols_to_bytes("Hello").is_ok());
        assert_eq!(
            a.bytes_to_text(&[0x3D, 0xD8]),
            Err(Error::MalformedByteSequence(Malformed::UnpairedSurrogate(0xD83D)))
        );
        assert_eq!(
            a.bytes_to_text(&[0x00, 0xDE, 0x41, 0x00]),
            Err(Error::MalformedByteSequence(Malformed::UnpairedSurrogate(0xDE00)))
        );
    }

    #[test]
    fn unmapped_symbol() {
        assert_eq!(
            Alphabet::Utf8.symbols_to_bytes("a b"),
            Err(Error::UnmappedSymbol(' '))
        );
    }

    #[test]
    fn split_utf8() {
        let a = Alphabet::Utf8;
        let bytes = "a가".as_bytes();
        assert_eq!(a.split_complete(&bytes[..2]).unwrap(), ("a".into(), 1));
        assert_eq!(a.split_complete(bytes).unwrap(), ("a가".into(), 4));
        assert!(a.split_complete(&[b'a', 0xFF, b'b']).is_err());
    }

    #[test]
    fn split_utf16() {
        let a = Alphabet::Utf16;
        let bytes = a.extract("a😀");
        assert_eq!(a.split_complete(&bytes[..3]).unwrap(), ("a".into(), 2));
        assert_eq!(a.split_complete(&bytes[..4]).unwrap(), ("a".into(), 2));
        assert_eq!(a.split_complete(&bytes[..5]).unwrap(), ("a".into(), 2));
        assert_eq!(a.split_complete(&bytes).unwrap(), ("a😀".into(), 6));
        assert!(a.split_complete(&[0x00, 0xDE]).is_err());
    }
}
