//! 预分词：在字节映射之前把文本切成互不影响的片段。

use crate::{Error, Result};
use std::{borrow::Cow, ops::Range, sync::LazyLock};

/// GPT-2 的切分规则。
const GPT2_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// 预分词得到的一个片段。
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Piece<'t> {
    /// 片段在原文中的字节范围。
    pub range: Range<usize>,
    /// 片段内容，开头可能带有原文中没有的空格，此时它比 `range` 长。
    pub text: Cow<'t, str>,
}

impl<'t> Piece<'t> {
    #[inline]
    fn borrowed(text: &'t str, range: Range<usize>) -> Self {
        Self {
            text: Cow::Borrowed(&text[range.clone()]),
            range,
        }
    }
}

/// 将文本切分为片段。
pub trait PreTokenizer: Send + Sync {
    fn split<'t>(&self, text: &'t str) -> Result<Vec<Piece<'t>>>;
}

/// GPT-2 风格的切分：缩写、字母串、数字串、其他符号串各自成段，
/// 单个前导空格附着在后一段上，空白串的最后一个空白留给下一段。
///
/// 片段首尾相接覆盖全文，不丢失任何字符。
/// 开启 `add_prefix_space` 时，不以空格开头的文本前会补一个空格，
/// 使第一个词和其他词一样带有前导空格。
#[derive(Clone, Copy, Default, Debug)]
pub struct ByteLevelSplit {
    add_prefix_space: bool,
}

/// 按 `\w+|[^\w\s]+` 切分，丢弃空白。
#[derive(Clone, Copy, Default, Debug)]
pub struct Whitespace;

/// 按空白切分，丢弃空白。
#[derive(Clone, Copy, Default, Debug)]
pub struct WhitespaceSplit;

/// 不切分。
#[derive(Clone, Copy, Default, Debug)]
pub struct Identity;

impl ByteLevelSplit {
    #[inline]
    pub const fn new(add_prefix_space: bool) -> Self {
        Self { add_prefix_space }
    }

    #[must_use]
    pub fn add_prefix_space(mut self, v: bool) -> Self {
        self.add_prefix_space = v;
        self
    }
}

impl PreTokenizer for ByteLevelSplit {
    fn split<'t>(&self, text: &'t str) -> Result<Vec<Piece<'t>>> {
        static RE: LazyLock<fancy_regex::Regex> =
            LazyLock::new(|| fancy_regex::Regex::new(GPT2_PATTERN).unwrap());

        if text.is_empty() {
            return Ok(vec![]);
        }
        // 补上的空格只存在于 `haystack` 中，之后的位置整体后移 `shift`
        let prefixed;
        let (haystack, shift) = if self.add_prefix_space && !text.starts_with(' ') {
            prefixed = format!(" {text}");
            (prefixed.as_str(), 1)
        } else {
            (text, 0)
        };

        RE.find_iter(haystack)
            .map(|m| {
                let m = m.map_err(|e| Error::PreTokenize(e.to_string()))?;
                Ok(if m.start() < shift {
                    Piece {
                        range: 0..m.end() - shift,
                        text: Cow::Owned(m.as_str().to_string()),
                    }
                } else {
                    Piece::borrowed(text, m.start() - shift..m.end() - shift)
                })
            })
            .collect()
    }
}

impl PreTokenizer for Whitespace {
    fn split<'t>(&self, text: &'t str) -> Result<Vec<Piece<'t>>> {
        static RE: LazyLock<regex::Regex> =
            LazyLock::new(|| regex::Regex::new(r"\w+|[^\w\s]+").unwrap());
        Ok(RE.find_iter(text).map(|m| Piece::borrowed(text, m.range())).collect())
    }
}

impl PreTokenizer for WhitespaceSplit {
    fn split<'t>(&self, text: &'t str) -> Result<Vec<Piece<'t>>> {
        static RE: LazyLock<regex::Regex> = LazyLock::new(|| regex::Regex::new(r"\S+").unwrap());
        Ok(RE.find_iter(text).map(|m| Piece::borrowed(text, m.range())).collect())
    }
}

impl PreTokenizer for Identity {
    fn split<'t>(&self, text: &'t str) -> Result<Vec<Piece<'t>>> {
        Ok(if text.is_empty() {
            vec![]
        } else {
            vec![Piece::borrowed(text, 0..text.len())]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pieces(p: &impl PreTokenizer, text: &str) -> Vec<String> {
        p.split(text)
            .unwrap()
            .into_iter()
            .map(|p| p.text.into_owned())
            .collect()
    }

    fn ranges(p: &impl PreTokenizer, text: &str) -> Vec<Range<usize>> {
        p.split(text).unwrap().into_iter().map(|p| p.range).collect()
    }

    #[test]
    fn byte_level_split() {
        let split = ByteLevelSplit::default();
        assert_eq!(
            pieces(&split, "Hello world! It's 2025"),
            ["Hello", " world", "!", " It", "'s", " 2025"]
        );
        assert_eq!(pieces(&split, "a   b"), ["a", "  ", " b"]);
        assert_eq!(pieces(&split, "a\n\nb  "), ["a", "\n", "\n", "b", "  "]);
        assert_eq!(pieces(&split, "안녕 你好"), ["안녕", " 你好"]);
        assert!(pieces(&split, "").is_empty());
    }

    #[test]
    fn byte_level_split_is_lossless() {
        let split = ByteLevelSplit::default();
        for text in ["  lead", "tail  ", "x\t\ty", "🌍 Hello, 世界!!", " "] {
            let mut pos = 0;
            for piece in split.split(text).unwrap() {
                assert_eq!(piece.range.start, pos);
                assert_eq!(piece.text, &text[piece.range.clone()]);
                pos = piece.range.end;
            }
            assert_eq!(pos, text.len());
        }
    }

    #[test]
    fn prefix_space() {
        let split = ByteLevelSplit::new(true);
        assert_eq!(pieces(&split, "Hello world"), [" Hello", " world"]);
        assert_eq!(ranges(&split, "Hello world"), [0..5, 5..11]);
        // 已经以空格开头的文本不再补
        assert_eq!(pieces(&split, " Hello"), [" Hello"]);
        assert_eq!(ranges(&split, " Hello"), [0..6]);
        // 补上的空格单独成段时不对应原文的任何字节
        assert_eq!(pieces(&split, "\nx"), [" ", "\n", "x"]);
        assert_eq!(ranges(&split, "\nx"), [0..0, 0..1, 1..2]);
        assert!(pieces(&split, "").is_empty());
        let split = ByteLevelSplit::default().add_prefix_space(true);
        assert_eq!(pieces(&split, "a"), [" a"]);
    }

    #[test]
    fn whitespace() {
        assert_eq!(ranges(&Whitespace, "Hey man!"), [0..3, 4..7, 7..8]);
        assert_eq!(
            pieces(&Whitespace, "How are you doing?"),
            ["How", "are", "you", "doing", "?"]
        );
        assert_eq!(pieces(&WhitespaceSplit, "Hey  man!"), ["Hey", "man!"]);
        assert_eq!(ranges(&WhitespaceSplit, "Hey  man!"), [0..3, 5..9]);
        assert_eq!(pieces(&Identity, "a b"), ["a b"]);
        assert!(Identity.split("").unwrap().is_empty());
    }
}
