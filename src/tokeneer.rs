use crate::{
    utok, ByteLevelSplit, DecodeStream, Encoding, Error, Method, Piece, PreTokenizer, Result,
};
use regex::Regex;
use std::{collections::HashMap, ops::Deref, slice::from_ref};

/// 分词器：特殊词切分 -> 预分词 -> 字节提取 -> 分词方法。
pub struct Tokeneer<M> {
    method: M,
    pre_tokenizer: Box<dyn PreTokenizer>,
    special: HashMap<String, TokenSeq>,
    special_regex: Regex,
}

enum TokenSeq {
    Single(utok),
    Multi(Box<[utok]>),
}

impl Deref for TokenSeq {
    type Target = [utok];
    #[inline]
    fn deref(&self) -> &Self::Target {
        match self {
            Self::Single(t) => from_ref(t),
            Self::Multi(t) => t,
        }
    }
}

impl<M: Method> Tokeneer<M> {
    pub fn new(method: M) -> Result<Self> {
        let special = method
            .internal_special()
            .into_iter()
            .map(|(k, v)| (k.to_string(), TokenSeq::Single(v)))
            .collect::<HashMap<_, _>>();
        let special_regex = build_pattern(special.keys())?;
        Ok(Self {
            method,
            pre_tokenizer: Box::new(ByteLevelSplit::default()),
            special,
            special_regex,
        })
    }

    /// 添加由若干 token 组成的特殊词。
    ///
    /// 已存在的特殊词必须对应相同的 token 序列。
    pub fn extend_special(
        &mut self,
        patterns: impl IntoIterator<Item = (String, Vec<utok>)>,
    ) -> Result<()> {
        use std::collections::hash_map::Entry::{Occupied, Vacant};
        let mut any = false;
        for (k, v) in patterns {
            if k.is_empty() {
                return Err(Error::InvalidVocab("special token must not be empty".into()));
            }
            if let Some(&t) = v.iter().find(|&&t| t as usize >= self.method.vocab_size()) {
                return Err(Error::UnknownId(t));
            }
            match self.special.entry(k) {
                Occupied(entry) => {
                    if **entry.get() != *v {
                        return Err(Error::InvalidVocab(format!(
                            "special token {:?} already maps to {:?}",
                            entry.key(),
                            &**entry.get(),
                        )));
                    }
                }
                Vacant(entry) => {
                    entry.insert(TokenSeq::Multi(v.into_boxed_slice()));
                    any = true;
                }
            }
        }
        if any {
            self.special_regex = build_pattern(self.special.keys())?;
        }
        Ok(())
    }

    pub fn encode(&self, text: &str) -> Result<Encoding> {
        let alphabet = self.method.alphabet();
        let mut ans = Encoding::default();
        let mut offset = 0;
        let mut start = 0;
        if !self.special_regex.as_str().is_empty() {
            for m in self.special_regex.find_iter(text) {
                offset = self.encode_segment(&text[start..m.start()], offset, &mut ans)?;
                let len = alphabet.byte_len(m.as_str());
                for &t in &*self.special[m.as_str()] {
                    let piece = self.method.decode(t).ok_or(Error::UnknownId(t))?;
                    ans.push(t, piece, (offset, offset + len));
                }
                offset += len;
                start = m.end();
            }
        }
        self.encode_segment(&text[start..], offset, &mut ans)?;
        Ok(ans)
    }

    pub fn decode(&self, tokens: &[utok]) -> Result<String> {
        let mut bytes = Vec::new();
        for &t in tokens {
            self.push_token(t, &mut bytes)?;
        }
        self.method.alphabet().bytes_to_text(&bytes)
    }

    #[inline]
    pub fn decode_stream(&self) -> DecodeStream<'_, M> {
        DecodeStream::new(self)
    }

    /// 编码一段不含特殊词的文本，`base` 是它在整个输入中的原始字节位置。
    ///
    /// 返回这段文本结束处的原始字节位置。
    fn encode_segment(&self, segment: &str, base: usize, ans: &mut Encoding) -> Result<usize> {
        let alphabet = self.method.alphabet();
        // 预分词器可能丢弃空白，因此逐段累计被跳过的文本长度
        let mut raw = base;
        let mut last = 0;
        for Piece { range, text } in self.pre_tokenizer.split(segment)? {
            raw += alphabet.byte_len(&segment[last..range.start]);
            let bytes = alphabet.extract(&text);
            // 片段开头补上的字节不在原文中，落在其中的偏移收缩到片段起点
            let added = bytes.len() - alphabet.byte_len(&segment[range.clone()]);
            for (t, r) in self.method.encode(&bytes)? {
                let piece = self.method.decode(t).ok_or(Error::UnknownId(t))?;
                let start = raw + r.start.saturating_sub(added);
                let end = raw + r.end.saturating_sub(added);
                ans.push(t, piece, (start, end));
            }
            raw += bytes.len() - added;
            last = range.end;
        }
        Ok(raw + alphabet.byte_len(&segment[last..]))
    }

    /// 将 token 还原为原始字节追加到 `buf`。
    pub(crate) fn push_token(&self, token: utok, buf: &mut Vec<u8>) -> Result<()> {
        let piece = self.method.decode(token).ok_or(Error::UnknownId(token))?;
        let alphabet = self.method.alphabet();
        if self.method.is_special(token) {
            buf.extend_from_slice(&alphabet.extract(piece));
            Ok(())
        } else {
            alphabet.push_bytes(piece, buf)
        }
    }
}

impl<M> Tokeneer<M> {
    /// 替换预分词器，默认为 [`ByteLevelSplit`]。
    #[must_use]
    pub fn with_pre_tokenizer(mut self, pre_tokenizer: impl PreTokenizer + 'static) -> Self {
        self.pre_tokenizer = Box::new(pre_tokenizer);
        self
    }

    #[inline]
    pub fn internal(&self) -> &M {
        &self.method
    }
}

/// 按长度从长到短排列，使较长的特殊词优先匹配。
fn build_pattern<'a>(text: impl IntoIterator<Item = &'a String>) -> Result<Regex> {
    let mut text = text.into_iter().collect::<Vec<_>>();
    text.sort_unstable_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let pattern = text
        .into_iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    Ok(Regex::new(&pattern)?)
}
