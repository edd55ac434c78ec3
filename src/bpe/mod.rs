mod algorithm;
mod cache;

use crate::{
    utok, vocab::CompressedVocab, Alphabet, BpeConfig, Error, MergeRule, Method, Result, Vocab,
};
use cache::Cache;
use rustc_hash::FxHashMap;
use std::ops::Range;

pub use algorithm::{Iter, MergeState};

pub struct Bpe {
    /// 字节提取方式
    alphabet: Alphabet,
    /// 保存所有词的字符串内容，内容相同的子串共享存储
    vocabs: CompressedVocab,
    /// 按 token 顺序保存元信息
    tokens: Box<[TokenMeta]>,
    /// 按字符串的字典序排序的 token 索引，用于从字符串二分查找 token
    sorted_pieces: Box<[utok]>,
    /// 合词规则：(left, right) -> (rank, merged)
    merges: FxHashMap<(utok, utok), (u32, utok)>,
    /// 按排名排列的合词规则
    rules: Box<[MergeRule]>,
    /// 原始字节到基础 token 的映射
    bytes: Box<[Option<utok>; 256]>,
    dropout: Option<f32>,
    cache: Option<Cache>,
}

struct TokenMeta {
    /// 对应的原始字节数，特殊词为其文本在当前模式下的字节数
    n_bytes: u32,
    special: bool,
}

impl Bpe {
    #[inline]
    pub fn new(vocab: &Vocab, alphabet: Alphabet) -> Result<Self> {
        Self::with_config(vocab, alphabet, BpeConfig::default())
    }

    /// 从显式的词表、合词规则和特殊词构造，见 [`Vocab::from_parts`]。
    pub fn from_parts(
        vocab: impl IntoIterator<Item = (String, utok)>,
        merges: impl IntoIterator<Item = (String, String)>,
        special: impl IntoIterator<Item = String>,
        alphabet: Alphabet,
    ) -> Result<Self> {
        Self::new(&Vocab::from_parts(vocab, merges, special)?, alphabet)
    }

    pub fn with_config(vocab: &Vocab, alphabet: Alphabet, config: BpeConfig) -> Result<Self> {
        config.validate()?;
        let BpeConfig {
            dropout,
            cache_capacity,
        } = config;

        let pieces = vocab.symbols().collect::<Vec<_>>();
        let tokens = pieces
            .iter()
            .enumerate()
            .map(|(i, piece)| {
                let special = vocab.is_special(i as _);
                let n_bytes = if special {
                    alphabet.byte_len(piece)
                } else {
                    piece.chars().count()
                };
                TokenMeta {
                    n_bytes: n_bytes as _,
                    special,
                }
            })
            .collect::<Box<[_]>>();
        if let Some(i) = tokens.iter().position(|t| t.n_bytes == 0) {
            return Err(Error::InvalidVocab(format!("token {i} is empty")));
        }
        let vocabs = CompressedVocab::new(&pieces);

        // 对 token 按字符串的字典序排序，用于从字符串二分查找 token
        let mut sorted_pieces = (0..tokens.len() as utok).collect::<Box<[_]>>();
        sorted_pieces.sort_unstable_by_key(|&i| vocabs.get(i as _));

        let mut bytes = Box::new([None; 256]);
        let mut buf = [0u8; 4];
        for (b, slot) in bytes.iter_mut().enumerate() {
            let symbol = alphabet.byte_to_symbol(b as u8).encode_utf8(&mut buf);
            *slot = vocab.id_of(symbol).ok().filter(|&t| !vocab.is_special(t));
        }
        let missing = bytes.iter().filter(|t| t.is_none()).count();
        if missing > 0 {
            log::warn!("{missing} bytes have no base symbol and cannot be encoded");
        }

        let mut merges = FxHashMap::default();
        let mut rules = Vec::with_capacity(vocab.merges().len());
        for &rule in vocab.merges() {
            let MergeRule {
                left,
                right,
                merged,
                rank,
            } = rule;
            if [left, right, merged].iter().any(|&t| vocab.is_special(t)) {
                log::warn!("merge rule {rank} involves a special token, ignored");
                continue;
            }
            merges.insert((left, right), (rank, merged));
            rules.push(rule);
        }

        log::debug!(
            "built {alphabet:?} bpe: {} tokens, {} merges, cache capacity {cache_capacity}",
            tokens.len(),
            rules.len(),
        );
        Ok(Self {
            alphabet,
            vocabs,
            tokens,
            sorted_pieces,
            merges,
            rules: rules.into(),
            bytes,
            dropout: dropout.filter(|&p| p > 0.),
            cache: (cache_capacity > 0).then(|| Cache::new(cache_capacity)),
        })
    }

    #[inline]
    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    /// piece -> token
    pub fn id_of(&self, piece: &str) -> Result<utok> {
        self.sorted_pieces
            .binary_search_by_key(&piece, |&i| self.piece(i))
            .map(|i| self.sorted_pieces[i])
            .map_err(|_| Error::SymbolNotFound(piece.to_string()))
    }

    /// token -> piece
    pub fn symbol_of(&self, token: utok) -> Result<&str> {
        if (token as usize) < self.tokens.len() {
            Ok(self.piece(token))
        } else {
            Err(Error::UnknownId(token))
        }
    }

    #[inline]
    pub fn rank_of(&self, left: utok, right: utok) -> Option<u32> {
        self.merges.get(&(left, right)).map(|&(rank, _)| rank)
    }

    /// 按排名顺序排列的合词规则。
    #[inline]
    pub fn merges(&self) -> &[MergeRule] {
        &self.rules
    }

    #[inline]
    pub fn is_special(&self, token: utok) -> bool {
        self.tokens
            .get(token as usize)
            .is_some_and(|t| t.special)
    }

    /// 对一个片段的原始字节执行合并，返回 token 及其在 `bytes` 中的范围。
    pub fn encode_bytes(&self, bytes: &[u8]) -> Result<Vec<(utok, Range<usize>)>> {
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        let cache = self.cache.as_ref().filter(|_| self.dropout.is_none());
        if let Some(tokens) = cache.and_then(|c| c.get(bytes)) {
            return Ok(self.with_ranges(tokens.iter().copied()));
        }

        let mut state = self.begin_merge(bytes, self.dropout)?;
        while state.merge() {}
        let ans = state.iter().collect::<Vec<_>>();

        if let Some(cache) = cache {
            cache.insert(bytes, &ans.iter().map(|(t, _)| *t).collect::<Vec<_>>());
        }
        Ok(ans)
    }

    #[inline]
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear()
        }
    }

    fn with_ranges(&self, tokens: impl IntoIterator<Item = utok>) -> Vec<(utok, Range<usize>)> {
        let mut pos = 0;
        tokens
            .into_iter()
            .map(|t| {
                let start = pos;
                pos += self.token(t).n_bytes as usize;
                (t, start..pos)
            })
            .collect()
    }

    /// token id -> token meta
    #[inline(always)]
    fn token(&self, token: utok) -> &TokenMeta {
        &self.tokens[token as usize]
    }

    #[inline(always)]
    fn piece(&self, token: utok) -> &str {
        self.vocabs.get(token as _)
    }
}

impl Method for Bpe {
    #[inline]
    fn vocab_size(&self) -> usize {
        self.tokens.len()
    }
    #[inline]
    fn alphabet(&self) -> Alphabet {
        self.alphabet
    }
    #[inline]
    fn internal_special(&self) -> impl IntoIterator<Item = (&str, utok)> {
        (0..self.tokens.len() as utok)
            .filter(|&t| self.token(t).special)
            .map(|t| (self.piece(t), t))
    }
    #[inline]
    fn encode(&self, bytes: &[u8]) -> Result<impl IntoIterator<Item = (utok, Range<usize>)> + '_> {
        self.encode_bytes(bytes)
    }
    #[inline]
    fn decode(&self, token: utok) -> Option<&str> {
        self.symbol_of(token).ok()
    }
    #[inline]
    fn is_special(&self, token: utok) -> bool {
        Bpe::is_special(self, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 256 个基础符号按字节序占据 0..256，然后依次添加合词规则。
    fn vocab(alphabet: Alphabet, merges: &[(&str, &str)]) -> Vocab {
        let mut vocab = Vocab::new();
        for &c in alphabet.symbols() {
            vocab.insert(c.encode_utf8(&mut [0; 4]));
        }
        for (l, r) in merges {
            let l = vocab.id_of(l).unwrap();
            let r = vocab.id_of(r).unwrap();
            vocab.add_merge(l, r).unwrap();
        }
        vocab
    }

    fn pieces<'a>(bpe: &'a Bpe, text: &str) -> Vec<&'a str> {
        bpe.encode_bytes(&bpe.alphabet().extract(text))
            .unwrap()
            .into_iter()
            .map(|(t, _)| bpe.piece(t))
            .collect()
    }

    #[test]
    fn lowest_rank_first() {
        let bpe = Bpe::new(&vocab(Alphabet::Utf8, &[("b", "c"), ("a", "b")]), Alphabet::Utf8).unwrap();
        assert_eq!(pieces(&bpe, "abc"), ["a", "bc"]);
        assert_eq!(pieces(&bpe, "ab"), ["ab"]);

        let bpe = Bpe::new(
            &vocab(Alphabet::Utf8, &[("b", "c"), ("a", "bc"), ("a", "b")]),
            Alphabet::Utf8,
        )
        .unwrap();
        assert_eq!(pieces(&bpe, "abc"), ["abc"]);
    }

    #[test]
    fn new_adjacency_is_merged() {
        let bpe = Bpe::new(
            &vocab(Alphabet::Utf8, &[("a", "b"), ("c", "d"), ("ab", "cd")]),
            Alphabet::Utf8,
        )
        .unwrap();
        assert_eq!(pieces(&bpe, "abcd"), ["abcd"]);
        assert_eq!(pieces(&bpe, "abcdab"), ["abcd", "ab"]);
    }

    #[test]
    fn equal_rank_leftmost_first() {
        let bpe = Bpe::new(&vocab(Alphabet::Utf8, &[("a", "a")]), Alphabet::Utf8).unwrap();
        assert_eq!(pieces(&bpe, "aaa"), ["aa", "a"]);
        assert_eq!(pieces(&bpe, "aaaa"), ["aa", "aa"]);
    }

    #[test]
    fn ranges_cover_raw_bytes() {
        let bpe = Bpe::new(&vocab(Alphabet::Utf16, &[("h", "\u{0100}")]), Alphabet::Utf16).unwrap();
        let ans = bpe.encode_bytes(&Alphabet::Utf16.extract("hhi")).unwrap();
        let h = bpe.id_of("h\u{0100}").unwrap();
        assert_eq!(h, 256);
        assert_eq!(ans, [(h, 0..2), (h, 2..4), (b'i' as utok, 4..5), (0, 5..6)]);
    }

    #[test]
    fn empty_input() {
        let bpe = Bpe::new(&vocab(Alphabet::Utf8, &[]), Alphabet::Utf8).unwrap();
        assert!(bpe.encode_bytes(&[]).unwrap().is_empty());
    }

    #[test]
    fn incomplete_alphabet() {
        let vocab = Vocab::from_parts([("a".to_string(), 0)], [], []).unwrap();
        let bpe = Bpe::new(&vocab, Alphabet::Utf8).unwrap();
        assert_eq!(bpe.encode_bytes(b"ab"), Err(Error::UnmappedByte(b'b')));
    }

    #[test]
    fn lookups() {
        let bpe = Bpe::new(&vocab(Alphabet::Utf8, &[("l", "o"), ("lo", "w")]), Alphabet::Utf8).unwrap();
        assert_eq!(bpe.vocab_size(), 258);
        for t in 0..bpe.vocab_size() as utok {
            assert_eq!(bpe.id_of(bpe.symbol_of(t).unwrap()).unwrap(), t);
        }
        assert_eq!(bpe.id_of("low").unwrap(), 257);
        assert_eq!(bpe.rank_of(b'l' as _, b'o' as _), Some(0));
        assert_eq!(bpe.rank_of(256, b'w' as _), Some(1));
        assert_eq!(bpe.rank_of(b'o' as _, b'w' as _), None);
        assert_eq!(bpe.symbol_of(258), Err(Error::UnknownId(258)));
        assert_eq!(bpe.merges().len(), 2);
    }

    #[test]
    fn cached_result_is_identical() {
        let bpe = Bpe::new(&vocab(Alphabet::Utf8, &[("l", "o"), ("lo", "w")]), Alphabet::Utf8).unwrap();
        let first = bpe.encode_bytes(b"lowlow").unwrap();
        assert_eq!(bpe.cache.as_ref().unwrap().len(), 1);
        assert_eq!(bpe.encode_bytes(b"lowlow").unwrap(), first);
        bpe.clear_cache();
        assert_eq!(bpe.cache.as_ref().unwrap().len(), 0);
    }

    #[test]
    fn dropout_keeps_bytes() {
        let vocab = vocab(Alphabet::Utf8, &[("l", "o"), ("lo", "w"), ("e", "r"), ("low", "er")]);
        let cfg = BpeConfig::builder().dropout(0.5).build().unwrap();
        let bpe = Bpe::with_config(&vocab, Alphabet::Utf8, cfg).unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let ans = bpe.encode_bytes(b"lower").unwrap();
            let text = ans.iter().map(|(t, _)| bpe.piece(*t)).collect::<String>();
            assert_eq!(text, "lower");
            assert_eq!(ans.last().unwrap().1.end, 5);
            seen.insert(ans.into_iter().map(|(t, _)| t).collect::<Vec<_>>());
        }
        // p = 0.5 时 200 次编码几乎不可能全部得到同一种切分
        assert!(seen.len() > 1, "dropout never changed the segmentation");
        assert_eq!(bpe.cache.as_ref().unwrap().len(), 0);

        let cfg = BpeConfig::builder().dropout(0.0).build().unwrap();
        let bpe = Bpe::with_config(&vocab, Alphabet::Utf8, cfg).unwrap();
        assert_eq!(pieces(&bpe, "lower"), ["lower"]);
    }

    #[test]
    fn merge_state_display() {
        let bpe = Bpe::new(&vocab(Alphabet::Utf8, &[("a", "b")]), Alphabet::Utf8).unwrap();
        let state = bpe.begin_merge(b"abc", None).unwrap();
        let text = state.to_string();
        assert!(text.contains("abc"));
        assert!(text.contains("| ab"));
    }

    #[test]
    fn shared_across_threads() {
        let bpe = Bpe::new(&vocab(Alphabet::Utf8, &[("l", "o"), ("lo", "w")]), Alphabet::Utf8).unwrap();
        let expected = bpe.encode_bytes(b"low").unwrap();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        assert_eq!(bpe.encode_bytes(b"low").unwrap(), expected);
                    }
                });
            }
        });
    }
}
