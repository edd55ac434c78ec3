//! 这个模块提供词表和合词规则表，以及冻结词表时使用的压缩存储。

use crate::{utok, Error, Result};
use rustc_hash::{FxHashMap, FxHashSet};

/// 一条合词规则：`left ++ right -> merged`。
///
/// `rank` 就是规则的插入序号，越小越优先合并。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MergeRule {
    pub left: utok,
    pub right: utok,
    pub merged: utok,
    pub rank: u32,
}

/// 只追加的词表。
///
/// 词序号按插入顺序连续分配，一经分配不再改变；合词规则同样只追加，
/// 规则的顺序就是合并的优先级。
///
/// 词表中的词分为两类：一般词由字节级可见字符组成，
/// 特殊词（*Special token*）保存原始文本，不参与合并，也不经过字节映射。
#[derive(Clone, Default, Debug)]
pub struct Vocab {
    symbols: Vec<String>,
    ids: FxHashMap<String, utok>,
    special: FxHashSet<utok>,
    merges: Vec<MergeRule>,
    ranks: FxHashMap<(utok, utok), u32>,
}

impl Vocab {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 从显式的 (词, 序号) 表、(左, 右) 规则表和特殊词列表构造词表。
    ///
    /// 序号必须恰好覆盖 `[0, n)`，每个词只出现一次；
    /// 每条规则的左右两部分及其拼接都必须在词表中，且都不能是特殊词。重复的规则只保留第一条。
    /// 特殊词必须已经出现在词表中。
    pub fn from_parts(
        vocab: impl IntoIterator<Item = (String, utok)>,
        merges: impl IntoIterator<Item = (String, String)>,
        special: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        let mut slots = Vec::<Option<String>>::new();
        for (symbol, id) in vocab {
            let i = id as usize;
            if i >= slots.len() {
                slots.resize(i + 1, None);
            }
            if let Some(prev) = slots[i].replace(symbol) {
                return Err(Error::InvalidVocab(format!("id {id} assigned twice ({prev:?})")));
            }
        }

        let mut ans = Self::new();
        for (id, slot) in slots.into_iter().enumerate() {
            let symbol = slot.ok_or_else(|| Error::InvalidVocab(format!("id {id} is unassigned")))?;
            if ans.ids.contains_key(&symbol) {
                return Err(Error::InvalidVocab(format!("symbol {symbol:?} appears twice")));
            }
            ans.insert(&symbol);
        }
        for symbol in special {
            let id = ans.id_of(&symbol).map_err(|_| {
                Error::InvalidVocab(format!("special token {symbol:?} is not in the vocabulary"))
            })?;
            ans.special.insert(id);
        }

        for (left, right) in merges {
            let l = ans.id_of(&left).map_err(unknown_in_merge)?;
            let r = ans.id_of(&right).map_err(unknown_in_merge)?;
            if ans.ranks.contains_key(&(l, r)) {
                log::warn!("duplicate merge ({left:?}, {right:?}) ignored");
                continue;
            }
            let merged = ans.id_of(&format!("{left}{right}")).map_err(unknown_in_merge)?;
            if [l, r, merged].iter().any(|&t| ans.is_special(t)) {
                return Err(Error::InvalidVocab(format!(
                    "merge ({left:?}, {right:?}) touches a special token"
                )));
            }
            ans.push_rule(l, r, merged);
        }
        Ok(ans)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// 插入一个词，返回它的序号。已存在的词直接返回原序号。
    pub fn insert(&mut self, symbol: &str) -> utok {
        if let Some(&id) = self.ids.get(symbol) {
            return id;
        }
        let id = self.symbols.len() as utok;
        self.symbols.push(symbol.to_string());
        self.ids.insert(symbol.to_string(), id);
        id
    }

    /// 插入一个特殊词。
    pub fn insert_special(&mut self, content: &str) -> utok {
        let id = self.insert(content);
        self.special.insert(id);
        id
    }

    /// 将已有的词标记为特殊词。
    pub fn mark_special(&mut self, id: utok) -> Result<()> {
        self.symbol_of(id)?;
        self.special.insert(id);
        Ok(())
    }

    #[inline]
    pub fn is_special(&self, id: utok) -> bool {
        self.special.contains(&id)
    }

    #[inline]
    pub fn id_of(&self, symbol: &str) -> Result<utok> {
        self.ids
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::SymbolNotFound(symbol.to_string()))
    }

    #[inline]
    pub fn symbol_of(&self, id: utok) -> Result<&str> {
        self.symbols
            .get(id as usize)
            .map(String::as_str)
            .ok_or(Error::UnknownId(id))
    }

    #[inline]
    pub fn rank_of(&self, left: utok, right: utok) -> Option<u32> {
        self.ranks.get(&(left, right)).copied()
    }

    /// 添加合词规则 `left ++ right`，必要时插入新词。返回新词的序号和规则的排名。
    pub fn add_merge(&mut self, left: utok, right: utok) -> Result<(utok, u32)> {
        if self.ranks.contains_key(&(left, right)) {
            return Err(Error::InvalidVocab(format!("merge ({left}, {right}) already exists")));
        }
        if self.is_special(left) || self.is_special(right) {
            return Err(Error::InvalidVocab("special tokens never merge".into()));
        }
        let symbol = format!("{}{}", self.symbol_of(left)?, self.symbol_of(right)?);
        if let Some(&id) = self.ids.get(&symbol) {
            if self.is_special(id) {
                return Err(Error::InvalidVocab(format!(
                    "merge result {symbol:?} collides with a special token"
                )));
            }
        }
        let merged = self.insert(&symbol);
        Ok((merged, self.push_rule(left, right, merged)))
    }

    fn push_rule(&mut self, left: utok, right: utok, merged: utok) -> u32 {
        let rank = self.merges.len() as u32;
        self.merges.push(MergeRule {
            left,
            right,
            merged,
            rank,
        });
        self.ranks.insert((left, right), rank);
        rank
    }

    /// 按排名顺序排列的合词规则。
    #[inline]
    pub fn merges(&self) -> &[MergeRule] {
        &self.merges
    }

    /// 按序号顺序遍历所有词。
    #[inline]
    pub fn symbols(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.symbols.iter().map(String::as_str)
    }
}

fn unknown_in_merge(e: Error) -> Error {
    match e {
        Error::SymbolNotFound(s) => Error::InvalidVocab(format!("merge refers to unknown {s:?}")),
        e => e,
    }
}

/// 利用词表中的重复部分压缩词表。
pub(crate) struct CompressedVocab {
    pub vocabs: Box<str>,
    pub slices: Vec<(usize, usize)>,
}

impl CompressedVocab {
    pub fn new(vocabs: &[&str]) -> Self {
        let total_len = vocabs.iter().map(|v| v.len()).sum();
        // 创建字符内容缓存
        let mut slices = vec![(0usize, 0usize); vocabs.len()];
        let mut text_buf = String::with_capacity(total_len);
        let mut indices = (0..vocabs.len()).collect::<Vec<_>>();
        // 对词按内容长度从长到短排序，因为短的内容有可能是长内容的子串，可以避免重复存储相同内容
        indices.sort_unstable_by_key(|&i| -(vocabs[i].len() as isize));
        for i in indices {
            let v = vocabs[i];
            // 查找子串，若存在则复用，否则将新的内容追加到缓存。
            // utf-8 是自同步的，合法的子串必然落在字符边界上
            let off = memchr::memmem::find(text_buf.as_bytes(), v.as_bytes()).unwrap_or_else(|| {
                let off = text_buf.len();
                text_buf.push_str(v);
                off
            });
            slices[i] = (off, v.len());
        }
        log::debug!(
            "compressed {} symbols from {total_len} bytes to {} bytes",
            vocabs.len(),
            text_buf.len(),
        );
        Self {
            vocabs: text_buf.into_boxed_str(),
            slices,
        }
    }

    #[inline]
    pub fn get(&self, i: usize) -> &str {
        let (off, len) = self.slices[i];
        &self.vocabs[off..][..len]
    }
}
