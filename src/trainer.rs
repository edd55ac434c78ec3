//! 从语料训练字节级 BPE 词表。

use crate::{utok, Alphabet, ByteLevelSplit, Error, PreTokenizer, Result, TrainerConfig, Vocab};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::{
    cmp::Ordering,
    collections::{BTreeSet, BinaryHeap},
    hash::Hash,
    ops::AddAssign,
    time::Instant,
};

type Pair = (utok, utok);

/// 开启进度报告时，每完成这么多次合并输出一次日志。
const PROGRESS_STEP: usize = 1000;

pub struct Trainer {
    config: TrainerConfig,
    alphabet: Alphabet,
    pre_tokenizer: Box<dyn PreTokenizer>,
}

/// 训练停止的原因。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StopReason {
    /// 词表达到目标大小。
    TargetReached,
    /// 最高的词对频率低于 `min_frequency`。
    BelowMinFrequency,
    /// 语料中已没有可合并的词对。
    Exhausted,
}

#[derive(Clone, Debug)]
pub struct Training {
    /// 训练得到的词表，合词规则按学习顺序排列。
    pub vocab: Vocab,
    pub stop_reason: StopReason,
}

/// 合并队列中的候选词对。
///
/// 频率高者优先，频率相同时左右两部分的字符串按字典序较小者优先。
#[derive(PartialEq, Eq, Debug)]
struct PairScore {
    count: u64,
    pair: Pair,
    key: (Box<str>, Box<str>),
}

impl Ord for PairScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.count
            .cmp(&other.count)
            .then_with(|| other.key.cmp(&self.key))
            .then_with(|| other.pair.cmp(&self.pair))
    }
}

impl PartialOrd for PairScore {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Trainer {
    pub fn new(config: TrainerConfig, alphabet: Alphabet) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            alphabet,
            pre_tokenizer: Box::new(ByteLevelSplit::default()),
        })
    }

    /// 替换预分词器，默认为 [`ByteLevelSplit`]。
    #[must_use]
    pub fn with_pre_tokenizer(mut self, pre_tokenizer: impl PreTokenizer + 'static) -> Self {
        self.pre_tokenizer = Box::new(pre_tokenizer);
        self
    }

    #[inline]
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn train<I, S>(&self, corpus: I) -> Result<Training>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str> + Send,
    {
        let time = Instant::now();
        let mut vocab = self.seed();
        let word_counts = self.count_words(corpus)?;
        log::info!(
            "training {:?} bpe: {} distinct words, {} seeded symbols, target {}",
            self.alphabet,
            word_counts.len(),
            vocab.len(),
            self.config.vocab_size,
        );

        // 语料中出现但初始字母表缺少的字符，按码点顺序补充
        let missing = word_counts
            .keys()
            .flat_map(|w| w.chars())
            .filter(|c| vocab.id_of(c.encode_utf8(&mut [0; 4])).is_err())
            .collect::<BTreeSet<_>>();
        if !missing.is_empty() {
            log::debug!("{} symbols missing from initial alphabet", missing.len());
        }
        for c in missing {
            vocab.insert(c.encode_utf8(&mut [0; 4]));
        }

        // 按字符串排序，使词的下标与统计顺序无关
        let mut word_counts = word_counts.into_iter().collect::<Vec<_>>();
        word_counts.sort_unstable();
        let counts = word_counts.iter().map(|(_, n)| *n).collect::<Vec<_>>();
        let mut words = word_counts
            .par_iter()
            .map(|(word, _)| {
                word.chars()
                    .map(|c| vocab.id_of(c.encode_utf8(&mut [0; 4])))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        drop(word_counts);

        let (mut pair_counts, mut where_to_update) = count_pairs(&words, &counts);
        let mut queue = pair_counts
            .iter()
            .map(|(&pair, &count)| score(&vocab, pair, count as _))
            .collect::<Result<BinaryHeap<_>>>()?;

        let n_seeded = vocab.len();
        let mut blocked = FxHashSet::<Pair>::default();
        let stop_reason = loop {
            if vocab.len() >= self.config.vocab_size {
                break StopReason::TargetReached;
            }
            let Some(top) = queue.pop() else {
                break StopReason::Exhausted;
            };
            // 队列中的计数可能已经过时
            let current = pair_counts.get(&top.pair).copied().unwrap_or(0);
            if current <= 0 || blocked.contains(&top.pair) {
                continue;
            }
            if current as u64 != top.count {
                queue.push(PairScore {
                    count: current as _,
                    ..top
                });
                continue;
            }
            if top.count < self.config.min_frequency {
                break StopReason::BelowMinFrequency;
            }

            let (left, right) = top.pair;
            let merged = match vocab.add_merge(left, right) {
                Ok((merged, rank)) => {
                    log::debug!(
                        "merge #{rank}: {:?} + {:?} ({} times)",
                        top.key.0,
                        top.key.1,
                        top.count,
                    );
                    merged
                }
                Err(Error::InvalidVocab(msg)) => {
                    log::warn!("skip pair ({:?}, {:?}): {msg}", top.key.0, top.key.1);
                    blocked.insert(top.pair);
                    continue;
                }
                Err(e) => return Err(e),
            };

            // 改写所有包含这个词对的词，并统计词对计数的变化
            let mut affected = where_to_update
                .remove(&top.pair)
                .unwrap_or_default()
                .into_iter()
                .collect::<Vec<_>>();
            affected.sort_unstable();
            let rewritten = affected
                .par_iter()
                .filter_map(|&i| merge_word(&words[i], top.pair, merged).map(|word| (i, word)))
                .collect::<Vec<_>>();
            let deltas = rewritten
                .par_iter()
                .fold(FxHashMap::<Pair, i64>::default, |mut acc, (i, word)| {
                    let n = counts[*i] as i64;
                    for w in words[*i].windows(2) {
                        *acc.entry((w[0], w[1])).or_default() -= n;
                    }
                    for w in word.windows(2) {
                        *acc.entry((w[0], w[1])).or_default() += n;
                    }
                    acc
                })
                .reduce(FxHashMap::default, sum_by_key);

            for (i, word) in rewritten {
                for w in word.windows(2) {
                    if w[0] == merged || w[1] == merged {
                        where_to_update.entry((w[0], w[1])).or_default().insert(i);
                    }
                }
                words[i] = word;
            }

            let mut deltas = deltas.into_iter().filter(|(_, d)| *d != 0).collect::<Vec<_>>();
            deltas.sort_unstable();
            for (pair, delta) in deltas {
                let count = pair_counts.entry(pair).or_default();
                *count += delta;
                let count = *count;
                if count <= 0 {
                    pair_counts.remove(&pair);
                } else if delta > 0 && !blocked.contains(&pair) {
                    queue.push(score(&vocab, pair, count as _)?);
                }
            }

            let n_merges = vocab.merges().len();
            if self.config.show_progress && n_merges % PROGRESS_STEP == 0 {
                log::info!(
                    "{n_merges} merges, vocab {}/{}",
                    vocab.len(),
                    self.config.vocab_size,
                );
            }
        };

        log::info!(
            "training finished in {:?}: {} merges, vocab {} (seeded {n_seeded}), {stop_reason:?}",
            time.elapsed(),
            vocab.merges().len(),
            vocab.len(),
        );
        Ok(Training { vocab, stop_reason })
    }

    /// 特殊词在前，然后是初始字母表。
    fn seed(&self) -> Vocab {
        let mut vocab = Vocab::new();
        for token in &self.config.special_tokens {
            vocab.insert_special(token);
        }
        match &self.config.initial_alphabet {
            Some(alphabet) => {
                for c in alphabet {
                    vocab.insert(c.encode_utf8(&mut [0; 4]));
                }
            }
            None => {
                for c in self.alphabet.symbols() {
                    vocab.insert(c.encode_utf8(&mut [0; 4]));
                }
            }
        }
        vocab
    }

    /// 分批并行统计语料中每个词（映射为可见字符后）的出现次数。
    fn count_words<I, S>(&self, corpus: I) -> Result<FxHashMap<String, u64>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str> + Send,
    {
        let mut ans = FxHashMap::default();
        let mut corpus = corpus.into_iter();
        let mut n_lines = 0;
        loop {
            let batch = corpus
                .by_ref()
                .take(self.config.batch_size)
                .collect::<Vec<_>>();
            if batch.is_empty() {
                break;
            }
            n_lines += batch.len();
            let counts = batch
                .into_par_iter()
                .try_fold(FxHashMap::default, |mut acc, text| {
                    for piece in self.pre_tokenizer.split(text.as_ref())? {
                        let word = self.alphabet.bytes_to_symbols(&piece.text);
                        *acc.entry(word).or_default() += 1;
                    }
                    Ok::<_, Error>(acc)
                })
                .try_reduce(FxHashMap::default, |a, b| Ok(sum_by_key(a, b)))?;
            ans = sum_by_key(ans, counts);
            if self.config.show_progress {
                log::info!("counted {n_lines} lines, {} distinct words", ans.len());
            }
        }
        Ok(ans)
    }
}

/// 并行统计所有词中相邻词对的加权频率，以及每个词对出现在哪些词中。
fn count_pairs(
    words: &[Vec<utok>],
    counts: &[u64],
) -> (FxHashMap<Pair, i64>, FxHashMap<Pair, FxHashSet<usize>>) {
    words
        .par_iter()
        .enumerate()
        .fold(
            || (FxHashMap::default(), FxHashMap::default()),
            |(mut pairs, mut index), (i, word)| {
                for w in word.windows(2) {
                    let pair = (w[0], w[1]);
                    *pairs.entry(pair).or_default() += counts[i] as i64;
                    index
                        .entry(pair)
                        .or_insert_with(FxHashSet::default)
                        .insert(i);
                }
                (pairs, index)
            },
        )
        .reduce(
            || (FxHashMap::default(), FxHashMap::default()),
            |(pairs_a, mut index_a), (pairs_b, index_b)| {
                for (pair, ids) in index_b {
                    index_a.entry(pair).or_default().extend(ids);
                }
                (sum_by_key(pairs_a, pairs_b), index_a)
            },
        )
}

/// 从左到右合并词中所有不重叠的 `pair`，词中没有这个词对时返回 `None`。
fn merge_word(word: &[utok], pair: Pair, merged: utok) -> Option<Vec<utok>> {
    let mut ans = Vec::with_capacity(word.len());
    let mut i = 0;
    while i < word.len() {
        if i + 1 < word.len() && (word[i], word[i + 1]) == pair {
            ans.push(merged);
            i += 2;
        } else {
            ans.push(word[i]);
            i += 1;
        }
    }
    (ans.len() < word.len()).then_some(ans)
}

fn score(vocab: &Vocab, pair: Pair, count: u64) -> Result<PairScore> {
    let (left, right) = pair;
    Ok(PairScore {
        count,
        pair,
        key: (vocab.symbol_of(left)?.into(), vocab.symbol_of(right)?.into()),
    })
}

fn sum_by_key<K, V>(mut a: FxHashMap<K, V>, mut b: FxHashMap<K, V>) -> FxHashMap<K, V>
where
    K: Eq + Hash,
    V: AddAssign + Default,
{
    if a.len() < b.len() {
        std::mem::swap(&mut a, &mut b);
    }
    for (k, v) in b {
        *a.entry(k).or_default() += v;
    }
    a
}
