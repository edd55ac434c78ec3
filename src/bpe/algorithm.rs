use super::Bpe;
use crate::{utok, Error, Result};
use rand::{rngs::ThreadRng, Rng};
use std::{
    cmp::Ordering::{self, Equal},
    collections::BinaryHeap,
    fmt,
    ops::Range,
};

/// 已被合并到左侧 token 中的位置。
const VACANT: utok = utok::MAX;

/// 一个片段的合并状态。
///
/// `marks` 中每个原始字节占一个位置，token 记录在它的起始位置上，
/// 其余位置标记为 [`VACANT`]。
pub struct MergeState<'v> {
    bpe: &'v Bpe,
    marks: Vec<Mark>,
    merges: BinaryHeap<Merge>,
    dropout: Option<(f32, ThreadRng)>,
    skipped: Vec<Merge>,
}

pub struct Iter<'a> {
    bpe: &'a Bpe,
    marks: &'a [Mark],
    pos: usize,
}

impl Bpe {
    pub fn begin_merge(&self, bytes: &[u8], dropout: Option<f32>) -> Result<MergeState<'_>> {
        let marks = bytes
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                self.bytes[b as usize]
                    .map(|token| Mark {
                        token,
                        back_distance: (i > 0) as _,
                    })
                    .ok_or(Error::UnmappedByte(b))
            })
            .collect::<Result<Vec<_>>>()?;
        let merges = marks
            .windows(2)
            .enumerate()
            .filter_map(|(i, w)| self.build_merge(i, (w[0].token, w[1].token)))
            .collect();

        Ok(MergeState {
            bpe: self,
            marks,
            merges,
            dropout: dropout.map(|p| (p, rand::rng())),
            skipped: Vec::new(),
        })
    }

    #[inline]
    fn build_merge(&self, pos: usize, pair: (utok, utok)) -> Option<Merge> {
        self.merges.get(&pair).map(|&(rank, merge)| Merge {
            pos,
            pair,
            merge,
            rank,
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct Mark {
    token: utok,
    back_distance: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Merge {
    pos: usize,
    pair: (utok, utok),
    merge: utok,
    rank: u32,
}
impl Ord for Merge {
    fn cmp(&self, other: &Self) -> Ordering {
        // 比较顺序：rank -> merged -> pos -> pair
        match self.rank.cmp(&other.rank) {
            Equal => match self.merge.cmp(&other.merge) {
                Equal => match self.pos.cmp(&other.pos) {
                    Equal => self.pair.cmp(&other.pair),
                    other => other,
                },
                other => other,
            },
            other => other,
        }
        .reverse()
    }
}
impl PartialOrd for Merge {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl MergeState<'_> {
    /// 尝试执行一次合并，返回是否成功执行了一次合并。
    pub fn merge(&mut self) -> bool {
        // 一次合并将涉及至多 4 个 token：
        //
        // t0 t1 t2 t3
        // -- -- -- --
        //      ↓
        // t0 merge t3
        // -- ----- --
        //
        // 成功的合并将至少消费合并队列中的 1 个项，
        // 同时至多向合并队列添加 2 个项：
        //
        // t0 merge t3
        //    --------
        // --------

        // 从合并队列消费
        while let Some(candidate) = self.merges.pop() {
            let Merge {
                pos: p1,
                pair: (t1, t2),
                merge,
                ..
            } = candidate;
            // 确认合并项有效性
            if self.marks[p1].token != t1 {
                continue;
            }
            let l1 = self.bpe.token(t1).n_bytes as usize;
            let p2 = p1 + l1;
            if self.marks.get(p2).map(|m| m.token) != Some(t2) {
                continue;
            }
            // 随机丢弃，被丢弃的项在下一次成功合并后重新入队
            if let Some((p, rng)) = &mut self.dropout {
                if rng.random::<f32>() < *p {
                    self.skipped.push(candidate);
                    continue;
                }
            }
            self.merges.extend(self.skipped.drain(..));
            // 合并
            self.marks[p1].token = merge;
            self.marks[p2].token = VACANT;

            let l2 = self.bpe.token(t2).n_bytes as usize;
            let p3 = p2 + l2;
            // 创建 merge + t3 合并项
            if let Some(Mark {
                token,
                back_distance,
            }) = self.marks.get_mut(p3)
            {
                *back_distance = (l1 + l2) as _;
                let t3 = *token;
                if let Some(merge) = self.bpe.build_merge(p1, (merge, t3)) {
                    self.merges.push(merge);
                }
            }
            // 创建 t0 + merge 合并项
            match self.marks[p1].back_distance as usize {
                0 => {}
                l0 => {
                    let p0 = p1 - l0;
                    let t0 = self.marks[p0].token;
                    if let Some(merge) = self.bpe.build_merge(p0, (t0, merge)) {
                        self.merges.push(merge);
                    }
                }
            }
            // 成功合并
            return true;
        }
        false
    }

    /// 遍历当前的 token 及其在原始字节中的范围。
    #[inline]
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            bpe: self.bpe,
            marks: &self.marks,
            pos: 0,
        }
    }
}

impl Iterator for Iter<'_> {
    type Item = (utok, Range<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        match self.marks {
            &[Mark { token, .. }, ref tail @ ..] => {
                let len = self.bpe.token(token).n_bytes as usize;
                self.marks = &tail[len - 1..];
                let start = self.pos;
                self.pos += len;
                Some((token, start..self.pos))
            }
            [] => None,
        }
    }
}

impl fmt::Display for MergeState<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "---------------------------")?;
        {
            writeln!(f, "tokens:")?;
            write!(f, "  ")?;
            for (token, _) in self.iter() {
                write!(f, "{}", self.bpe.piece(token))?;
            }
            writeln!(f)?;
        }
        writeln!(f, "---------------------------")?;
        {
            writeln!(f, "tokens:")?;
            for (token, range) in self.iter() {
                writeln!(f, "  {token:>6}: {} {range:?}", self.bpe.piece(token))?;
            }
        }
        writeln!(f, "---------------------------")?;
        {
            writeln!(f, "merges:")?;
            let mut merges = self.merges.clone();
            while let Some(Merge {
                rank,
                merge: merged,
                ..
            }) = merges.pop()
            {
                writeln!(f, "  {rank:>6} | {}", self.bpe.piece(merged))?;
            }
        }
        writeln!(f, "---------------------------")
    }
}
