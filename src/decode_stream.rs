use crate::{utok, Malformed, Method, Result, Tokeneer};

/// 逐个 token 的增量解码。
///
/// 每一步只输出后续 token 无法再改变的文本，未完成的字符留在缓冲区中。
pub struct DecodeStream<'a, M> {
    tokeneer: &'a Tokeneer<M>,
    pending: Vec<u8>,
}

impl<'a, M: Method> DecodeStream<'a, M> {
    #[inline]
    pub(crate) fn new(tokeneer: &'a Tokeneer<M>) -> Self {
        Self {
            tokeneer,
            pending: Vec::new(),
        }
    }

    /// 接收一个 token，返回新确定的文本。
    ///
    /// 出错时丢弃缓冲区，之后的解码从空状态开始。
    pub fn step(&mut self, token: utok) -> Result<Option<String>> {
        let ans = self.try_step(token);
        if ans.is_err() {
            self.pending.clear();
        }
        ans
    }

    /// 结束解码。缓冲区中还有字节时报告 [`Malformed::Truncated`]，无论结果如何都会清空状态。
    pub fn flush(&mut self) -> Result<()> {
        match std::mem::take(&mut self.pending).len() {
            0 => Ok(()),
            n => Err(Malformed::Truncated(n).into()),
        }
    }

    /// 缓冲区中尚未输出的原始字节数。
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn try_step(&mut self, token: utok) -> Result<Option<String>> {
        self.tokeneer.push_token(token, &mut self.pending)?;
        let (text, consumed) = self
            .tokeneer
            .internal()
            .alphabet()
            .split_complete(&self.pending)?;
        self.pending.drain(..consumed);
        Ok((!text.is_empty()).then_some(text))
    }
}
