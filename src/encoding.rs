use crate::utok;

/// 一次编码的结果：按顺序排列的 (序号, 符号, 偏移) 三元组。
///
/// 偏移是当前模式下原始字节的半开区间，从整个输入的开头算起。
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct Encoding {
    ids: Vec<utok>,
    tokens: Vec<String>,
    offsets: Vec<(usize, usize)>,
}

impl Encoding {
    #[inline]
    pub(crate) fn push(&mut self, id: utok, token: &str, offsets: (usize, usize)) {
        self.ids.push(id);
        self.tokens.push(token.to_string());
        self.offsets.push(offsets);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[inline]
    pub fn ids(&self) -> &[utok] {
        &self.ids
    }

    #[inline]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    #[inline]
    pub fn offsets(&self) -> &[(usize, usize)] {
        &self.offsets
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (utok, &str, (usize, usize))> + '_ {
        self.ids
            .iter()
            .zip(&self.tokens)
            .zip(&self.offsets)
            .map(|((&id, token), &offsets)| (id, token.as_str(), offsets))
    }

    pub fn into_ids(self) -> Vec<utok> {
        self.ids
    }
}
