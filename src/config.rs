//! 分词器和训练器的配置，均通过构造器创建并在 `build` 时校验。

use crate::{Error, Result};

/// 默认的合并缓存容量。
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// [`Bpe`](crate::Bpe) 的运行参数。
#[derive(Clone, Debug, PartialEq)]
pub struct BpeConfig {
    /// 以此概率随机跳过可执行的合并，只用于训练时的数据增强，默认关闭。
    pub dropout: Option<f32>,
    /// 合并缓存的容量，为 0 时不使用缓存。
    pub cache_capacity: usize,
}

impl Default for BpeConfig {
    fn default() -> Self {
        Self {
            dropout: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl BpeConfig {
    #[inline]
    pub fn builder() -> BpeBuilder {
        BpeBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        match self.dropout {
            Some(p) if !(0.0..1.0).contains(&p) => Err(Error::InvalidConfig(format!(
                "dropout must be in [0, 1), got {p}"
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct BpeBuilder {
    cfg: BpeConfig,
}

impl BpeBuilder {
    #[must_use]
    pub fn dropout(mut self, p: f32) -> Self {
        self.cfg.dropout = Some(p);
        self
    }

    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cfg.cache_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<BpeConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

/// [`Trainer`](crate::Trainer) 的训练参数。
#[derive(Clone, Debug, PartialEq)]
pub struct TrainerConfig {
    /// 目标词表大小，包含特殊词和基础字母表。
    pub vocab_size: usize,
    /// 词对频率低于此值时停止训练。
    pub min_frequency: u64,
    /// 特殊词，按顺序占据最前面的序号。
    pub special_tokens: Vec<String>,
    /// 初始字母表，为空时使用字节字母表的全部 256 个字符。
    pub initial_alphabet: Option<Vec<char>>,
    /// 是否通过日志报告训练进度。
    pub show_progress: bool,
    /// 每批并行统计的语料条数。
    pub batch_size: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            vocab_size: 30_000,
            min_frequency: 0,
            special_tokens: Vec::new(),
            initial_alphabet: None,
            show_progress: false,
            batch_size: 1024,
        }
    }
}

impl TrainerConfig {
    #[inline]
    pub fn builder() -> TrainerBuilder {
        TrainerBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be positive".into()));
        }
        for (i, token) in self.special_tokens.iter().enumerate() {
            if token.is_empty() {
                return Err(Error::InvalidConfig("special token must not be empty".into()));
            }
            if self.special_tokens[..i].contains(token) {
                return Err(Error::InvalidConfig(format!(
                    "special token {token:?} listed twice"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct TrainerBuilder {
    cfg: TrainerConfig,
}

impl TrainerBuilder {
    #[must_use]
    pub fn vocab_size(mut self, size: usize) -> Self {
        self.cfg.vocab_size = size;
        self
    }

    #[must_use]
    pub fn min_frequency(mut self, freq: u64) -> Self {
        self.cfg.min_frequency = freq;
        self
    }

    #[must_use]
    pub fn special_tokens<T: Into<String>>(mut self, tokens: impl IntoIterator<Item = T>) -> Self {
        self.cfg.special_tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn initial_alphabet(mut self, alphabet: impl IntoIterator<Item = char>) -> Self {
        self.cfg.initial_alphabet = Some(alphabet.into_iter().collect());
        self
    }

    #[must_use]
    pub fn show_progress(mut self, show: bool) -> Self {
        self.cfg.show_progress = show;
        self
    }

    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.cfg.batch_size = size;
        self
    }

    pub fn build(self) -> Result<TrainerConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropout_range() {
        assert!(BpeConfig::builder().dropout(0.0).build().is_ok());
        assert!(BpeConfig::builder().dropout(0.3).build().is_ok());
        assert!(BpeConfig::builder().dropout(1.0).build().is_err());
        assert!(BpeConfig::builder().dropout(-0.1).build().is_err());
        assert!(BpeConfig::builder().dropout(f32::NAN).build().is_err());
    }

    #[test]
    fn trainer_builder() {
        let cfg = TrainerConfig::builder()
            .vocab_size(300)
            .min_frequency(2)
            .special_tokens(["<s>", "</s>"])
            .build()
            .unwrap();
        assert_eq!(cfg.vocab_size, 300);
        assert_eq!(cfg.min_frequency, 2);
        assert_eq!(cfg.special_tokens, ["<s>", "</s>"]);
        assert_eq!(cfg.initial_alphabet, None);

        assert!(TrainerConfig::builder().special_tokens([""]).build().is_err());
        assert!(TrainerConfig::builder().special_tokens(["a", "a"]).build().is_err());
        assert!(TrainerConfig::builder().batch_size(0).build().is_err());
    }
}
