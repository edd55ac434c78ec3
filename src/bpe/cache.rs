use crate::utok;
use rustc_hash::FxHashMap;
use std::sync::RwLock;

/// 超过这个长度的片段不进入缓存。
pub(super) const MAX_KEY_LEN: usize = 256;

/// 片段原始字节 -> 合并结果的缓存。
///
/// 读写都不阻塞：拿不到锁就当作未命中，代价只是重新计算一次。
/// 容量满时整体清空。
pub(super) struct Cache {
    map: RwLock<FxHashMap<Box<[u8]>, Box<[utok]>>>,
    capacity: usize,
}

impl Cache {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: RwLock::new(FxHashMap::default()),
            capacity,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Box<[utok]>> {
        self.map.try_read().ok()?.get(key).cloned()
    }

    pub fn insert(&self, key: &[u8], value: &[utok]) {
        if key.len() > MAX_KEY_LEN {
            return;
        }
        if let Ok(mut map) = self.map.try_write() {
            if map.len() >= self.capacity {
                map.clear();
            }
            map.insert(key.into(), value.into());
        }
    }

    pub fn clear(&self) {
        if let Ok(mut map) = self.map.write() {
            map.clear();
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.read().map_or(0, |map| map.len())
    }
}
