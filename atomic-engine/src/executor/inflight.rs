//! 执行中操作登记表
//!
//! 同一个操作 id 同时只允许一个 execute；守卫在任何退出路径上释放 id

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct InFlightRegistry {
    ids: Mutex<HashSet<String>>,
}

impl InFlightRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 尝试占用 id；已被占用时返回 None
    pub fn try_acquire(self: &Arc<Self>, id: &str) -> Option<InFlightGuard> {
        let mut ids = self.ids.lock();
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            registry: Arc::clone(self),
            id: id.to_string(),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}

/// 占用凭证，drop 时释放
#[derive(Debug)]
pub struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    id: String,
}

impl InFlightGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.ids.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_acquire_rejected() {
        let registry = InFlightRegistry::new();
        let guard = registry.try_acquire("op_1").unwrap();
        assert!(registry.try_acquire("op_1").is_none());
        assert!(registry.try_acquire("op_2").is_some());
        assert!(registry.contains("op_1"));

        drop(guard);
        assert!(!registry.contains("op_1"));
        assert!(registry.try_acquire("op_1").is_some());
    }
}
