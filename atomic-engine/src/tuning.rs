//! Gas 调优参数
//!
//! 恢复动作写入、执行协调器在下一次提交时读取

use std::sync::atomic::{AtomicU32, Ordering};

/// 默认倍率（百分比）
pub const BASE_PERCENT: u32 = 100;

/// gas price / gas limit 的运行时倍率
#[derive(Debug)]
pub struct GasTuning {
    gas_price_percent: AtomicU32,
    gas_limit_percent: AtomicU32,
    max_percent: u32,
}

impl Default for GasTuning {
    fn default() -> Self {
        Self::new(300)
    }
}

impl GasTuning {
    pub fn new(max_percent: u32) -> Self {
        Self {
            gas_price_percent: AtomicU32::new(BASE_PERCENT),
            gas_limit_percent: AtomicU32::new(BASE_PERCENT),
            max_percent: max_percent.max(BASE_PERCENT),
        }
    }

    pub fn gas_price_percent(&self) -> u32 {
        self.gas_price_percent.load(Ordering::SeqCst)
    }

    pub fn gas_limit_percent(&self) -> u32 {
        self.gas_limit_percent.load(Ordering::SeqCst)
    }

    /// 提高 gas price 倍率，返回新值；已到上限时返回 None。
    /// 上限取 `cap` 与构造时上限中较小的一个
    pub fn bump_gas_price(&self, step_percent: u32, cap: u32) -> Option<u32> {
        Self::bump(&self.gas_price_percent, step_percent, self.max_percent.min(cap))
    }

    /// 提高 gas limit 倍率，返回新值；已到上限时返回 None
    pub fn bump_gas_limit(&self, step_percent: u32, cap: u32) -> Option<u32> {
        Self::bump(&self.gas_limit_percent, step_percent, self.max_percent.min(cap))
    }

    fn bump(slot: &AtomicU32, step_percent: u32, max: u32) -> Option<u32> {
        let mut current = slot.load(Ordering::SeqCst);
        loop {
            if current >= max {
                return None;
            }
            let next = current.saturating_add(step_percent).min(max);
            match slot.compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return Some(next),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn apply_gas_price(&self, price: u128) -> u128 {
        price.saturating_mul(self.gas_price_percent() as u128) / BASE_PERCENT as u128
    }

    pub fn apply_gas_limit(&self, limit: u64) -> u64 {
        limit.saturating_mul(self.gas_limit_percent() as u64) / BASE_PERCENT as u64
    }

    /// 恢复默认倍率
    pub fn reset(&self) {
        self.gas_price_percent.store(BASE_PERCENT, Ordering::SeqCst);
        self.gas_limit_percent.store(BASE_PERCENT, Ordering::SeqCst);
    }

    pub fn is_default(&self) -> bool {
        self.gas_price_percent() == BASE_PERCENT && self.gas_limit_percent() == BASE_PERCENT
    }
}
