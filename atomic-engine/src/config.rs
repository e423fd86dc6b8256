//! 引擎配置

use std::time::Duration;

/// 执行引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 估算失败且步骤未声明 gas limit 时的回退值
    pub default_gas_limit: u64,
    /// 未设置截止时间时，等待回执的上限
    pub receipt_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_gas_limit: 200_000,
            receipt_timeout: Duration::from_secs(120),
        }
    }
}

/// 错误恢复配置
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// wait_for_congestion 的等待时长
    pub congestion_wait: Duration,
    /// 每次提高 gas price 的百分比
    pub gas_price_bump_percent: u32,
    /// 每次提高 gas limit 的百分比
    pub gas_limit_bump_percent: u32,
    /// 倍率上限（百分比）
    pub max_bump_percent: u32,
    /// 错误历史保留条数
    pub history_limit: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            congestion_wait: Duration::from_secs(5),
            gas_price_bump_percent: 20,
            gas_limit_bump_percent: 20,
            max_bump_percent: 300,
            history_limit: 100,
        }
    }
}
