//! 原子操作数据结构
//!
//! 一个原子操作是一组按顺序执行的链上步骤，要么整体成功，要么被补偿

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::{OperationRequirement, TransactionStep};

/// 操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Swap,
    Batch,
    Conditional,
    Timelocked,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Swap => "swap",
            OperationKind::Batch => "batch",
            OperationKind::Conditional => "conditional",
            OperationKind::Timelocked => "timelocked",
        }
    }
}

/// 操作状态
///
/// pending -> simulating -> pending -> executing -> {completed, failed, reverted}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Simulating,
    Executing,
    Completed,
    Failed,
    Reverted,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Reverted
        )
    }

    /// 允许发起一次新的 execute（失败/回滚后由调用方重试）
    pub fn is_executable(&self) -> bool {
        matches!(
            self,
            OperationStatus::Pending | OperationStatus::Failed | OperationStatus::Reverted
        )
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, OperationStatus::Pending | OperationStatus::Simulating)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Simulating => "simulating",
            OperationStatus::Executing => "executing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Reverted => "reverted",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

/// 安全约束配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeguardConfig {
    /// true: 任一步骤失败即中止
    pub require_all_steps: bool,
    pub enable_rollback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_gas_limit: Option<u64>,
    /// 滑点容忍度（基点）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage_tolerance_bps: Option<u32>,
}

impl SafeguardConfig {
    /// 只有两个开关同时打开才会回滚
    pub fn rollback_enabled(&self) -> bool {
        self.require_all_steps && self.enable_rollback
    }

    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }
}

impl Default for SafeguardConfig {
    fn default() -> Self {
        Self {
            require_all_steps: true,
            enable_rollback: true,
            deadline: None,
            max_gas_limit: None,
            slippage_tolerance_bps: None,
        }
    }
}

/// 操作元数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMetadata {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 由模拟回写
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_gas: Option<u64>,
    /// 由模拟回写（wei）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<U256>,
}

/// 原子操作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicOperation {
    pub id: String,
    pub kind: OperationKind,
    /// 签名并发送所有步骤的账户
    pub account: Address,
    pub steps: Vec<TransactionStep>,
    #[serde(default)]
    pub requirements: Vec<OperationRequirement>,
    #[serde(default)]
    pub safeguards: SafeguardConfig,
    pub metadata: OperationMetadata,
    pub status: OperationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// 定时锁操作的解锁时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_at: Option<DateTime<Utc>>,
}

impl AtomicOperation {
    /// 已执行的步骤数
    pub fn completed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.is_executed()).count()
    }

    /// 第一个尚未执行的步骤
    pub fn first_unexecuted(&self) -> Option<usize> {
        self.steps.iter().position(|s| !s.is_executed())
    }

    pub fn total_gas_used(&self) -> u64 {
        self.steps.iter().filter_map(|s| s.gas_used()).sum()
    }

    pub fn executed_tx_hashes(&self) -> Vec<B256> {
        self.steps
            .iter()
            .filter(|s| s.is_executed())
            .filter_map(|s| s.tx_hash())
            .collect()
    }

    /// 准备一次新的执行
    ///
    /// reverted: 已执行前缀已被补偿，全部重置；failed: 保留已执行前缀，从失败处续跑
    pub fn prepare_for_execution(&mut self) {
        match self.status {
            OperationStatus::Reverted => self.steps.iter_mut().for_each(|s| s.reset()),
            _ => self
                .steps
                .iter_mut()
                .filter(|s| !s.is_executed())
                .for_each(|s| s.reset()),
        }
    }
}
