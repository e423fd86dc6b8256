//! 模拟、执行与回滚的结果结构
//!
//! 这些都是一次调用的瞬时结果，不写回存储

use alloy::primitives::{B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::{OperationStatus, RequirementReport};

/// 单步模拟结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSimulation {
    pub index: usize,
    pub step_id: String,
    pub function: String,
    /// 估算 gas（估算失败时为回退值；前置条件未通过时为 0）
    pub gas_estimate: u64,
    /// true 表示来自链上估算
    pub estimated: bool,
    /// None 表示该步骤没有前置条件
    pub condition_passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 模拟报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub operation_id: String,
    pub can_execute: bool,
    pub total_gas: u64,
    pub gas_price: Option<u128>,
    pub total_cost: Option<U256>,
    pub steps: Vec<StepSimulation>,
    pub requirements: RequirementReport,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// 单步补偿结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompensationOutcome {
    Compensated {
        tx_hash: B256,
    },
    /// 没有已知的补偿动作
    Skipped,
    Failed {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tx_hash: Option<B256>,
    },
}

impl CompensationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationOutcome::Compensated { .. } => "compensated",
            CompensationOutcome::Skipped => "skipped",
            CompensationOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationRecord {
    pub step_index: usize,
    pub step_id: String,
    pub function: String,
    #[serde(flatten)]
    pub outcome: CompensationOutcome,
}

/// 回滚报告（按实际处理顺序，即逆序）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub records: Vec<CompensationRecord>,
}

impl RollbackReport {
    /// 实际产生的补偿交易哈希
    pub fn tx_hashes(&self) -> Vec<B256> {
        self.records
            .iter()
            .filter_map(|r| match &r.outcome {
                CompensationOutcome::Compensated { tx_hash } => Some(*tx_hash),
                CompensationOutcome::Failed { tx_hash, .. } => *tx_hash,
                CompensationOutcome::Skipped => None,
            })
            .collect()
    }

    /// 尝试过补偿的步骤数（不含跳过）
    pub fn attempted(&self) -> usize {
        self.records
            .iter()
            .filter(|r| !matches!(r.outcome, CompensationOutcome::Skipped))
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.records
            .iter()
            .all(|r| !matches!(r.outcome, CompensationOutcome::Failed { .. }))
    }
}

/// 执行成功的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub operation_id: String,
    pub status: OperationStatus,
    pub completed_steps: usize,
    pub total_gas_used: u64,
    pub tx_hashes: Vec<B256>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_report_hashes() {
        let report = RollbackReport {
            records: vec![
                CompensationRecord {
                    step_index: 2,
                    step_id: "s2".into(),
                    function: "swap".into(),
                    outcome: CompensationOutcome::Skipped,
                },
                CompensationRecord {
                    step_index: 1,
                    step_id: "s1".into(),
                    function: "approve".into(),
                    outcome: CompensationOutcome::Failed {
                        error: "nope".into(),
                        tx_hash: None,
                    },
                },
                CompensationRecord {
                    step_index: 0,
                    step_id: "s0".into(),
                    function: "approve".into(),
                    outcome: CompensationOutcome::Compensated {
                        tx_hash: B256::repeat_byte(7),
                    },
                },
            ],
        };

        assert_eq!(report.tx_hashes(), vec![B256::repeat_byte(7)]);
        assert_eq!(report.attempted(), 2);
        assert!(!report.is_clean());
    }
}
