//! 操作前置要求
//!
//! 要求本身是不可变的描述；每次检查都返回新的 `RequirementResult`

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::chain::ViewCall;
use crate::schema::Comparator;

/// 要求类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequirementKind {
    /// `target` 为代币地址；零地址表示原生代币
    Balance { owner: Address },
    Allowance { owner: Address, spender: Address },
    Permission { call: ViewCall },
    State { call: ViewCall },
}

impl RequirementKind {
    pub fn label(&self) -> &'static str {
        match self {
            RequirementKind::Balance { .. } => "balance",
            RequirementKind::Allowance { .. } => "allowance",
            RequirementKind::Permission { .. } => "permission",
            RequirementKind::State { .. } => "state",
        }
    }
}

/// 操作前置要求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequirement {
    #[serde(flatten)]
    pub kind: RequirementKind,
    pub target: Address,
    pub comparator: Comparator,
    pub expected: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OperationRequirement {
    pub fn balance(token: Address, owner: Address, minimum: U256) -> Self {
        Self {
            kind: RequirementKind::Balance { owner },
            target: token,
            comparator: Comparator::Gte,
            expected: minimum,
            description: None,
        }
    }

    pub fn allowance(token: Address, owner: Address, spender: Address, minimum: U256) -> Self {
        Self {
            kind: RequirementKind::Allowance { owner, spender },
            target: token,
            comparator: Comparator::Gte,
            expected: minimum,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// 单个要求的检查结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementResult {
    pub requirement: OperationRequirement,
    pub actual: Option<U256>,
    pub satisfied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequirementResult {
    /// 对 `>=` / `>` 类要求计算差额
    pub fn shortfall(&self) -> Option<U256> {
        let actual = self.actual?;
        let expected = self.requirement.expected;
        match self.requirement.comparator {
            Comparator::Gte if actual < expected => Some(expected - actual),
            Comparator::Gt if actual <= expected => {
                Some(expected - actual + U256::from(1))
            }
            _ => None,
        }
    }

    /// 面向用户的失败说明
    pub fn describe(&self) -> String {
        let req = &self.requirement;
        let label = req
            .description
            .clone()
            .unwrap_or_else(|| format!("{} 要求 ({})", req.kind.label(), req.target));

        if let Some(err) = &self.error {
            return format!("{}: 读取链上状态失败: {}", label, err);
        }

        match (self.actual, self.shortfall()) {
            (Some(actual), Some(shortfall)) => format!(
                "{}: 需要 {} {}, 实际 {}, 差额 {}",
                label,
                req.comparator.symbol(),
                req.expected,
                actual,
                shortfall
            ),
            (Some(actual), None) => format!(
                "{}: 需要 {} {}, 实际 {}",
                label,
                req.comparator.symbol(),
                req.expected,
                actual
            ),
            (None, _) => format!("{}: 未能获取实际值", label),
        }
    }
}

/// 一次要求检查的完整报告
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementReport {
    pub results: Vec<RequirementResult>,
}

impl RequirementReport {
    /// 全部满足才允许执行
    pub fn all_satisfied(&self) -> bool {
        self.results.iter().all(|r| r.satisfied)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RequirementResult> {
        self.results.iter().filter(|r| !r.satisfied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortfall_message() {
        let req = OperationRequirement::balance(Address::ZERO, Address::ZERO, U256::from(100));
        let result = RequirementResult {
            requirement: req,
            actual: Some(U256::from(40)),
            satisfied: false,
            error: None,
        };
        assert_eq!(result.shortfall(), Some(U256::from(60)));
        let text = result.describe();
        assert!(text.contains("实际 40"));
        assert!(text.contains("差额 60"));
    }

    #[test]
    fn test_requirement_serde_tagged() {
        let req = OperationRequirement::allowance(
            Address::ZERO,
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            U256::ZERO,
        );
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"allowance\""));
        let back: OperationRequirement = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }
}
