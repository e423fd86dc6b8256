//! 前置要求检查器
//!
//! 每次检查都重新读取链上状态；读取失败视为不满足，但不会中断其余检查

use alloy::primitives::{Address, U256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chain::{ChainClient, ChainError};
use crate::schema::{
    OperationRequirement, RequirementKind, RequirementReport, RequirementResult,
};

pub struct RequirementChecker {
    chain: Arc<dyn ChainClient>,
}

impl RequirementChecker {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain }
    }

    /// 逐个检查，返回新的报告
    pub async fn check(&self, requirements: &[OperationRequirement]) -> RequirementReport {
        let mut results = Vec::with_capacity(requirements.len());

        for requirement in requirements {
            let result = match self.read_actual(requirement).await {
                Ok(actual) => {
                    let satisfied = requirement.comparator.compare(actual, requirement.expected);
                    debug!(
                        "要求 {} on {}: 实际 {} {} {} -> {}",
                        requirement.kind.label(),
                        requirement.target,
                        actual,
                        requirement.comparator.symbol(),
                        requirement.expected,
                        satisfied
                    );
                    RequirementResult {
                        requirement: requirement.clone(),
                        actual: Some(actual),
                        satisfied,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(
                        "⚠️  读取 {} 要求失败 ({}): {}",
                        requirement.kind.label(),
                        requirement.target,
                        e
                    );
                    RequirementResult {
                        requirement: requirement.clone(),
                        actual: None,
                        satisfied: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }

        RequirementReport { results }
    }

    async fn read_actual(&self, requirement: &OperationRequirement) -> Result<U256, ChainError> {
        match &requirement.kind {
            RequirementKind::Balance { owner } if requirement.target == Address::ZERO => {
                self.chain.native_balance(*owner).await
            }
            RequirementKind::Balance { owner } => {
                self.chain.balance_of(requirement.target, *owner).await
            }
            RequirementKind::Allowance { owner, spender } => {
                self.chain
                    .allowance(requirement.target, *owner, *spender)
                    .await
            }
            RequirementKind::Permission { call } | RequirementKind::State { call } => {
                self.chain.read_view(requirement.target, call).await
            }
        }
    }
}
