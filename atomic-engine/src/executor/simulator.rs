//! 步骤模拟器
//!
//! 不提交任何交易：逐步检查前置条件、估算 gas，并汇总安全约束检查

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, ChainError};
use crate::executor::RequirementChecker;
use crate::schema::{
    AtomicOperation, ConditionCheck, OperationKind, SimulationResult, StepSimulation,
};

pub struct StepSimulator {
    chain: Arc<dyn ChainClient>,
    checker: RequirementChecker,
    default_gas_limit: u64,
}

impl StepSimulator {
    pub fn new(chain: Arc<dyn ChainClient>, default_gas_limit: u64) -> Self {
        Self {
            checker: RequirementChecker::new(Arc::clone(&chain)),
            chain,
            default_gas_limit,
        }
    }

    /// 模拟一个（已准备好执行的）操作
    ///
    /// 已执行的步骤不再模拟；只有第一个待执行步骤的前置条件失败会阻止执行，
    /// 后续步骤的前置条件可能依赖前面步骤的结果，只记为警告
    pub async fn simulate(&self, operation: &AtomicOperation, now: DateTime<Utc>) -> SimulationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut steps = Vec::new();
        let mut total_gas: u64 = 0;
        let first_pending = operation.first_unexecuted();

        for (index, step) in operation.steps.iter().enumerate() {
            if step.is_executed() {
                continue;
            }

            let mut sim = StepSimulation {
                index,
                step_id: step.id.clone(),
                function: step.function_name().to_string(),
                gas_estimate: 0,
                estimated: false,
                condition_passed: None,
                error: None,
            };

            // 前置条件先于 gas 估算
            if let Some(check) = &step.precondition {
                match evaluate_condition(self.chain.as_ref(), check).await {
                    Ok(true) => sim.condition_passed = Some(true),
                    outcome => {
                        let reason = match outcome {
                            Err(e) => format!("无法读取前置条件 {}: {}", check.describe(), e),
                            _ => format!("前置条件未满足: {}", check.describe()),
                        };
                        sim.condition_passed = Some(false);
                        let text = format!("步骤 {} ({}) {}", index, sim.function, reason);
                        if Some(index) == first_pending {
                            errors.push(text);
                        } else {
                            warnings.push(text);
                        }
                        sim.error = Some(reason);
                        steps.push(sim);
                        continue;
                    }
                }
            }

            let request = step.to_tx_request(operation.account);
            match self.chain.estimate_gas(&request).await {
                Ok(gas) => {
                    sim.gas_estimate = gas;
                    sim.estimated = true;
                }
                Err(e) => {
                    let fallback = step.gas_limit.unwrap_or(self.default_gas_limit);
                    warnings.push(format!(
                        "步骤 {} ({}) gas 估算失败，使用 {}: {}",
                        index, sim.function, fallback, e
                    ));
                    sim.gas_estimate = fallback;
                    sim.error = Some(e.to_string());
                }
            }

            debug!(
                "🔍 模拟步骤 {} ({}): gas={} estimated={}",
                index, sim.function, sim.gas_estimate, sim.estimated
            );
            total_gas = total_gas.saturating_add(sim.gas_estimate);
            steps.push(sim);
        }

        let gas_price = match self.chain.gas_price().await {
            Ok(price) => Some(price),
            Err(e) => {
                warnings.push(format!("无法获取 gas 价格，费用未计算: {}", e));
                None
            }
        };
        let total_cost = gas_price.map(|price| U256::from(total_gas) * U256::from(price));

        let requirements = self.checker.check(&operation.requirements).await;
        errors.extend(requirements.failures().map(|r| r.describe()));

        // 安全约束检查
        if let Some(max_gas) = operation.safeguards.max_gas_limit {
            if total_gas > max_gas {
                warnings.push(format!("预计 gas {} 超过上限 {}", total_gas, max_gas));
            }
        }
        if operation.safeguards.deadline_passed(now) {
            if let Some(deadline) = operation.safeguards.deadline {
                errors.push(format!("已超过截止时间 {}", deadline.to_rfc3339()));
            }
        }
        if operation.kind == OperationKind::Timelocked {
            match operation.unlock_at {
                Some(unlock_at) if now < unlock_at => {
                    errors.push(format!("定时锁未解除，解锁时间 {}", unlock_at.to_rfc3339()));
                }
                None => errors.push("定时锁操作缺少解锁时间".to_string()),
                _ => {}
            }
        }

        let can_execute = errors.is_empty();
        if can_execute {
            info!(
                "✅ 模拟通过: {} ({} 步, gas {})",
                operation.id,
                steps.len(),
                total_gas
            );
        } else {
            warn!("❌ 模拟未通过: {} ({} 个错误)", operation.id, errors.len());
        }

        SimulationResult {
            operation_id: operation.id.clone(),
            can_execute,
            total_gas,
            gas_price,
            total_cost,
            steps,
            requirements,
            errors,
            warnings,
        }
    }
}

/// 读取视图函数并比较
pub async fn evaluate_condition(
    chain: &dyn ChainClient,
    check: &ConditionCheck,
) -> Result<bool, ChainError> {
    let actual = chain.read_view(check.target, &check.call).await?;
    Ok(check.comparator.compare(actual, check.expected))
}
