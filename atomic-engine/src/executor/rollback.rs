//! 回滚补偿器
//!
//! 逆序遍历已执行的步骤，按函数名查找补偿调用。每个补偿独立进行，
//! 单个失败不影响其余步骤

use alloy::primitives::Address;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::chain::{ChainClient, ChainError, TxRequest};
use crate::metrics;
use crate::schema::{
    AtomicOperation, CompensationOutcome, CompensationRecord, RollbackReport, TransactionStep,
};

/// 补偿调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensatingCall {
    pub function: String,
    pub args: Vec<String>,
}

/// 为已执行步骤生成补偿调用；None 表示无法补偿
pub trait Compensation: Send + Sync {
    fn compensate(&self, step: &TransactionStep) -> Option<CompensatingCall>;
}

impl<F> Compensation for F
where
    F: Fn(&TransactionStep) -> Option<CompensatingCall> + Send + Sync,
{
    fn compensate(&self, step: &TransactionStep) -> Option<CompensatingCall> {
        self(step)
    }
}

/// approve(spender, x) -> approve(spender, 0)
pub struct ResetApproval;

impl Compensation for ResetApproval {
    fn compensate(&self, step: &TransactionStep) -> Option<CompensatingCall> {
        let spender = step.args.first()?;
        Some(CompensatingCall {
            function: "approve(address,uint256)".to_string(),
            args: vec![spender.clone(), "0".to_string()],
        })
    }
}

/// increaseAllowance(spender, x) -> decreaseAllowance(spender, x)
pub struct DecreaseAllowance;

impl Compensation for DecreaseAllowance {
    fn compensate(&self, step: &TransactionStep) -> Option<CompensatingCall> {
        match step.args.as_slice() {
            [spender, amount] => Some(CompensatingCall {
                function: "decreaseAllowance(address,uint256)".to_string(),
                args: vec![spender.clone(), amount.clone()],
            }),
            _ => None,
        }
    }
}

/// 补偿注册表（按函数名）
pub struct CompensationRegistry {
    entries: HashMap<String, Arc<dyn Compensation>>,
}

impl Default for CompensationRegistry {
    fn default() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
        };
        registry.register("approve", Arc::new(ResetApproval));
        registry.register("increaseAllowance", Arc::new(DecreaseAllowance));
        registry
    }
}

impl CompensationRegistry {
    pub fn register(&mut self, function_name: impl Into<String>, compensation: Arc<dyn Compensation>) {
        self.entries.insert(function_name.into(), compensation);
    }

    pub fn get(&self, function_name: &str) -> Option<Arc<dyn Compensation>> {
        self.entries.get(function_name).cloned()
    }

    pub fn contains(&self, function_name: &str) -> bool {
        self.entries.contains_key(function_name)
    }
}

pub struct RollbackCompensator {
    chain: Arc<dyn ChainClient>,
    registry: Arc<RwLock<CompensationRegistry>>,
    receipt_timeout: Duration,
}

impl RollbackCompensator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        registry: Arc<RwLock<CompensationRegistry>>,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            registry,
            receipt_timeout,
        }
    }

    /// 补偿 `[0, failed_index)` 中已执行的步骤（逆序）
    pub async fn rollback(&self, operation: &AtomicOperation, failed_index: usize) -> RollbackReport {
        let mut report = RollbackReport::default();
        let end = failed_index.min(operation.steps.len());

        info!("🔄 开始回滚操作 {}: 补偿前 {} 个步骤", operation.id, end);

        for index in (0..end).rev() {
            let step = &operation.steps[index];
            if !step.is_executed() {
                continue;
            }

            let function = step.function_name().to_string();
            // 读锁在 await 之前释放
            let call = {
                let registry = self.registry.read();
                registry.get(&function).and_then(|c| c.compensate(step))
            };

            let outcome = match call {
                None => {
                    info!("⏭️  步骤 {} ({}) 无补偿动作，跳过", index, function);
                    CompensationOutcome::Skipped
                }
                Some(call) => self.submit(operation.account, step.target, call).await,
            };

            match &outcome {
                CompensationOutcome::Compensated { tx_hash } => {
                    info!("✅ 步骤 {} ({}) 已补偿: {}", index, function, tx_hash)
                }
                CompensationOutcome::Failed { error, .. } => {
                    warn!("❌ 步骤 {} ({}) 补偿失败: {}", index, function, error)
                }
                CompensationOutcome::Skipped => {}
            }
            metrics::COMPENSATIONS
                .with_label_values(&[&function, outcome.as_str()])
                .inc();

            report.records.push(CompensationRecord {
                step_index: index,
                step_id: step.id.clone(),
                function,
                outcome,
            });
        }

        info!(
            "🔄 回滚结束 {}: 尝试 {} 个, 失败 {} 个",
            operation.id,
            report.attempted(),
            report
                .records
                .iter()
                .filter(|r| matches!(r.outcome, CompensationOutcome::Failed { .. }))
                .count()
        );
        report
    }

    async fn submit(&self, from: Address, to: Address, call: CompensatingCall) -> CompensationOutcome {
        let request = TxRequest {
            from,
            to,
            function: call.function,
            args: call.args,
            value: None,
            gas_limit: None,
            gas_price: None,
        };

        let started = Instant::now();
        let tx_hash = match self.chain.send_transaction(&request).await {
            Ok(hash) => hash,
            Err(e) => {
                return CompensationOutcome::Failed {
                    error: e.to_string(),
                    tx_hash: None,
                }
            }
        };

        let receipt =
            tokio::time::timeout(self.receipt_timeout, self.chain.wait_for_receipt(tx_hash)).await;
        metrics::STEP_DURATION
            .with_label_values(&[request.function_name()])
            .observe(started.elapsed().as_secs_f64());

        match receipt {
            Ok(Ok(r)) if r.success => CompensationOutcome::Compensated { tx_hash },
            Ok(Ok(_)) => CompensationOutcome::Failed {
                error: ChainError::Reverted {
                    tx_hash: Some(tx_hash),
                    reason: "compensation receipt status failed".to_string(),
                }
                .to_string(),
                tx_hash: Some(tx_hash),
            },
            Ok(Err(e)) => CompensationOutcome::Failed {
                error: e.to_string(),
                tx_hash: Some(tx_hash),
            },
            Err(_) => CompensationOutcome::Failed {
                error: ChainError::Timeout(format!("{:?}", self.receipt_timeout)).to_string(),
                tx_hash: Some(tx_hash),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(function: &str, args: &[&str]) -> TransactionStep {
        TransactionStep::new(
            "s",
            Address::ZERO,
            function,
            args.iter().map(|a| a.to_string()).collect(),
        )
    }

    #[test]
    fn test_builtin_compensations() {
        let registry = CompensationRegistry::default();
        let spender = "0x0000000000000000000000000000000000000002";

        let approve = step("approve(address,uint256)", &[spender, "500"]);
        let call = registry
            .get(approve.function_name())
            .and_then(|c| c.compensate(&approve))
            .unwrap();
        assert_eq!(call.args, vec![spender.to_string(), "0".to_string()]);

        let increase = step("increaseAllowance(address,uint256)", &[spender, "7"]);
        let call = registry
            .get(increase.function_name())
            .and_then(|c| c.compensate(&increase))
            .unwrap();
        assert_eq!(call.function, "decreaseAllowance(address,uint256)");
        assert_eq!(call.args[1], "7");

        assert!(!registry.contains("swapExactTokensForTokens"));
    }

    #[test]
    fn test_register_closure() {
        let mut registry = CompensationRegistry::default();
        registry.register(
            "deposit",
            Arc::new(|step: &TransactionStep| {
                Some(CompensatingCall {
                    function: "withdraw(uint256)".to_string(),
                    args: step.args.clone(),
                })
            }),
        );
        let deposit = step("deposit(uint256)", &["10"]);
        let call = registry.get("deposit").and_then(|c| c.compensate(&deposit));
        assert_eq!(call.map(|c| c.function), Some("withdraw(uint256)".to_string()));
    }
}
