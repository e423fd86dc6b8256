//! 执行协调器
//!
//! 严格按顺序执行步骤：前置条件 -> 提交 -> 等待回执 -> 记录。
//! 任一步骤失败即停止；回滚仅在 require_all_steps 与 enable_rollback 同时开启时进行。
//! 协调器本身从不重试

use alloy::primitives::B256;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::chain::{ChainClient, ChainError, TxRequest};
use crate::config::EngineConfig;
use crate::error::{EngineError, StepFailure, StepFailureCause};
use crate::executor::simulator::evaluate_condition;
use crate::executor::RollbackCompensator;
use crate::metrics;
use crate::schema::{AtomicOperation, OperationStatus, TransactionStep};
use crate::store::OperationStore;
use crate::tuning::GasTuning;

pub struct ExecutionCoordinator {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn OperationStore>,
    tuning: Arc<GasTuning>,
    compensator: RollbackCompensator,
    config: EngineConfig,
}

impl ExecutionCoordinator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn OperationStore>,
        tuning: Arc<GasTuning>,
        compensator: RollbackCompensator,
        config: EngineConfig,
    ) -> Self {
        Self {
            chain,
            store,
            tuning,
            compensator,
            config,
        }
    }

    /// 执行所有未执行的步骤
    ///
    /// 调用方已将状态置为 executing 并持有该 id 的执行权。
    /// 成功时操作停留在 executing，由调用方收尾
    pub async fn run(&self, operation: &mut AtomicOperation) -> Result<(), EngineError> {
        for index in 0..operation.steps.len() {
            if operation.steps[index].is_executed() {
                debug!("⏭️  步骤 {} 已执行，跳过", index);
                continue;
            }

            info!(
                "▶️  执行步骤 {}/{} ({}) of {}",
                index + 1,
                operation.steps.len(),
                operation.steps[index].function_name(),
                operation.id
            );

            match self.run_step(operation, index).await {
                Ok((tx_hash, gas_used)) => {
                    operation.steps[index].mark_executed(tx_hash, gas_used);
                    self.store.put(operation)?;
                    info!(
                        "✅ 步骤 {} ({}) 已确认: {} gas={}",
                        index,
                        operation.steps[index].function_name(),
                        tx_hash,
                        gas_used
                    );
                }
                Err((cause, tx_hash)) => {
                    return Err(self.fail(operation, index, cause, tx_hash).await);
                }
            }
        }

        Ok(())
    }

    async fn run_step(
        &self,
        operation: &AtomicOperation,
        index: usize,
    ) -> Result<(B256, u64), (StepFailureCause, Option<B256>)> {
        let step = &operation.steps[index];

        // 执行前重新检查前置条件，失败立即抛出
        if let Some(check) = &step.precondition {
            match evaluate_condition(self.chain.as_ref(), check).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err((StepFailureCause::Precondition(check.describe()), None));
                }
                Err(e) => {
                    return Err((
                        StepFailureCause::Precondition(format!("{} ({})", check.describe(), e)),
                        None,
                    ));
                }
            }
        }

        let request = self.build_request(step, operation).await;
        let started = Instant::now();

        let tx_hash = self
            .chain
            .send_transaction(&request)
            .await
            .map_err(|e| (StepFailureCause::Chain(e), None))?;
        debug!("📤 已提交 {}: {}", request.function_name(), tx_hash);

        let wait = self.receipt_wait_bound(operation);
        let receipt = tokio::time::timeout(wait, self.chain.wait_for_receipt(tx_hash)).await;
        metrics::STEP_DURATION
            .with_label_values(&[request.function_name()])
            .observe(started.elapsed().as_secs_f64());

        match receipt {
            Err(_) => Err((StepFailureCause::ReceiptTimeout(wait), Some(tx_hash))),
            Ok(Err(e)) => Err((StepFailureCause::Chain(e), Some(tx_hash))),
            Ok(Ok(r)) if !r.success => Err((
                StepFailureCause::Chain(ChainError::Reverted {
                    tx_hash: Some(tx_hash),
                    reason: "receipt status failed".to_string(),
                }),
                Some(tx_hash),
            )),
            Ok(Ok(r)) => Ok((tx_hash, r.gas_used)),
        }
    }

    /// 应用 gas 调优倍率
    async fn build_request(&self, step: &TransactionStep, operation: &AtomicOperation) -> TxRequest {
        let mut request = step.to_tx_request(operation.account);

        if self.tuning.gas_limit_percent() != crate::tuning::BASE_PERCENT {
            let base = match step.gas_limit {
                Some(limit) => limit,
                None => self
                    .chain
                    .estimate_gas(&request)
                    .await
                    .unwrap_or(self.config.default_gas_limit),
            };
            request.gas_limit = Some(self.tuning.apply_gas_limit(base));
        }

        if self.tuning.gas_price_percent() != crate::tuning::BASE_PERCENT {
            match self.chain.gas_price().await {
                Ok(price) => request.gas_price = Some(self.tuning.apply_gas_price(price)),
                Err(e) => warn!("⚠️  无法获取 gas 价格，使用节点默认值: {}", e),
            }
        }

        request
    }

    /// 有截止时间时等到截止时间，否则使用配置的上限
    fn receipt_wait_bound(&self, operation: &AtomicOperation) -> Duration {
        match operation.safeguards.deadline {
            Some(deadline) => (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO),
            None => self.config.receipt_timeout,
        }
    }

    async fn fail(
        &self,
        operation: &mut AtomicOperation,
        index: usize,
        cause: StepFailureCause,
        tx_hash: Option<B256>,
    ) -> EngineError {
        let function = operation.steps[index].function_name().to_string();
        error!(
            "❌ 步骤 {} ({}) of {} 失败: {}",
            index, function, operation.id, cause
        );
        operation.steps[index].mark_failed(cause.to_string(), tx_hash);

        let rollback = if operation.safeguards.rollback_enabled() {
            let report = self.compensator.rollback(operation, index).await;
            operation.status = OperationStatus::Reverted;
            Some(report)
        } else {
            operation.status = OperationStatus::Failed;
            None
        };

        if let Err(e) = self.store.put(operation) {
            error!("❌ 保存失败状态出错 {}: {}", operation.id, e);
        }

        EngineError::StepFailed(Box::new(StepFailure {
            operation_id: operation.id.clone(),
            step_index: index,
            step_id: operation.steps[index].id.clone(),
            function,
            status: operation.status,
            completed_steps: operation.completed_steps(),
            cause,
            rollback,
        }))
    }
}
