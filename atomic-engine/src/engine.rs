//! 原子交易引擎
//!
//! 对外入口：创建、检查、模拟、执行、取消和查询操作。
//! 引擎只构造一次，通过 `Arc<AtomicEngine>` 共享

use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::builder::{OperationBuilder, OperationParams};
use crate::chain::ChainClient;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::{
    Compensation, CompensationRegistry, ExecutionCoordinator, InFlightRegistry,
    RequirementChecker, RollbackCompensator, StepSimulator,
};
use crate::metrics;
use crate::schema::{
    AtomicOperation, ExecutionResult, OperationStatus, RequirementReport, SimulationResult,
};
use crate::store::OperationStore;
use crate::tuning::GasTuning;

pub struct AtomicEngine {
    store: Arc<dyn OperationStore>,
    tuning: Arc<GasTuning>,
    compensations: Arc<RwLock<CompensationRegistry>>,
    inflight: Arc<InFlightRegistry>,
    checker: RequirementChecker,
    simulator: StepSimulator,
    coordinator: ExecutionCoordinator,
}

impl AtomicEngine {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn OperationStore>,
        config: EngineConfig,
    ) -> Self {
        Self::with_tuning(chain, store, config, Arc::new(GasTuning::default()))
    }

    /// 与错误恢复共享同一个 `GasTuning`
    pub fn with_tuning(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn OperationStore>,
        config: EngineConfig,
        tuning: Arc<GasTuning>,
    ) -> Self {
        let compensations = Arc::new(RwLock::new(CompensationRegistry::default()));
        let compensator = RollbackCompensator::new(
            Arc::clone(&chain),
            Arc::clone(&compensations),
            config.receipt_timeout,
        );

        Self {
            checker: RequirementChecker::new(Arc::clone(&chain)),
            simulator: StepSimulator::new(Arc::clone(&chain), config.default_gas_limit),
            coordinator: ExecutionCoordinator::new(
                chain,
                Arc::clone(&store),
                Arc::clone(&tuning),
                compensator,
                config,
            ),
            store,
            tuning,
            compensations,
            inflight: InFlightRegistry::new(),
        }
    }

    pub fn tuning(&self) -> Arc<GasTuning> {
        Arc::clone(&self.tuning)
    }

    /// 注册自定义补偿（按函数名）
    pub fn register_compensation(
        &self,
        function_name: impl Into<String>,
        compensation: Arc<dyn Compensation>,
    ) {
        self.compensations.write().register(function_name, compensation);
    }

    pub fn is_executing(&self, id: &str) -> bool {
        self.inflight.contains(id)
    }

    // ==================== 创建与查询 ====================

    pub fn create_operation(&self, params: OperationParams) -> Result<AtomicOperation, EngineError> {
        let operation = OperationBuilder::build(params, Utc::now())?;
        self.store.put(&operation)?;

        metrics::OPERATIONS_CREATED
            .with_label_values(&[operation.kind.as_str()])
            .inc();
        info!(
            "📝 创建操作 {} ({}, {} 步)",
            operation.id,
            operation.kind.as_str(),
            operation.steps.len()
        );
        Ok(operation)
    }

    pub fn get_operation(&self, id: &str) -> Result<AtomicOperation, EngineError> {
        self.store
            .get(id)?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    pub fn list_operations(
        &self,
        status: Option<OperationStatus>,
    ) -> Result<Vec<AtomicOperation>, EngineError> {
        Ok(self.store.list(status)?)
    }

    // ==================== 检查与模拟 ====================

    pub async fn check_requirements(&self, id: &str) -> Result<RequirementReport, EngineError> {
        let operation = self.get_operation(id)?;
        Ok(self.checker.check(&operation.requirements).await)
    }

    /// 模拟操作；不提交任何交易
    ///
    /// 期间状态为 simulating，结束后恢复原状态并回写 gas/费用估算
    pub async fn simulate(&self, id: &str) -> Result<SimulationResult, EngineError> {
        if self.inflight.contains(id) {
            return Err(EngineError::AlreadyExecuting(id.to_string()));
        }

        let mut operation = self.get_operation(id)?;
        if !operation.status.is_executable() {
            return Err(EngineError::InvalidStatus {
                id: id.to_string(),
                status: operation.status,
            });
        }

        let previous = operation.status;
        operation.status = OperationStatus::Simulating;
        self.store.put(&operation)?;

        let mut prepared = operation.clone();
        prepared.status = previous;
        prepared.prepare_for_execution();
        let result = self.simulator.simulate(&prepared, Utc::now()).await;

        // 模拟期间被取消则不再写回
        match self.store.get(id)? {
            Some(mut current) if current.status == OperationStatus::Simulating => {
                current.status = previous;
                current.metadata.estimated_gas = Some(result.total_gas);
                current.metadata.estimated_cost = result.total_cost;
                self.store.put(&current)?;
            }
            Some(_) => {}
            None => info!("🗑️  操作 {} 在模拟期间被取消", id),
        }

        Ok(result)
    }

    // ==================== 执行 ====================

    /// 执行操作
    ///
    /// 每次调用都会重新模拟；同一 id 的并发调用在任何链上交互之前被拒绝
    pub async fn execute(&self, id: &str) -> Result<ExecutionResult, EngineError> {
        let _guard = match self.inflight.try_acquire(id) {
            Some(guard) => guard,
            None => {
                warn!("⚠️  操作 {} 已在执行中，拒绝重复执行", id);
                metrics::EXECUTIONS.with_label_values(&["rejected"]).inc();
                return Err(EngineError::AlreadyExecuting(id.to_string()));
            }
        };

        let mut operation = self.get_operation(id)?;
        if !operation.status.is_executable() {
            return Err(EngineError::InvalidStatus {
                id: id.to_string(),
                status: operation.status,
            });
        }

        operation.prepare_for_execution();
        let started_at = Utc::now();

        let simulation = self.simulator.simulate(&operation, started_at).await;
        operation.metadata.estimated_gas = Some(simulation.total_gas);
        operation.metadata.estimated_cost = simulation.total_cost;
        if !simulation.can_execute {
            self.store.put(&operation)?;
            metrics::EXECUTIONS.with_label_values(&["blocked"]).inc();
            warn!("🚫 操作 {} 未通过模拟，不执行", id);
            return Err(EngineError::SimulationBlocked {
                id: id.to_string(),
                errors: simulation.errors,
            });
        }

        operation.status = OperationStatus::Executing;
        operation.executed_at = Some(started_at);
        self.store.put(&operation)?;
        info!("🚀 开始执行操作 {} ({} 步)", id, operation.steps.len());

        match self.coordinator.run(&mut operation).await {
            Ok(()) => {}
            Err(e @ EngineError::StepFailed(_)) => {
                metrics::EXECUTIONS
                    .with_label_values(&[operation.status.as_str()])
                    .inc();
                return Err(e);
            }
            Err(e) => {
                // 存储失败等非步骤错误：尽量不留下 executing 状态
                error!("❌ 执行操作 {} 中断: {}", id, e);
                operation.status = OperationStatus::Failed;
                if let Err(store_err) = self.store.put(&operation) {
                    error!("❌ 保存失败状态出错 {}: {}", id, store_err);
                }
                metrics::EXECUTIONS.with_label_values(&["failed"]).inc();
                return Err(e);
            }
        }

        let finished_at = Utc::now();
        operation.status = OperationStatus::Completed;
        operation.completed_at = Some(finished_at);
        self.store.put(&operation)?;
        metrics::EXECUTIONS.with_label_values(&["completed"]).inc();

        info!(
            "🎉 操作 {} 完成: {} 步, gas {}",
            id,
            operation.completed_steps(),
            operation.total_gas_used()
        );

        Ok(ExecutionResult {
            operation_id: operation.id.clone(),
            status: operation.status,
            completed_steps: operation.completed_steps(),
            total_gas_used: operation.total_gas_used(),
            tx_hashes: operation.executed_tx_hashes(),
            started_at,
            finished_at,
        })
    }

    // ==================== 取消 ====================

    /// 取消（删除）pending / simulating 的操作
    pub fn cancel(&self, id: &str) -> Result<(), EngineError> {
        let operation = self.get_operation(id)?;

        if self.inflight.contains(id) {
            return Err(EngineError::CancelRejected {
                id: id.to_string(),
                status: OperationStatus::Executing,
            });
        }
        if !operation.status.is_cancellable() {
            return Err(EngineError::CancelRejected {
                id: id.to_string(),
                status: operation.status,
            });
        }

        self.store.delete(id)?;
        info!("🗑️  已取消操作 {}", id);
        Ok(())
    }
}
