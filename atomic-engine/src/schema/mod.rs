//! 数据结构定义
//!
//! 原子操作、交易步骤、前置要求以及各类报告

pub mod operation;
pub mod report;
pub mod requirement;
pub mod step;

pub use operation::{
    AtomicOperation, OperationKind, OperationMetadata, OperationStatus, RiskLevel,
    SafeguardConfig,
};
pub use report::{
    CompensationOutcome, CompensationRecord, ExecutionResult, RollbackReport, SimulationResult,
    StepSimulation,
};
pub use requirement::{OperationRequirement, RequirementKind, RequirementReport, RequirementResult};
pub use step::{Comparator, ConditionCheck, StepState, TransactionStep};
