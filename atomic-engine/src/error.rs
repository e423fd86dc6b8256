//! 引擎错误类型
//!
//! 每个 `EngineError` 都有稳定的 `ErrorCode`：`to_message()` 是面向用户的说明，
//! `Display` 是技术细节

use std::time::Duration;
use thiserror::Error;

use crate::chain::ChainError;
use crate::schema::{OperationStatus, RollbackReport};
use crate::store::StoreError;

/// 引擎错误码
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// 操作不存在
    NotFound = 1001,
    /// 参数无效
    InvalidParams = 1002,
    /// 当前状态不允许该操作
    InvalidStatus = 1003,
    /// 操作正在执行中
    AlreadyExecuting = 1004,
    /// 执行中的操作不能取消
    CancelRejected = 1005,
    /// 模拟未通过
    SimulationBlocked = 1006,
    /// 步骤执行失败
    StepFailed = 1007,
    /// 存储失败
    StoreFailed = 1008,
    /// 链交互失败
    ChainFailed = 1009,
}

impl ErrorCode {
    /// 获取错误码对应的标准化错误描述
    pub fn to_message(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "操作不存在",
            ErrorCode::InvalidParams => "操作参数无效",
            ErrorCode::InvalidStatus => "当前状态不允许该操作",
            ErrorCode::AlreadyExecuting => "操作正在执行中",
            ErrorCode::CancelRejected => "执行中的操作无法取消",
            ErrorCode::SimulationBlocked => "模拟未通过，操作无法执行",
            ErrorCode::StepFailed => "交易步骤执行失败",
            ErrorCode::StoreFailed => "操作存储读写失败",
            ErrorCode::ChainFailed => "链上交互失败",
        }
    }
}

/// 步骤失败的直接原因
#[derive(Debug, Clone, Error)]
pub enum StepFailureCause {
    #[error("precondition not met: {0}")]
    Precondition(String),

    #[error(transparent)]
    Chain(ChainError),

    #[error("transaction confirmation timeout after {0:?}")]
    ReceiptTimeout(Duration),
}

/// 步骤失败详情（在回滚完成之后抛出）
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub operation_id: String,
    pub step_index: usize,
    pub step_id: String,
    pub function: String,
    /// 失败后的操作状态：failed 或 reverted
    pub status: OperationStatus,
    pub completed_steps: usize,
    pub cause: StepFailureCause,
    /// 仅在触发回滚时存在
    pub rollback: Option<RollbackReport>,
}

/// 引擎错误类型
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("operation not found: {0}")]
    NotFound(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("operation {id} is {status}")]
    InvalidStatus { id: String, status: OperationStatus },

    #[error("operation {0} is already executing")]
    AlreadyExecuting(String),

    #[error("operation {id} cannot be cancelled while {status}")]
    CancelRejected { id: String, status: OperationStatus },

    #[error("operation {id} failed simulation: {}", .errors.join("; "))]
    SimulationBlocked { id: String, errors: Vec<String> },

    #[error("step {} ({}) failed: {}", .0.step_index, .0.function, .0.cause)]
    StepFailed(Box<StepFailure>),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::NotFound(_) => ErrorCode::NotFound,
            EngineError::InvalidParams(_) => ErrorCode::InvalidParams,
            EngineError::InvalidStatus { .. } => ErrorCode::InvalidStatus,
            EngineError::AlreadyExecuting(_) => ErrorCode::AlreadyExecuting,
            EngineError::CancelRejected { .. } => ErrorCode::CancelRejected,
            EngineError::SimulationBlocked { .. } => ErrorCode::SimulationBlocked,
            EngineError::StepFailed(_) => ErrorCode::StepFailed,
            EngineError::Store(_) => ErrorCode::StoreFailed,
            EngineError::Chain(_) => ErrorCode::ChainFailed,
        }
    }

    /// 面向用户的说明 + 技术细节
    pub fn user_message(&self) -> String {
        format!("{}: {}", self.code().to_message(), self)
    }

    /// 是否来自链上交互，可交给错误分类与恢复处理。
    /// 引擎自身的拒绝（参数、状态、模拟未通过等）重试不会改变结果
    pub fn is_recoverable(&self) -> bool {
        matches!(self.code(), ErrorCode::StepFailed | ErrorCode::ChainFailed)
    }

    pub fn step_failure(&self) -> Option<&StepFailure> {
        match self {
            EngineError::StepFailed(failure) => Some(failure),
            _ => None,
        }
    }
}
