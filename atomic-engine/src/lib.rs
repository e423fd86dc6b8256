//! Atomic Engine Library
//!
//! 原子交易引擎核心库：多步链上操作的构建、模拟、顺序执行与回滚补偿，
//! 以及错误分类、重试策略和恢复动作

pub mod builder;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod recovery;
pub mod schema;
pub mod store;
pub mod tuning;

pub use builder::{BatchParams, OperationParams, StepParams, SwapParams, TimelockParams};
pub use chain::{ChainClient, ChainError};
pub use config::{EngineConfig, RecoveryConfig};
pub use engine::AtomicEngine;
pub use error::{EngineError, ErrorCode, StepFailure, StepFailureCause};
pub use recovery::{ErrorAnalysis, ErrorCategory, ErrorContext, ErrorRecovery, RecoveryEnv};
pub use store::{MemoryStore, OperationStore, RedbStore};
pub use tuning::GasTuning;
